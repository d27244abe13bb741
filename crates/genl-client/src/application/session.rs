//! ClientSession: the client's whole lifecycle against the service.
//!
//! Two transport sessions are used. Session A carries request/reply
//! exchanges and keeps strict sequence checking. Session B only receives
//! `mcgrp` notifications, which answer no request, so its sequence check is
//! off. Keeping them apart means a notification can never be mistaken for a
//! reply.
//!
//! ```text
//! open:  connect A ─► connect B ─► resolve family (A) ─► resolve group (B)
//!        ─► join group (B) ─► install sink (A, B)
//! ```
//!
//! Any failure during `open` closes whatever was already opened.

use std::sync::Arc;
use std::time::Duration;

use genl_core::family::ctrl::FamilyInfo;
use genl_core::family::genltest::{Attr, Command, FAMILY_NAME, FAMILY_VERSION, GROUP_NAME};
use genl_core::protocol::envelope::flags;
use genl_core::EnvelopeBuilder;
use tracing::{debug, info};

use crate::application::error::ClientError;
use crate::application::sink::{MessageSink, ReceivedMessage};
use crate::application::transport::{Connector, Delivery, GenlTransport};

pub struct ClientSession<T: GenlTransport> {
    unicast: T,
    notify: T,
    family: FamilyInfo,
    group: u32,
    reply_timeout: Duration,
}

impl<T: GenlTransport> ClientSession<T> {
    /// Opens both transport sessions, resolves the `genltest` family and its
    /// `mcgrp` group, joins the group, and installs `sink` on both.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ConnectionFailure`] if either session cannot connect.
    /// - [`ClientError::FamilyNotFound`] / [`ClientError::GroupNotFound`] if
    ///   the service has not registered them.
    /// - [`ClientError::JoinFailure`] if the service refuses the join.
    pub async fn open<C>(
        connector: &C,
        sink: Arc<dyn MessageSink>,
        reply_timeout: Duration,
    ) -> Result<Self, ClientError>
    where
        C: Connector<Transport = T>,
    {
        let mut unicast = connector.connect().await?;
        let mut notify = match connector.connect().await {
            Ok(transport) => transport,
            Err(e) => {
                unicast.close().await;
                return Err(e);
            }
        };

        match setup(&mut unicast, &mut notify, sink).await {
            Ok((family, group)) => {
                info!(
                    "session open: family {} is {:#x}, joined group {GROUP_NAME} ({group})",
                    family.name, family.id
                );
                Ok(Self {
                    unicast,
                    notify,
                    family,
                    group,
                    reply_timeout,
                })
            }
            Err(e) => {
                unicast.close().await;
                notify.close().await;
                Err(e)
            }
        }
    }

    pub fn family(&self) -> &FamilyInfo {
        &self.family
    }

    /// Runtime id of the joined group.
    pub fn group(&self) -> u32 {
        self.group
    }

    /// Sends an ECHO request on session A, with `text` as MSG if given.
    /// Returns the request's sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] if the text does not fit one frame,
    /// or the transport's send error.
    pub async fn send_echo(&mut self, text: Option<&str>) -> Result<u32, ClientError> {
        let seq = self.unicast.next_seq();
        let mut builder = EnvelopeBuilder::begin(
            self.family.id,
            FAMILY_VERSION,
            Command::Echo.id(),
            seq,
            0,
            flags::REQUEST,
        )?;
        if let Some(text) = text {
            if let Err(e) = builder.put_string(Attr::Msg.id(), text) {
                builder.cancel();
                return Err(e.into());
            }
        }
        self.unicast.send(builder.finalize()).await?;
        debug!("echo request sent with seq {seq}");
        Ok(seq)
    }

    /// Waits on session A for the reply to the request in flight.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Timeout`] if nothing arrives within the reply
    /// timeout, or the transport's receive error.
    pub async fn receive_reply(&mut self) -> Result<ReceivedMessage, ClientError> {
        let timeout = self.reply_timeout;
        tokio::time::timeout(timeout, next_message(&mut self.unicast))
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    /// Delivers notifications from session B to the sink until the
    /// connection fails. Never returns `Ok`; cancel it by dropping the
    /// future.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the connection.
    pub async fn listen(&mut self) -> Result<(), ClientError> {
        loop {
            self.notify.recv_messages().await?;
        }
    }

    /// Closes both sessions. Safe to call more than once.
    pub async fn close(&mut self) {
        self.unicast.close().await;
        self.notify.close().await;
    }
}

async fn setup<T: GenlTransport>(
    unicast: &mut T,
    notify: &mut T,
    sink: Arc<dyn MessageSink>,
) -> Result<(FamilyInfo, u32), ClientError> {
    let family = unicast.resolve_family(FAMILY_NAME).await?;

    notify.disable_seq_check();
    let group = notify.resolve_group(FAMILY_NAME, GROUP_NAME).await?;
    notify.add_membership(group).await?;

    unicast.set_sink(Arc::clone(&sink));
    notify.set_sink(sink);
    Ok((family, group))
}

async fn next_message<T: GenlTransport>(transport: &mut T) -> Result<ReceivedMessage, ClientError> {
    loop {
        if let Delivery::Message(message) = transport.recv_messages().await? {
            return Ok(message);
        }
    }
}
