//! GenlSocket: one transport session to the service over a Unix stream.
//!
//! Frames are written whole and read header-first. Controller exchanges
//! (family resolution, group joins) are synchronous request/answer pairs
//! correlated by sequence number; family messages are parsed with the
//! mirrored `genltest` policy and handed to the installed sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use genl_core::family::ctrl::{getfamily_request, FamilyInfo};
use genl_core::family::genltest::{echo_policy, Attr};
use genl_core::protocol::control::{membership_frame, ENOENT};
use genl_core::protocol::envelope::TRANSPORT_HEADER_SIZE;
use genl_core::protocol::{parse_control, ControlMessage};
use genl_core::{Envelope, ParsedEnvelope, ProtocolError, SequenceCounter, TransportHeader};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use crate::application::error::ClientError;
use crate::application::sink::{MessageSink, ReceivedMessage};
use crate::application::transport::{Connector, Delivery, GenlTransport};

/// A frame read from the socket, classified by its transport header.
enum Frame {
    Control(TransportHeader, ControlMessage),
    Family(Vec<u8>),
}

pub struct GenlSocket {
    stream: Option<UnixStream>,
    seq: SequenceCounter,
    seq_check: bool,
    expected_seq: Option<u32>,
    family_id: Option<u16>,
    sink: Option<Arc<dyn MessageSink>>,
}

impl GenlSocket {
    /// Connects to the service socket at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionFailure`] if the connection fails.
    pub async fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| ClientError::ConnectionFailure {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("connected to {}", path.display());
        Ok(Self {
            stream: Some(stream),
            seq: SequenceCounter::new(),
            seq_check: true,
            expected_seq: None,
            family_id: None,
            sink: None,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream(&mut self) -> Result<&mut UnixStream, ClientError> {
        self.stream.as_mut().ok_or(ClientError::Closed)
    }

    async fn write_frame(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.stream()?
            .write_all(bytes)
            .await
            .map_err(ClientError::SendFailure)
    }

    /// Reads one whole frame. End of stream is [`ClientError::Closed`].
    ///
    /// A header that does not parse leaves no way to find the next frame,
    /// so the socket is closed and [`ClientError::Desync`] returned.
    async fn read_frame(&mut self) -> Result<Frame, ClientError> {
        let mut header = [0u8; TRANSPORT_HEADER_SIZE];
        match self.stream()?.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ClientError::Closed)
            }
            Err(e) => return Err(e.into()),
        }
        let parsed = match TransportHeader::parse(&header) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("closing socket after unreadable frame header: {e}");
                self.stream = None;
                return Err(ClientError::Desync(e));
            }
        };
        let mut bytes = header.to_vec();
        bytes.resize(parsed.len as usize, 0);
        self.stream()?
            .read_exact(&mut bytes[TRANSPORT_HEADER_SIZE..])
            .await?;

        if parsed.is_family_message() {
            Ok(Frame::Family(bytes))
        } else {
            let (header, message) = parse_control(&bytes)?;
            Ok(Frame::Control(header, message))
        }
    }

    /// Sends `request` and reads until a frame with its sequence number
    /// arrives. Unrelated frames are skipped.
    async fn exchange(&mut self, request: &Envelope) -> Result<Frame, ClientError> {
        let seq = request.header().seq;
        self.write_frame(request.as_bytes()).await?;
        loop {
            let frame = self.read_frame().await?;
            let frame_seq = match &frame {
                Frame::Control(header, _) => header.seq,
                Frame::Family(bytes) => TransportHeader::parse(bytes)?.seq,
            };
            if frame_seq == seq {
                return Ok(frame);
            }
            debug!("skipping frame with seq {frame_seq} while waiting for {seq}");
        }
    }

    /// Parses a family message and hands it to the sink.
    fn deliver(&self, bytes: &[u8]) -> Delivery {
        match decode_message(bytes, self.family_id) {
            Ok(message) => {
                if let Some(expected) = self.expected_seq.filter(|_| self.seq_check) {
                    if message.seq != expected {
                        self.report(&ClientError::SeqMismatch {
                            expected,
                            found: message.seq,
                        });
                        return Delivery::Dropped;
                    }
                }
                if let Some(sink) = &self.sink {
                    sink.on_message(&message);
                }
                Delivery::Message(message)
            }
            Err(e) => {
                self.report(&e);
                Delivery::Dropped
            }
        }
    }

    fn report(&self, error: &ClientError) {
        match &self.sink {
            Some(sink) => sink.on_error(error),
            None => warn!("dropping inbound message: {error}"),
        }
    }
}

fn decode_message(bytes: &[u8], family_id: Option<u16>) -> Result<ReceivedMessage, ClientError> {
    let parsed = ParsedEnvelope::parse(bytes, family_id)?;
    let attrs = parsed.attributes(&echo_policy())?;
    Ok(ReceivedMessage {
        family_id: parsed.header.msg_type,
        cmd: parsed.genl.cmd,
        seq: parsed.header.seq,
        msg: attrs.get_str(Attr::Msg.id()).map(str::to_string),
    })
}

fn unexpected_answer(message: &ControlMessage) -> ClientError {
    ProtocolError::TransportHeaderInvalid(format!("unexpected control answer {message:?}")).into()
}

#[async_trait]
impl GenlTransport for GenlSocket {
    fn next_seq(&self) -> u32 {
        self.seq.next()
    }

    async fn send(&mut self, envelope: Envelope) -> Result<(), ClientError> {
        let seq = envelope.header().seq;
        self.write_frame(envelope.as_bytes()).await?;
        if self.seq_check {
            self.expected_seq = Some(seq);
        }
        Ok(())
    }

    fn disable_seq_check(&mut self) {
        self.seq_check = false;
        self.expected_seq = None;
    }

    async fn resolve_family(&mut self, name: &str) -> Result<FamilyInfo, ClientError> {
        let request = getfamily_request(name, self.seq.next())?;
        match self.exchange(&request).await? {
            Frame::Family(bytes) => {
                let info = FamilyInfo::decode(&bytes)?;
                debug!("resolved family {name} to {:#x}", info.id);
                self.family_id = Some(info.id);
                Ok(info)
            }
            Frame::Control(_, ControlMessage::Error { errno, .. }) if errno == ENOENT => {
                Err(ClientError::FamilyNotFound(name.to_string()))
            }
            Frame::Control(_, ControlMessage::Error { errno, .. }) => {
                Err(ClientError::Remote { errno })
            }
            Frame::Control(_, message) => Err(unexpected_answer(&message)),
        }
    }

    async fn resolve_group(&mut self, family: &str, group: &str) -> Result<u32, ClientError> {
        let info = self.resolve_family(family).await?;
        info.group_id(group).ok_or_else(|| ClientError::GroupNotFound {
            family: family.to_string(),
            group: group.to_string(),
        })
    }

    async fn add_membership(&mut self, group: u32) -> Result<(), ClientError> {
        let request = membership_frame(true, group, self.seq.next());
        match self.exchange(&request).await? {
            Frame::Control(_, ControlMessage::Ack { .. }) => {
                debug!("joined group {group}");
                Ok(())
            }
            Frame::Control(_, ControlMessage::Error { errno, .. }) => {
                Err(ClientError::JoinFailure { group, errno })
            }
            Frame::Control(_, message) => Err(unexpected_answer(&message)),
            Frame::Family(_) => Err(ProtocolError::TransportHeaderInvalid(
                "family message answering a membership request".to_string(),
            )
            .into()),
        }
    }

    fn set_sink(&mut self, sink: Arc<dyn MessageSink>) {
        self.sink = Some(sink);
    }

    async fn recv_messages(&mut self) -> Result<Delivery, ClientError> {
        match self.read_frame().await {
            Ok(Frame::Family(bytes)) => Ok(self.deliver(&bytes)),
            // Only an error answering the request in flight ends the read;
            // any other error frame is reported like a bad message.
            Ok(Frame::Control(_, ControlMessage::Error { errno, request }))
                if self.seq_check && self.expected_seq == Some(request.seq) =>
            {
                Err(ClientError::Remote { errno })
            }
            Ok(Frame::Control(_, ControlMessage::Error { errno, .. })) => {
                self.report(&ClientError::Remote { errno });
                Ok(Delivery::Dropped)
            }
            Ok(Frame::Control(..)) => Ok(Delivery::Control),
            // The header parsed and the body was read whole, so a bad
            // control payload leaves the stream aligned.
            Err(e @ ClientError::Protocol(_)) => {
                self.report(&e);
                Ok(Delivery::Dropped)
            }
            Err(e) => Err(e),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("shutdown of closed socket failed: {e}");
            }
            debug!("socket closed");
        }
    }
}

/// Connects [`GenlSocket`]s to one service socket path.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Connector for UnixConnector {
    type Transport = GenlSocket;

    async fn connect(&self) -> Result<GenlSocket, ClientError> {
        GenlSocket::connect(&self.path).await
    }
}
