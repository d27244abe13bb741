//! MessageBus: the in-process transport every client session and the
//! service's family meet on.
//!
//! # Responsibilities
//!
//! - **Ports** – each client session is attached as one port with its own
//!   outbound queue. Port 0 is the service itself and is never handed out.
//! - **Controller** – `GETFAMILY` requests are answered here from the table
//!   of published families.
//! - **Membership** – `ADD_MEMBERSHIP` / `DROP_MEMBERSHIP` frames join and
//!   leave broadcast groups, and are acknowledged on request.
//! - **Routing** – family messages are forwarded to the owning family's
//!   inbox tagged with the sender port; replies and notifications go out
//!   through [`FrameTransport`].
//!
//! # Locking
//!
//! All tables live behind one `tokio::sync::RwLock`. Multicast takes its
//! subscriber snapshot under a single read lock and sends after releasing
//! it: a port that left before the call is never a target, a port that
//! joins during the call may or may not be.
//!
//! Sends never wait on a slow reader: a full port queue drops the frame for
//! that port and the failure is logged.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use genl_core::family::ctrl::{
    self, FamilyInfo, FamilyQuery, CMD_GETFAMILY, CTRL_FAMILY_ID, CTRL_FAMILY_NAME,
    FIRST_FAMILY_ID, FIRST_GROUP_ID,
};
use genl_core::protocol::control::{self, ControlMessage, EINVAL, ENOENT};
use genl_core::protocol::envelope::{flags, msg_type};
use genl_core::{Envelope, ParsedEnvelope, TransportHeader};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::application::transport::{
    FamilyAdvert, FrameTransport, Inbound, NamingError, NamingService, Publication, SendError,
};

/// Error type for port management.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("message bus is closed")]
    Closed,
    #[error("port id space exhausted")]
    PortsExhausted,
}

#[derive(Debug)]
struct FamilyEntry {
    info: FamilyInfo,
    inbox: mpsc::Sender<Inbound>,
}

#[derive(Debug)]
struct GroupEntry {
    family_id: u16,
    subscribers: BTreeSet<u32>,
}

#[derive(Debug)]
struct BusState {
    closed: bool,
    next_port: u32,
    next_family_id: u16,
    next_group_id: u32,
    ports: HashMap<u32, mpsc::Sender<Vec<u8>>>,
    families: BTreeMap<u16, FamilyEntry>,
    groups: BTreeMap<u32, GroupEntry>,
}

impl BusState {
    fn new() -> Self {
        Self {
            closed: false,
            next_port: 1,
            next_family_id: FIRST_FAMILY_ID,
            next_group_id: FIRST_GROUP_ID,
            ports: HashMap::new(),
            families: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }

    fn lookup(&self, query: &FamilyQuery) -> Option<FamilyInfo> {
        let is_controller = match query {
            FamilyQuery::ByName(name) => name == CTRL_FAMILY_NAME,
            FamilyQuery::ById(id) => *id == CTRL_FAMILY_ID,
        };
        if is_controller {
            return Some(controller_info());
        }
        self.families
            .values()
            .map(|f| &f.info)
            .find(|info| match query {
                FamilyQuery::ByName(name) => info.name == *name,
                FamilyQuery::ById(id) => info.id == *id,
            })
            .cloned()
    }
}

fn controller_info() -> FamilyInfo {
    FamilyInfo {
        id: CTRL_FAMILY_ID,
        name: CTRL_FAMILY_NAME.to_string(),
        version: u32::from(ctrl::CTRL_VERSION),
        max_attr: u32::from(ctrl::ATTR_MAX),
        groups: Vec::new(),
    }
}

/// The in-process transport.
#[derive(Debug)]
pub struct MessageBus {
    state: RwLock<BusState>,
    queue_depth: usize,
}

impl MessageBus {
    /// Creates a bus whose port queues and family inboxes hold up to
    /// `queue_depth` frames.
    pub fn new(queue_depth: usize) -> Self {
        Self {
            state: RwLock::new(BusState::new()),
            queue_depth: queue_depth.max(1),
        }
    }

    // ── Ports ─────────────────────────────────────────────────────────────────

    /// Attaches a new session and returns its port and outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] after [`close`](Self::close).
    pub async fn attach(&self) -> Result<(u32, mpsc::Receiver<Vec<u8>>), BusError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(BusError::Closed);
        }
        let port = state.next_port;
        state.next_port = port.checked_add(1).ok_or(BusError::PortsExhausted)?;
        let (tx, rx) = mpsc::channel(self.queue_depth);
        state.ports.insert(port, tx);
        debug!("attached port {port}");
        Ok((port, rx))
    }

    /// Detaches `port` and removes it from every group. Unknown ports are ignored.
    pub async fn detach(&self, port: u32) {
        let mut state = self.state.write().await;
        if state.ports.remove(&port).is_some() {
            debug!("detached port {port}");
        }
        for group in state.groups.values_mut() {
            group.subscribers.remove(&port);
        }
    }

    /// Detaches every port. Published families stay advertised until withdrawn.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        if state.closed {
            return;
        }
        state.closed = true;
        state.ports.clear();
        for group in state.groups.values_mut() {
            group.subscribers.clear();
        }
        info!("message bus closed");
    }

    pub async fn port_count(&self) -> usize {
        self.state.read().await.ports.len()
    }

    pub async fn subscriber_count(&self, group: u32) -> usize {
        self.state
            .read()
            .await
            .groups
            .get(&group)
            .map_or(0, |g| g.subscribers.len())
    }

    // ── Ingress ───────────────────────────────────────────────────────────────

    /// Routes one frame sent by `port`.
    ///
    /// The frame's port field is overwritten with `port`. Frames that cannot
    /// be parsed are logged and dropped; requests that cannot be routed are
    /// answered with an error frame.
    pub async fn ingress(&self, port: u32, mut frame: Vec<u8>) {
        let header = match TransportHeader::parse(&frame) {
            Ok(h) if h.len as usize <= frame.len() => h,
            Ok(h) => {
                warn!(
                    "dropping frame from port {port}: length {} exceeds {} bytes",
                    h.len,
                    frame.len()
                );
                return;
            }
            Err(e) => {
                warn!("dropping frame from port {port}: {e}");
                return;
            }
        };
        frame.truncate(header.len as usize);
        TransportHeader::stamp_port(&mut frame, port);
        let header = TransportHeader { port, ..header };

        match header.msg_type {
            CTRL_FAMILY_ID => self.handle_controller(header, &frame).await,
            msg_type::ADD_MEMBERSHIP | msg_type::DROP_MEMBERSHIP => {
                self.handle_membership(header, &frame).await
            }
            _ if header.is_family_message() => self.route_to_family(header, frame).await,
            other => debug!("ignoring control message {other:#x} from port {port}"),
        }
    }

    async fn handle_controller(&self, header: TransportHeader, frame: &[u8]) {
        let port = header.port;
        let reply = match ParsedEnvelope::parse(frame, Some(CTRL_FAMILY_ID)) {
            Err(e) => {
                warn!("malformed controller request from port {port}: {e}");
                control::error_frame(EINVAL, &header, port)
            }
            Ok(parsed) if parsed.genl.cmd != CMD_GETFAMILY => {
                warn!(
                    "unsupported controller command {} from port {port}",
                    parsed.genl.cmd
                );
                control::error_frame(EINVAL, &header, port)
            }
            Ok(parsed) => match FamilyQuery::parse(&parsed) {
                Err(e) => {
                    warn!("invalid GETFAMILY from port {port}: {e}");
                    control::error_frame(EINVAL, &header, port)
                }
                Ok(query) => {
                    let found = self.state.read().await.lookup(&query);
                    match found {
                        Some(info) => match info.encode_reply(header.seq, port) {
                            Ok(reply) => reply,
                            Err(e) => {
                                warn!("failed to encode family {}: {e}", info.name);
                                control::error_frame(EINVAL, &header, port)
                            }
                        },
                        None => {
                            debug!("GETFAMILY {query:?} from port {port}: no such family");
                            control::error_frame(ENOENT, &header, port)
                        }
                    }
                }
            },
        };
        self.reply(port, reply).await;
    }

    async fn handle_membership(&self, header: TransportHeader, frame: &[u8]) {
        let port = header.port;
        let message = match control::parse_control(frame) {
            Ok((_, message)) => message,
            Err(e) => {
                warn!("malformed membership request from port {port}: {e}");
                self.reply(port, control::error_frame(EINVAL, &header, port))
                    .await;
                return;
            }
        };

        let errno = {
            let mut state = self.state.write().await;
            if !state.ports.contains_key(&port) {
                return;
            }
            match message {
                ControlMessage::AddMembership { group } => match state.groups.get_mut(&group) {
                    Some(entry) => {
                        entry.subscribers.insert(port);
                        info!("port {port} joined group {group}");
                        0
                    }
                    None => ENOENT,
                },
                ControlMessage::DropMembership { group } => match state.groups.get_mut(&group) {
                    Some(entry) => {
                        entry.subscribers.remove(&port);
                        info!("port {port} left group {group}");
                        0
                    }
                    None => ENOENT,
                },
                _ => EINVAL,
            }
        };

        if errno != 0 || header.flags & flags::ACK != 0 {
            self.reply(port, control::error_frame(errno, &header, port))
                .await;
        }
    }

    async fn route_to_family(&self, header: TransportHeader, frame: Vec<u8>) {
        let port = header.port;
        let inbox = self
            .state
            .read()
            .await
            .families
            .get(&header.msg_type)
            .map(|f| f.inbox.clone());

        match inbox {
            Some(inbox) => {
                let inbound = Inbound {
                    bytes: frame,
                    sender: port,
                };
                if inbox.send(inbound).await.is_err() {
                    warn!(
                        "family {:#x} stopped receiving; dropping message from port {port}",
                        header.msg_type
                    );
                }
            }
            None => {
                debug!(
                    "no family {:#x} for message from port {port}",
                    header.msg_type
                );
                self.reply(port, control::error_frame(ENOENT, &header, port))
                    .await;
            }
        }
    }

    async fn reply(&self, port: u32, frame: Envelope) {
        if let Err(e) = self.send_to_port(port, frame.into_bytes()).await {
            warn!("failed to reply to port {port}: {e}");
        }
    }

    // ── Egress ────────────────────────────────────────────────────────────────

    async fn send_to_port(&self, port: u32, bytes: Vec<u8>) -> Result<(), SendError> {
        let tx = {
            let state = self.state.read().await;
            if state.closed {
                return Err(SendError::Closed);
            }
            state
                .ports
                .get(&port)
                .cloned()
                .ok_or(SendError::UnknownPort(port))?
        };
        tx.try_send(bytes).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull(port),
            TrySendError::Closed(_) => SendError::UnknownPort(port),
        })
    }

    async fn send_to_group(&self, group: u32, bytes: Vec<u8>) -> Result<usize, SendError> {
        let targets: Vec<(u32, mpsc::Sender<Vec<u8>>)> = {
            let state = self.state.read().await;
            if state.closed {
                return Err(SendError::Closed);
            }
            let entry = state.groups.get(&group).ok_or(SendError::UnknownGroup(group))?;
            entry
                .subscribers
                .iter()
                .filter_map(|p| state.ports.get(p).map(|tx| (*p, tx.clone())))
                .collect()
        };
        if targets.is_empty() {
            return Err(SendError::NoSubscribers(group));
        }

        let attempted = targets.len();
        let mut delivered = 0;
        for (port, tx) in targets {
            match tx.try_send(bytes.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("multicast to port {port} in group {group} failed: {e}"),
            }
        }
        if delivered == 0 {
            return Err(SendError::AllDeliveriesFailed { group, attempted });
        }
        Ok(delivered)
    }
}

#[async_trait]
impl NamingService for MessageBus {
    async fn publish(&self, advert: FamilyAdvert) -> Result<Publication, NamingError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(NamingError::Closed);
        }
        if advert.name == CTRL_FAMILY_NAME
            || state.families.values().any(|f| f.info.name == advert.name)
        {
            return Err(NamingError::NameConflict(advert.name));
        }

        let id = state.next_family_id;
        state.next_family_id = id.checked_add(1).ok_or(NamingError::IdsExhausted)?;

        let mut groups = Vec::with_capacity(advert.groups.len());
        for name in advert.groups {
            let group_id = state.next_group_id;
            state.next_group_id = group_id.checked_add(1).ok_or(NamingError::IdsExhausted)?;
            state.groups.insert(
                group_id,
                GroupEntry {
                    family_id: id,
                    subscribers: BTreeSet::new(),
                },
            );
            groups.push(ctrl::GroupInfo { name, id: group_id });
        }

        let info = FamilyInfo {
            id,
            name: advert.name,
            version: u32::from(advert.version),
            max_attr: u32::from(advert.max_attr),
            groups,
        };
        let (tx, inbox) = mpsc::channel(self.queue_depth);
        state.families.insert(
            id,
            FamilyEntry {
                info: info.clone(),
                inbox: tx,
            },
        );
        info!("published family {} as {id:#x}", info.name);
        Ok(Publication { info, inbox })
    }

    async fn withdraw(&self, family_id: u16) -> Result<(), NamingError> {
        let mut state = self.state.write().await;
        if !state.families.contains_key(&family_id) {
            return Err(NamingError::UnknownFamily(family_id));
        }
        let subscribers: usize = state
            .groups
            .values()
            .filter(|g| g.family_id == family_id)
            .map(|g| g.subscribers.len())
            .sum();
        if subscribers > 0 {
            return Err(NamingError::StillInUse {
                family_id,
                subscribers,
            });
        }

        state.groups.retain(|_, g| g.family_id != family_id);
        if let Some(entry) = state.families.remove(&family_id) {
            info!("withdrew family {} ({family_id:#x})", entry.info.name);
        }
        Ok(())
    }
}

#[async_trait]
impl FrameTransport for MessageBus {
    async fn unicast(&self, port: u32, frame: Envelope) -> Result<(), SendError> {
        self.send_to_port(port, frame.into_bytes()).await
    }

    async fn multicast(&self, group: u32, frame: Envelope) -> Result<usize, SendError> {
        self.send_to_group(group, frame.into_bytes()).await
    }
}
