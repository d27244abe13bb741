//! FamilyRegistry: binds a family's name, commands, and groups, and owns its
//! register/unregister lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//! Unregistered  ──register──►  Registered
//!       ▲                          │
//!       └────────unregister────────┘
//! ```
//!
//! `register` publishes the family through the [`NamingService`] and keeps
//! the resulting [`Family`]: an immutable value holding the runtime family
//! id, the command table, and the group table. The dispatcher and emitter
//! read that value; nothing mutates it after registration.
//!
//! `unregister` is best effort. When the naming service refuses the
//! withdrawal (a group still has subscribers) the refusal is logged and
//! returned, but the registry moves to `Unregistered` anyway. The transport
//! may keep advertising the family in that case; there is no retry.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use genl_core::family::ctrl::{GroupInfo, FAMILY_NAME_LEN};
use genl_core::AttrPolicy;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::application::handler::CommandHandler;
use crate::application::transport::{FamilyAdvert, Inbound, NamingError, NamingService};

/// Error type for registry operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The descriptor breaks a structural rule (name length, duplicate
    /// command, policy wider than the family's attribute range, ...).
    #[error("invalid family descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("a family named {0:?} is already registered")]
    NameConflict(String),
    #[error("this registry already holds a registered family")]
    AlreadyRegistered,
    #[error("family {family_id:#x} is still in use by {subscribers} subscriber(s)")]
    StillInUse { family_id: u16, subscribers: usize },
    #[error("naming service failure: {0}")]
    Transport(NamingError),
}

impl From<NamingError> for RegistryError {
    fn from(e: NamingError) -> Self {
        match e {
            NamingError::NameConflict(name) => RegistryError::NameConflict(name),
            NamingError::StillInUse {
                family_id,
                subscribers,
            } => RegistryError::StillInUse {
                family_id,
                subscribers,
            },
            other => RegistryError::Transport(other),
        }
    }
}

/// The two lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Unregistered,
    Registered,
}

// ── Descriptors ───────────────────────────────────────────────────────────────

/// One command of a family: its id, validation policy, and handler.
#[derive(Clone)]
pub struct Operation {
    pub cmd: u8,
    pub policy: AttrPolicy,
    pub handler: Arc<dyn CommandHandler>,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("cmd", &self.cmd)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Everything needed to register a family.
#[derive(Debug, Clone)]
pub struct FamilyDescriptor {
    pub name: String,
    pub version: u8,
    pub max_attr: u16,
    pub operations: Vec<Operation>,
    pub groups: Vec<String>,
}

impl FamilyDescriptor {
    fn validate(&self) -> Result<(), RegistryError> {
        check_name("family", &self.name)?;

        let mut cmds = HashSet::new();
        for op in &self.operations {
            if op.cmd == 0 {
                return Err(RegistryError::InvalidDescriptor(
                    "command id 0 is reserved".to_string(),
                ));
            }
            if !cmds.insert(op.cmd) {
                return Err(RegistryError::InvalidDescriptor(format!(
                    "command {} declared twice",
                    op.cmd
                )));
            }
            if op.policy.max_attr() > self.max_attr {
                return Err(RegistryError::InvalidDescriptor(format!(
                    "policy of command {} accepts ids up to {}, family maximum is {}",
                    op.cmd,
                    op.policy.max_attr(),
                    self.max_attr
                )));
            }
        }

        let mut groups = HashSet::new();
        for group in &self.groups {
            check_name("group", group)?;
            if !groups.insert(group.as_str()) {
                return Err(RegistryError::InvalidDescriptor(format!(
                    "group {group:?} declared twice"
                )));
            }
        }
        Ok(())
    }

    fn advert(&self) -> FamilyAdvert {
        FamilyAdvert {
            name: self.name.clone(),
            version: self.version,
            max_attr: self.max_attr,
            groups: self.groups.clone(),
        }
    }
}

fn check_name(what: &str, name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || name.len() >= FAMILY_NAME_LEN || name.contains('\0') {
        return Err(RegistryError::InvalidDescriptor(format!(
            "{what} name {name:?} must be 1..{FAMILY_NAME_LEN} bytes without NUL"
        )));
    }
    Ok(())
}

// ── Registered family ─────────────────────────────────────────────────────────

/// A registered family. Immutable; shared by the dispatcher and emitter.
#[derive(Debug)]
pub struct Family {
    id: u16,
    name: String,
    version: u8,
    max_attr: u16,
    operations: BTreeMap<u8, Operation>,
    groups: Vec<GroupInfo>,
}

impl Family {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn max_attr(&self) -> u16 {
        self.max_attr
    }

    /// Returns the operation bound to `cmd`.
    pub fn operation(&self, cmd: u8) -> Option<&Operation> {
        self.operations.get(&cmd)
    }

    /// Returns the runtime id of the group called `name`.
    pub fn group_id(&self, name: &str) -> Option<u32> {
        self.groups.iter().find(|g| g.name == name).map(|g| g.id)
    }

    pub fn groups(&self) -> &[GroupInfo] {
        &self.groups
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Owns at most one registered family.
pub struct FamilyRegistry {
    naming: Arc<dyn NamingService>,
    family: RwLock<Option<Arc<Family>>>,
}

impl FamilyRegistry {
    pub fn new(naming: Arc<dyn NamingService>) -> Self {
        Self {
            naming,
            family: RwLock::new(None),
        }
    }

    /// Validates `descriptor`, publishes it, and moves to `Registered`.
    ///
    /// Returns the registered family and the queue its inbound messages
    /// arrive on.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidDescriptor`] if the descriptor is malformed.
    /// - [`RegistryError::AlreadyRegistered`] if this registry is `Registered`.
    /// - [`RegistryError::NameConflict`] if the transport already has a
    ///   family with this name.
    ///
    /// On error the state is unchanged.
    pub async fn register(
        &self,
        descriptor: FamilyDescriptor,
    ) -> Result<(Arc<Family>, mpsc::Receiver<Inbound>), RegistryError> {
        descriptor.validate()?;

        let mut slot = self.family.write().await;
        if slot.is_some() {
            return Err(RegistryError::AlreadyRegistered);
        }

        let publication = self.naming.publish(descriptor.advert()).await?;
        let family = Arc::new(Family {
            id: publication.info.id,
            name: descriptor.name,
            version: descriptor.version,
            max_attr: descriptor.max_attr,
            operations: descriptor
                .operations
                .into_iter()
                .map(|op| (op.cmd, op))
                .collect(),
            groups: publication.info.groups,
        });
        info!(
            "registered family {} v{} as {:#x} with {} group(s)",
            family.name,
            family.version,
            family.id,
            family.groups.len()
        );

        *slot = Some(Arc::clone(&family));
        Ok((family, publication.inbox))
    }

    /// Withdraws the family and moves to `Unregistered`.
    ///
    /// Calling this while already `Unregistered` succeeds and does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::StillInUse`] (or another transport error)
    /// when the naming service refuses. The registry is `Unregistered`
    /// afterwards regardless.
    pub async fn unregister(&self) -> Result<(), RegistryError> {
        let Some(family) = self.family.write().await.take() else {
            return Ok(());
        };

        match self.naming.withdraw(family.id).await {
            Ok(()) => {
                info!("unregistered family {} ({:#x})", family.name, family.id);
                Ok(())
            }
            Err(e) => {
                warn!("failed to unregister family {}: {e}", family.name);
                Err(e.into())
            }
        }
    }

    pub async fn state(&self) -> RegistryState {
        if self.family.read().await.is_some() {
            RegistryState::Registered
        } else {
            RegistryState::Unregistered
        }
    }

    /// Returns the registered family, if any.
    pub async fn family(&self) -> Option<Arc<Family>> {
        self.family.read().await.clone()
    }
}
