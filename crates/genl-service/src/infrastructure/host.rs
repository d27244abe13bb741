//! ServiceHost: wires the bus, registry, trigger, dispatcher, and listener
//! together and owns their lifecycle.
//!
//! Startup order is trigger, then family registration, then the client
//! listener, so the trigger exists before the family is advertised and no
//! client can connect before the family is resolvable. Shutdown runs the
//! other way round: listener, unregister, trigger.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::dispatcher::CommandDispatcher;
use crate::application::echo::family_descriptor;
use crate::application::emitter::BroadcastEmitter;
use crate::application::registry::{FamilyRegistry, RegistryError};
use crate::application::transport::{FrameTransport, Inbound};
use crate::infrastructure::bus::MessageBus;
use crate::infrastructure::config::{ConfigError, ServiceConfig};
use crate::infrastructure::listener::{ListenerError, SocketListener};
use crate::infrastructure::trigger::{PingTrigger, TriggerSocket};

/// How long shutdown waits for in-flight requests before aborting dispatch.
const DISPATCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Error type for service startup.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to create ping trigger: {0}")]
    Trigger(#[source] ListenerError),
    #[error("failed to register family: {0}")]
    Registry(#[from] RegistryError),
    #[error("failed to start client listener: {0}")]
    Listener(#[source] ListenerError),
}

struct Running {
    listener: SocketListener,
    trigger_socket: TriggerSocket,
    dispatch: JoinHandle<()>,
}

/// A running genltest service.
pub struct ServiceHost {
    config: ServiceConfig,
    bus: Arc<MessageBus>,
    registry: Arc<FamilyRegistry>,
    trigger: Arc<PingTrigger>,
    running: Mutex<Option<Running>>,
}

impl ServiceHost {
    /// Starts the service described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] naming the step that failed. Steps already
    /// completed are undone before returning.
    pub async fn start(config: ServiceConfig) -> Result<Self, HostError> {
        config.validate()?;

        let bus = Arc::new(MessageBus::new(config.queue_depth));
        let registry = Arc::new(FamilyRegistry::new(bus.clone()));
        let emitter = BroadcastEmitter::new(Arc::clone(&registry), bus.clone());
        let trigger = Arc::new(PingTrigger::new(emitter, config.msg_max_len));

        let trigger_socket = TriggerSocket::bind(&config.trigger_path, Arc::clone(&trigger))
            .map_err(HostError::Trigger)?;

        let (family, inbox) = match registry.register(family_descriptor()).await {
            Ok(registered) => registered,
            Err(e) => {
                error!("failed to register family: {e}");
                trigger_socket.shutdown().await;
                bus.close().await;
                return Err(e.into());
            }
        };

        let dispatch = tokio::spawn(dispatch_loop(
            CommandDispatcher::new(family),
            inbox,
            bus.clone(),
        ));

        let listener = match SocketListener::bind(&config.socket_path, Arc::clone(&bus)) {
            Ok(listener) => listener,
            Err(e) => {
                error!("failed to start client listener: {e}");
                if let Err(e) = registry.unregister().await {
                    warn!("rollback left family registered: {e}");
                }
                trigger_socket.shutdown().await;
                stop_dispatch(dispatch).await;
                bus.close().await;
                return Err(HostError::Listener(e));
            }
        };

        info!(
            "genltest service started: sessions on {}, trigger on {}",
            config.socket_path.display(),
            config.trigger_path.display()
        );
        Ok(Self {
            config,
            bus,
            registry,
            trigger,
            running: Mutex::new(Some(Running {
                listener,
                trigger_socket,
                dispatch,
            })),
        })
    }

    /// Tears the service down in reverse startup order. Later calls do
    /// nothing.
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.listener.shutdown().await;
        if let Err(e) = self.registry.unregister().await {
            error!("family still registered at shutdown: {e}");
        }
        running.trigger_socket.shutdown().await;
        stop_dispatch(running.dispatch).await;
        self.bus.close().await;
        info!("genltest service stopped");
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<FamilyRegistry> {
        &self.registry
    }

    pub fn trigger(&self) -> &Arc<PingTrigger> {
        &self.trigger
    }
}

/// Waits for the dispatch loop to drain. It ends on its own once the
/// family's inbox closes; if unregistration failed the inbox stays open and
/// the loop is aborted.
async fn stop_dispatch(mut dispatch: JoinHandle<()>) {
    if tokio::time::timeout(DISPATCH_DRAIN_TIMEOUT, &mut dispatch)
        .await
        .is_err()
    {
        warn!("dispatch loop still running after {DISPATCH_DRAIN_TIMEOUT:?}; aborting");
        dispatch.abort();
    }
}

/// Serves the family inbox: dispatch each message, unicast any reply.
/// Failures are logged and the message is dropped.
async fn dispatch_loop(
    dispatcher: CommandDispatcher,
    mut inbox: mpsc::Receiver<Inbound>,
    transport: Arc<dyn FrameTransport>,
) {
    while let Some(Inbound { bytes, sender }) = inbox.recv().await {
        match dispatcher.on_receive(&bytes, sender) {
            Ok(Some(reply)) => match transport.unicast(sender, reply).await {
                Ok(()) => info!("reply sent to port {sender}"),
                Err(e) => warn!("failed to send reply to port {sender}: {e}"),
            },
            Ok(None) => debug!("request from port {sender} produced no reply"),
            Err(e) => warn!("dropping message from port {sender}: {e}"),
        }
    }
    debug!("family inbox closed; dispatch loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::RegistryState;

    fn config_in(dir: &std::path::Path) -> ServiceConfig {
        ServiceConfig {
            socket_path: dir.join("service.sock"),
            trigger_path: dir.join("ping.sock"),
            ..ServiceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_registers_family_and_creates_both_sockets() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        // Act
        let host = ServiceHost::start(config.clone()).await.unwrap();

        // Assert
        assert_eq!(host.registry().state().await, RegistryState::Registered);
        assert!(config.socket_path.exists());
        assert!(config.trigger_path.exists());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_removes_sockets() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let host = ServiceHost::start(config.clone()).await.unwrap();

        // Act
        host.shutdown().await;
        host.shutdown().await;

        // Assert
        assert_eq!(host.registry().state().await, RegistryState::Unregistered);
        tokio_test::assert_ok!(host.registry().unregister().await);
        assert!(!config.socket_path.exists());
        assert!(!config.trigger_path.exists());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            queue_depth: 0,
            ..config_in(dir.path())
        };

        let result = ServiceHost::start(config).await;

        assert!(matches!(result, Err(HostError::Config(_))));
    }

    #[tokio::test]
    async fn test_listener_failure_rolls_back_registration_and_trigger() {
        // Arrange – the socket's parent directory does not exist
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            socket_path: dir.path().join("missing").join("service.sock"),
            ..config_in(dir.path())
        };

        // Act
        let result = ServiceHost::start(config.clone()).await;

        // Assert
        assert!(matches!(result, Err(HostError::Listener(_))));
        assert!(!config.trigger_path.exists());
    }
}
