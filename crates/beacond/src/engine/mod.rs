//! Discovery engine: lifecycle around one announce/receive worker.
//!
//! `Engine::start` validates the configuration, opens the transport, draws a
//! fresh `PeerId` and spawns the worker. Callers interact only with the
//! registry (`list_discovered`) and the outgoing payload (`set_user_data`);
//! neither touches the socket.

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use beacon_core::{ConfigError, DiscoveredPeer, EngineConfig, PeerId};
use beacon_services::{Registry, RegistryPolicy};

use crate::transport::{Transport, UdpTransport};

mod worker;

use worker::Worker;

/// Lifecycle of an engine's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to open transport: {0:#}")]
    Transport(anyhow::Error),
    #[error("engine must be started from within a Tokio runtime")]
    NoRuntime,
}

/// A running discovery engine.
///
/// Dropping the engine signals the worker to stop without waiting for it.
pub struct Engine {
    peer_id: PeerId,
    registry: Registry,
    user_data: watch::Sender<Bytes>,
    state: watch::Receiver<EngineState>,
    shutdown: broadcast::Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl Engine {
    /// Start an engine on a UDP transport built from `config`.
    ///
    /// Fails with `EngineError::NoRuntime` outside a Tokio runtime.
    pub fn start(config: EngineConfig, user_data: impl Into<Bytes>) -> Result<Self, EngineError> {
        config.validate()?;
        Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let transport = UdpTransport::open(&config).map_err(EngineError::Transport)?;
        Self::start_with_transport(config, user_data, transport)
    }

    /// Start an engine on an already-open transport.
    ///
    /// Fails with `EngineError::NoRuntime` outside a Tokio runtime.
    pub fn start_with_transport<T: Transport>(
        config: EngineConfig,
        user_data: impl Into<Bytes>,
        transport: T,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let peer_id = PeerId::random();
        let registry = Registry::new(RegistryPolicy::from_config(&config, peer_id));
        let (user_data_tx, user_data_rx) = watch::channel(user_data.into());
        let (state_tx, state_rx) = watch::channel(EngineState::Starting);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tracing::info!(
            %peer_id,
            port = config.port,
            application_id = config.application_id,
            can_discover = config.can_discover,
            can_be_discovered = config.can_be_discovered,
            "engine starting"
        );

        let worker = Worker::new(
            config,
            transport,
            registry.clone(),
            peer_id,
            user_data_rx,
            state_tx,
            shutdown_rx,
        );
        let handle = runtime.spawn(worker.run());

        Ok(Self {
            peer_id,
            registry,
            user_data: user_data_tx,
            state: state_rx,
            shutdown: shutdown_tx,
            worker: Some(handle),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Replace the payload carried by future announcements.
    ///
    /// Takes effect on the next scheduled send, not immediately.
    pub fn set_user_data(&self, user_data: impl Into<Bytes>) {
        let user_data = user_data.into();
        tracing::debug!(bytes = user_data.len(), "user data replaced");
        self.user_data.send_replace(user_data);
    }

    /// Copy of the peers currently considered present.
    pub fn list_discovered(&self) -> Vec<DiscoveredPeer> {
        self.registry.snapshot()
    }

    /// Signal the worker to stop.
    ///
    /// With `wait`, returns once the worker has sent its leave beacon and
    /// closed the transport. Otherwise the worker finishes on its own.
    pub async fn stop(mut self, wait: bool) {
        let _ = self.shutdown.send(());
        let Some(worker) = self.worker.take() else {
            return;
        };
        if wait {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "engine worker failed");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}
