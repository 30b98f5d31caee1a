use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::link::channel::{spawn_worker, CommandChannel};
use crate::link::manager::ConnectionManager;
use crate::link::models::{Command, LinkConfig, LinkState, LinkStatus, SubmitOutcome};
use crate::link::Result;
use crate::serial::{Reply, SerialTransport, Transport};

/// Facade over the connection manager and command channel: one value
/// to hold on to, submit through, and observe.
///
/// Construction spawns the worker and supervisor tasks but does not
/// open the link; call [`SerialBridge::open`] (or use
/// [`SerialBridge::connect`]) for that.
pub struct SerialBridge {
    manager: Arc<ConnectionManager>,
    channel: CommandChannel,
    default_timeout: Duration,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SerialBridge {
    /// Bridge over the configured serial endpoint
    pub fn new(config: LinkConfig) -> Self {
        let transport = SerialTransport::new(config.endpoint.as_str(), config.baud_rate);
        Self::with_transport(Box::new(transport), config)
    }

    /// Bridge over any transport; tests hand a `MockTransport` in here
    pub fn with_transport(transport: Box<dyn Transport>, config: LinkConfig) -> Self {
        let transport = Arc::new(Mutex::new(transport));
        let cancel = CancellationToken::new();
        let manager =
            ConnectionManager::new(Arc::clone(&transport), config.retry_floor, config.retry_cap);
        let supervisor = manager.spawn_supervisor(cancel.clone());
        let (channel, worker) = spawn_worker(transport, Arc::clone(&manager), cancel.clone());

        Self {
            manager,
            channel,
            default_timeout: config.command_timeout,
            cancel,
            tasks: vec![supervisor, worker],
        }
    }

    /// Build and open in one step
    pub async fn connect(config: LinkConfig) -> Result<Self> {
        let bridge = Self::new(config);
        bridge.open().await?;
        Ok(bridge)
    }

    /// Establish the link. No-op when already connected; on failure the
    /// background retry loop keeps trying.
    pub async fn open(&self) -> Result<()> {
        self.manager.open().await
    }

    /// Submit one command and wait for its reply or failure
    pub async fn submit(&self, command: Command) -> Result<Reply> {
        self.channel.submit(command).await
    }

    /// Submit preformatted text and get the serializable outcome shape.
    /// `timeout` falls back to the configured default.
    pub async fn submit_command(&self, payload: &str, timeout: Option<Duration>) -> SubmitOutcome {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let command = Command::with_timeout(payload, timeout);
        self.submit(command).await.into()
    }

    pub fn link_state(&self) -> LinkState {
        self.manager.state()
    }

    pub fn status(&self) -> LinkStatus {
        self.manager.status()
    }

    /// Watch link status transitions without polling
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.manager.subscribe()
    }

    /// Close the link administratively. Idempotent. The bridge stays
    /// usable; a later open reconnects.
    pub async fn close_link(&self) {
        self.manager.close().await
    }

    /// Close the link and tear down the worker and supervisor tasks
    pub async fn shutdown(mut self) {
        self.manager.close().await;
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for SerialBridge {
    fn drop(&mut self) {
        // Tasks hold no caller resources; cancelling is enough
        self.cancel.cancel();
    }
}
