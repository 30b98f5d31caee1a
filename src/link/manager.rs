use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::serial::Transport;

use super::models::{LinkState, LinkStatus};
use super::BridgeError;

/// Exponential retry delay: the floor doubles per failed attempt up to
/// the cap. Attempts count from 1.
pub(crate) fn retry_delay(attempt: u32, floor: Duration, cap: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    floor.saturating_mul(1u32 << shift).min(cap)
}

enum OpenOutcome {
    Connected,
    /// A concurrent close won the race; the attempt was dropped
    Aborted,
    Failed(String),
}

/// Owns the link state machine and the transport lifecycle.
///
/// State is published through a watch channel so the command worker
/// and outside observers see transitions without polling. The
/// transport itself is shared with the worker behind a mutex; holding
/// that lock is what serializes reconnects against in-flight
/// exchanges.
pub struct ConnectionManager {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    status_tx: watch::Sender<LinkStatus>,
    retry_floor: Duration,
    retry_cap: Duration,
}

impl ConnectionManager {
    pub(crate) fn new(
        transport: Arc<Mutex<Box<dyn Transport>>>,
        retry_floor: Duration,
        retry_cap: Duration,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(LinkStatus::default());
        Arc::new(Self {
            transport,
            status_tx,
            retry_floor,
            retry_cap,
        })
    }

    pub fn status(&self) -> LinkStatus {
        self.status_tx.borrow().clone()
    }

    pub fn state(&self) -> LinkState {
        self.status_tx.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status_tx.subscribe()
    }

    /// Establish the link. A no-op when already connected; on failure
    /// the link is left faulted and the supervisor takes over retries.
    pub async fn open(&self) -> super::Result<()> {
        if self.state().is_connected() {
            return Ok(());
        }
        match self.attempt_open().await {
            OpenOutcome::Connected => Ok(()),
            OpenOutcome::Aborted => Err(BridgeError::LinkClosed),
            OpenOutcome::Failed(detail) => Err(BridgeError::LinkUnavailable(detail)),
        }
    }

    /// Close the link administratively. Idempotent; the supervisor
    /// stops retrying until the next explicit open.
    pub async fn close(&self) {
        let mut previous = LinkState::Disconnected;
        self.status_tx.send_modify(|status| {
            previous = status.state;
            status.state = LinkState::Disconnected;
            status.fault = None;
        });
        if previous != LinkState::Disconnected {
            log::info!("Link closed");
        }

        let mut transport = self.transport.lock().await;
        if transport.is_open() {
            transport.close().await;
        }
    }

    /// Fail the link from the data path. Closes the dead transport and
    /// leaves the supervisor to reconnect. A concurrent close wins.
    pub(crate) async fn report_fault(&self, detail: &str) {
        let mut faulted = false;
        self.status_tx.send_modify(|status| {
            if matches!(status.state, LinkState::Connected | LinkState::Connecting) {
                status.state = LinkState::Faulted;
                status.fault = Some(detail.to_string());
                faulted = true;
            }
        });
        if faulted {
            log::error!("Link fault: {}", detail);
            let mut transport = self.transport.lock().await;
            transport.close().await;
        }
    }

    /// One Connecting -> Connected/Faulted attempt. The commit happens
    /// inside `send_modify` so a close that raced the open is observed
    /// and the freshly opened transport dropped instead of leaked.
    async fn attempt_open(&self) -> OpenOutcome {
        let mut entered = false;
        self.status_tx.send_modify(|status| {
            if status.state != LinkState::Connected {
                status.state = LinkState::Connecting;
                entered = true;
            }
        });
        if !entered {
            return OpenOutcome::Connected;
        }

        let mut transport = self.transport.lock().await;
        match transport.open().await {
            Ok(()) => {
                let mut outcome = OpenOutcome::Aborted;
                self.status_tx.send_modify(|status| match status.state {
                    LinkState::Connecting => {
                        status.state = LinkState::Connected;
                        status.generation += 1;
                        status.fault = None;
                        outcome = OpenOutcome::Connected;
                    }
                    LinkState::Connected => outcome = OpenOutcome::Connected,
                    _ => outcome = OpenOutcome::Aborted,
                });
                if matches!(outcome, OpenOutcome::Connected) {
                    let generation = self.status_tx.borrow().generation;
                    log::info!(
                        "Link up on {} (generation {})",
                        transport.endpoint(),
                        generation
                    );
                } else {
                    transport.close().await;
                }
                outcome
            }
            Err(e) => {
                transport.close().await;
                let detail = e.to_string();
                self.status_tx.send_modify(|status| {
                    if status.state == LinkState::Connecting {
                        status.state = LinkState::Faulted;
                        status.fault = Some(detail.clone());
                    }
                });
                OpenOutcome::Failed(detail)
            }
        }
    }

    /// Background reconnect loop: waits out the backoff whenever the
    /// link is faulted, then retries. Close and shutdown both stop it.
    pub(crate) fn spawn_supervisor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.supervise(cancel).await;
            log::debug!("Link supervisor stopped");
        })
    }

    async fn supervise(&self, cancel: CancellationToken) {
        let mut status_rx = self.status_tx.subscribe();
        let mut attempt: u32 = 0;

        loop {
            let state = status_rx.borrow_and_update().state;

            if state != LinkState::Faulted {
                if matches!(state, LinkState::Connected | LinkState::Disconnected) {
                    attempt = 0;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = status_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            attempt += 1;
            let delay = retry_delay(attempt, self.retry_floor, self.retry_cap);
            log::info!("Link retry {} in {:?}", attempt, delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                changed = status_rx.changed() => {
                    // A close during backoff cancels the retry
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            if self.status_tx.borrow().state != LinkState::Faulted {
                continue;
            }

            match self.attempt_open().await {
                OpenOutcome::Connected | OpenOutcome::Aborted => attempt = 0,
                OpenOutcome::Failed(detail) => {
                    log::warn!("Link retry {} failed: {}", attempt, detail);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::retry_delay;
    use std::time::Duration;

    #[test]
    fn delay_doubles_from_floor() {
        let floor = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert_eq!(retry_delay(1, floor, cap), Duration::from_secs(1));
        assert_eq!(retry_delay(2, floor, cap), Duration::from_secs(2));
        assert_eq!(retry_delay(3, floor, cap), Duration::from_secs(4));
        assert_eq!(retry_delay(5, floor, cap), Duration::from_secs(16));
    }

    #[test]
    fn delay_is_capped() {
        let floor = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert_eq!(retry_delay(6, floor, cap), Duration::from_secs(30));
        assert_eq!(retry_delay(7, floor, cap), Duration::from_secs(30));
        assert_eq!(retry_delay(1000, floor, cap), Duration::from_secs(30));
    }

    #[test]
    fn delay_never_decreases() {
        let floor = Duration::from_millis(100);
        let cap = Duration::from_secs(30);
        let mut last = Duration::ZERO;
        for attempt in 1..64 {
            let delay = retry_delay(attempt, floor, cap);
            assert!(delay >= last, "attempt {} shrank the delay", attempt);
            last = delay;
        }
    }

    #[test]
    fn tiny_floor_scales_for_tests() {
        let floor = Duration::from_millis(20);
        let cap = Duration::from_millis(80);
        assert_eq!(retry_delay(1, floor, cap), Duration::from_millis(20));
        assert_eq!(retry_delay(2, floor, cap), Duration::from_millis(40));
        assert_eq!(retry_delay(3, floor, cap), Duration::from_millis(80));
        assert_eq!(retry_delay(4, floor, cap), Duration::from_millis(80));
    }
}
