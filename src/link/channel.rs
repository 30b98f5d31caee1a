use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::serial::{parse_reply, LineFramer, Reply, SerialError, Transport};

use super::manager::ConnectionManager;
use super::models::{Command, LinkState, LinkStatus};
use super::BridgeError;

/// Submission queue depth. Waiting for space counts against the
/// command's own deadline.
pub(crate) const QUEUE_CAPACITY: usize = 64;
/// Caller-side slack past the command deadline. The worker enforces
/// the real deadline; this only covers hand-off overhead.
const REPLY_GRACE: Duration = Duration::from_millis(500);

struct Submission {
    command: Command,
    deadline: Instant,
    reply_tx: oneshot::Sender<super::Result<Reply>>,
}

/// Cloneable submission handle. All commands funnel through one worker
/// task, which gives strict FIFO order and exactly one command on the
/// wire at a time without any extra locking in callers.
#[derive(Clone)]
pub struct CommandChannel {
    submit_tx: mpsc::Sender<Submission>,
}

impl CommandChannel {
    /// Submit one command and wait for its reply or failure. Safe to
    /// call from any number of tasks; commands go out in send order.
    pub async fn submit(&self, command: Command) -> super::Result<Reply> {
        validate_payload(&command.payload)?;

        let budget = command.timeout;
        let deadline = Instant::now() + budget;
        let (reply_tx, reply_rx) = oneshot::channel();
        let submission = Submission {
            command,
            deadline,
            reply_tx,
        };

        let exchange = async {
            self.submit_tx
                .send(submission)
                .await
                .map_err(|_| BridgeError::LinkClosed)?;
            match reply_rx.await {
                Ok(result) => result,
                Err(_) => Err(BridgeError::LinkClosed),
            }
        };

        match timeout(budget + REPLY_GRACE, exchange).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(budget)),
        }
    }
}

fn validate_payload(payload: &str) -> super::Result<()> {
    if payload.trim().is_empty() {
        return Err(BridgeError::InvalidCommand("Empty command".to_string()));
    }
    if payload.contains(['\n', '\r']) {
        return Err(BridgeError::InvalidCommand(
            "Payload contains a line terminator".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn spawn_worker(
    transport: Arc<Mutex<Box<dyn Transport>>>,
    manager: Arc<ConnectionManager>,
    cancel: CancellationToken,
) -> (CommandChannel, JoinHandle<()>) {
    let (submit_tx, submit_rx) = mpsc::channel(QUEUE_CAPACITY);
    let worker = Worker {
        transport,
        manager,
        framer: LineFramer::new(),
        generation: 0,
    };
    let handle = tokio::spawn(worker.run(submit_rx, cancel));
    (CommandChannel { submit_tx }, handle)
}

struct Worker {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    manager: Arc<ConnectionManager>,
    framer: LineFramer,
    /// Link generation the framer state belongs to
    generation: u64,
}

enum ExchangeOutcome {
    Replied(Reply),
    TimedOut,
    /// Fault detected on the wire; the manager has not been told yet
    Fault(String),
    /// The link state left Connected while we waited
    Aborted(LinkStatus),
}

impl Worker {
    async fn run(mut self, mut submit_rx: mpsc::Receiver<Submission>, cancel: CancellationToken) {
        let mut status_rx = self.manager.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = submit_rx.recv() => match next {
                    Some(submission) => self.serve(submission, &mut status_rx).await,
                    None => break,
                },
            }
        }
        log::debug!("Command worker stopped");
    }

    /// Serve one queued command start to finish. Exactly one of these
    /// runs at a time, so the reply on the wire always belongs to the
    /// command just written.
    async fn serve(&mut self, submission: Submission, status_rx: &mut watch::Receiver<LinkStatus>) {
        let Submission {
            command,
            deadline,
            reply_tx,
        } = submission;

        if reply_tx.is_closed() {
            log::debug!("Dropping abandoned command {}", command.id);
            return;
        }
        if Instant::now() >= deadline {
            // Budget spent while queued; the link never saw this one
            let _ = reply_tx.send(Err(BridgeError::Timeout(command.timeout)));
            return;
        }

        let status = status_rx.borrow_and_update().clone();
        if !status.state.is_connected() {
            let detail = match &status.fault {
                Some(fault) => format!("Link is {} ({})", status.state, fault),
                None => format!("Link is {}", status.state),
            };
            let _ = reply_tx.send(Err(BridgeError::LinkUnavailable(detail)));
            return;
        }
        if status.generation != self.generation {
            // Reconnected since the last exchange; buffered bytes
            // belong to the old link
            self.framer.reset();
            self.generation = status.generation;
        }

        log::debug!("Command {} -> {}", command.id, command.payload);
        let outcome = {
            let mut transport = self.transport.lock().await;
            exchange(
                &mut self.framer,
                transport.as_mut(),
                &command,
                deadline,
                status_rx,
            )
            .await
        };

        // The transport lock is released before the fault report,
        // which takes it again to close the port
        match outcome {
            ExchangeOutcome::Replied(reply) => {
                log::debug!("Command {} <- {}", command.id, reply.raw);
                let _ = reply_tx.send(Ok(reply));
            }
            ExchangeOutcome::TimedOut => {
                log::warn!(
                    "Command {} got no reply within {:?}",
                    command.id,
                    command.timeout
                );
                let _ = reply_tx.send(Err(BridgeError::Timeout(command.timeout)));
            }
            ExchangeOutcome::Fault(detail) => {
                self.manager.report_fault(&detail).await;
                // An administrative close can land between the status
                // check and the transport lock and close the port under
                // us; the caller then sees the close, not a fault
                let error = if self.manager.state() == LinkState::Disconnected {
                    BridgeError::LinkClosed
                } else {
                    BridgeError::LinkError(detail)
                };
                let _ = reply_tx.send(Err(error));
            }
            ExchangeOutcome::Aborted(status) => {
                let error = match status.state {
                    LinkState::Disconnected => BridgeError::LinkClosed,
                    LinkState::Faulted => BridgeError::LinkError(
                        status.fault.unwrap_or_else(|| "Link faulted".to_string()),
                    ),
                    _ => BridgeError::LinkError("Link reset during exchange".to_string()),
                };
                let _ = reply_tx.send(Err(error));
            }
        }
    }
}

/// One write plus one framed reply against the locked transport.
/// Watches the link state on the side so an administrative close does
/// not leave the caller hanging until the deadline.
async fn exchange(
    framer: &mut LineFramer,
    transport: &mut dyn Transport,
    command: &Command,
    deadline: Instant,
    status_rx: &mut watch::Receiver<LinkStatus>,
) -> ExchangeOutcome {
    // Stale input left by a timed-out exchange must not get attributed
    // to this command
    match framer.discard_pending(transport).await {
        Ok(0) => {}
        Ok(n) => log::debug!("Discarded {} stale bytes before command {}", n, command.id),
        Err(e) => return ExchangeOutcome::Fault(e.to_string()),
    }

    if let Err(e) = framer.write_line(transport, &command.payload).await {
        return ExchangeOutcome::Fault(e.to_string());
    }

    loop {
        tokio::select! {
            line = framer.read_line(transport, deadline) => {
                return match line {
                    Ok(line) => ExchangeOutcome::Replied(parse_reply(&line)),
                    Err(SerialError::Timeout) => ExchangeOutcome::TimedOut,
                    Err(e) => ExchangeOutcome::Fault(e.to_string()),
                };
            }
            changed = status_rx.changed() => {
                match changed {
                    Ok(()) => {
                        let status = status_rx.borrow_and_update().clone();
                        if !status.state.is_connected() {
                            return ExchangeOutcome::Aborted(status);
                        }
                        // Spurious wake (fault detail refresh); keep waiting
                    }
                    Err(_) => return ExchangeOutcome::Aborted(status_rx.borrow().clone()),
                }
            }
        }
    }
}
