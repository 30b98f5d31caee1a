use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};

use super::transport::Transport;
use super::{Result, SerialError};

/// Poll interval while waiting for forged input
const POLL_TICK: Duration = Duration::from_millis(5);

/// Scripted behavior for one accepted write, consumed in order.
/// Writes beyond the end of the script are accepted silently.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Answer immediately with `line` (terminator appended)
    Reply(String),
    /// Answer with `line` after `delay`
    ReplyAfter(String, Duration),
    /// Answer with raw byte chunks, each delayed relative to the last.
    /// Terminators are the script's responsibility.
    Chunks(Vec<(Vec<u8>, Duration)>),
    /// Accept the write and never answer
    Silence,
    /// Fail the write itself with an IO error
    WriteError(String),
    /// Accept the write, then fail the next read with an IO error
    ReadError(String),
}

struct Staged {
    bytes: Vec<u8>,
    ready_at: Instant,
}

#[derive(Default)]
struct MockState {
    open: bool,
    open_attempts: usize,
    fail_opens: usize,
    script: VecDeque<MockBehavior>,
    staged: VecDeque<Staged>,
    read_error: Option<String>,
    writes: Vec<String>,
}

/// In-memory `Transport` double driven by a behavior script. Tests
/// keep a `MockHandle` to the shared state after the transport itself
/// moves into the bridge.
pub struct MockTransport {
    endpoint: String,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn scripted(behaviors: impl IntoIterator<Item = MockBehavior>) -> Self {
        let transport = Self::new();
        {
            let mut state = lock_state(&transport.state);
            state.script.extend(behaviors);
        }
        transport
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable view into a `MockTransport`'s shared state
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Append one behavior to the script
    pub fn script(&self, behavior: MockBehavior) {
        lock_state(&self.state).script.push_back(behavior);
    }

    /// Everything written so far, one entry per write, terminators
    /// stripped
    pub fn writes(&self) -> Vec<String> {
        lock_state(&self.state).writes.clone()
    }

    /// Inject an unsolicited line, available to read immediately
    pub fn forge_line(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        stage_bytes(&mut lock_state(&self.state), bytes, Duration::ZERO);
    }

    /// Inject raw bytes that become readable after `delay`
    pub fn forge_bytes(&self, bytes: &[u8], delay: Duration) {
        stage_bytes(&mut lock_state(&self.state), bytes.to_vec(), delay);
    }

    /// Make the next `n` open calls fail
    pub fn set_fail_opens(&self, n: usize) {
        lock_state(&self.state).fail_opens = n;
    }

    pub fn open_attempts(&self) -> usize {
        lock_state(&self.state).open_attempts
    }

    pub fn is_open(&self) -> bool {
        lock_state(&self.state).open
    }

    /// Bytes staged for reading that nothing has consumed yet
    pub fn staged_bytes(&self) -> usize {
        lock_state(&self.state)
            .staged
            .iter()
            .map(|chunk| chunk.bytes.len())
            .sum()
    }
}

fn lock_state(state: &Arc<Mutex<MockState>>) -> MutexGuard<'_, MockState> {
    state.lock().expect("mock transport state poisoned")
}

fn stage_bytes(state: &mut MockState, bytes: Vec<u8>, delay: Duration) {
    state.staged.push_back(Staged {
        bytes,
        ready_at: Instant::now() + delay,
    });
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<()> {
        let mut state = lock_state(&self.state);
        state.open_attempts += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(SerialError::OpenFailed {
                endpoint: self.endpoint.clone(),
                detail: "Scripted open failure".to_string(),
            });
        }
        state.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = lock_state(&self.state);
        state.open = false;
        state.staged.clear();
        state.read_error = None;
    }

    fn is_open(&self) -> bool {
        lock_state(&self.state).open
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = lock_state(&self.state);
        if !state.open {
            return Err(SerialError::Closed);
        }

        let text = String::from_utf8_lossy(bytes)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        state.writes.push(text);

        match state.script.pop_front() {
            None | Some(MockBehavior::Silence) => Ok(()),
            Some(MockBehavior::Reply(line)) => {
                let mut bytes = line.into_bytes();
                bytes.push(b'\n');
                stage_bytes(&mut state, bytes, Duration::ZERO);
                Ok(())
            }
            Some(MockBehavior::ReplyAfter(line, delay)) => {
                let mut bytes = line.into_bytes();
                bytes.push(b'\n');
                stage_bytes(&mut state, bytes, delay);
                Ok(())
            }
            Some(MockBehavior::Chunks(chunks)) => {
                let mut at = Duration::ZERO;
                for (bytes, delay) in chunks {
                    at += delay;
                    stage_bytes(&mut state, bytes, at);
                }
                Ok(())
            }
            Some(MockBehavior::WriteError(detail)) => Err(SerialError::IoError(
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, detail),
            )),
            Some(MockBehavior::ReadError(detail)) => {
                state.read_error = Some(detail);
                Ok(())
            }
        }
    }

    async fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize> {
        enum Wake {
            Data(usize),
            At(Instant),
            Idle,
        }

        let deadline = Instant::now() + wait;
        loop {
            let wake = {
                let mut state = lock_state(&self.state);
                if !state.open {
                    return Err(SerialError::Closed);
                }
                if let Some(detail) = state.read_error.take() {
                    return Err(SerialError::IoError(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        detail,
                    )));
                }

                let now = Instant::now();
                match state.staged.front() {
                    Some(chunk) if chunk.ready_at <= now => {
                        let mut chunk = match state.staged.pop_front() {
                            Some(chunk) => chunk,
                            None => continue,
                        };
                        let n = chunk.bytes.len().min(buf.len());
                        buf[..n].copy_from_slice(&chunk.bytes[..n]);
                        if n < chunk.bytes.len() {
                            chunk.bytes.drain(..n);
                            state.staged.push_front(chunk);
                        }
                        Wake::Data(n)
                    }
                    Some(chunk) => Wake::At(chunk.ready_at),
                    None => Wake::Idle,
                }
            };

            match wake {
                Wake::Data(n) => return Ok(n),
                Wake::At(ready_at) => {
                    if Instant::now() >= deadline {
                        return Err(SerialError::Timeout);
                    }
                    sleep_until(ready_at.min(deadline)).await;
                }
                Wake::Idle => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SerialError::Timeout);
                    }
                    // Forged input may appear while we wait, so poll
                    sleep_until((now + POLL_TICK).min(deadline)).await;
                }
            }
        }
    }

    async fn discard_input(&mut self) -> Result<usize> {
        let mut state = lock_state(&self.state);
        if !state.open {
            return Err(SerialError::Closed);
        }

        // Only bytes that have "arrived" are in the OS buffer; chunks
        // still in flight survive a drain
        let now = Instant::now();
        let mut dropped = 0;
        while matches!(state.staged.front(), Some(chunk) if chunk.ready_at <= now) {
            if let Some(chunk) = state.staged.pop_front() {
                dropped += chunk.bytes.len();
            }
        }
        Ok(dropped)
    }
}
