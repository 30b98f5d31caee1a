use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::serial::transport::DEFAULT_BAUD_RATE;
use crate::serial::{Reply, ReplyKind};

use super::BridgeError;

/// Default Bluetooth RFCOMM binding for the HC-05 module
pub const DEFAULT_ENDPOINT: &str = "/dev/rfcomm0";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_FLOOR: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_CAP: Duration = Duration::from_secs(30);

/// Link lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Faulted => "faulted",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot published on the state watch.
///
/// `generation` increments once per successful open, so consumers can
/// tell a reconnected link from one that never moved even when the
/// watch coalesces intermediate states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkStatus {
    pub state: LinkState,
    pub generation: u64,
    /// Detail of the most recent fault, cleared on successful open
    pub fault: Option<String>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            generation: 0,
            fault: None,
        }
    }
}

/// One caller command: preformatted payload text plus its reply budget.
/// The budget runs from submission, so time spent queued behind other
/// commands counts against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub payload: String,
    pub submitted_at: DateTime<Utc>,
    pub timeout: Duration,
}

impl Command {
    pub fn new(payload: impl Into<String>) -> Self {
        Self::with_timeout(payload, DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_timeout(payload: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: payload.into(),
            submitted_at: Utc::now(),
            timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub endpoint: String,
    pub baud_rate: u32,
    /// Default reply budget for `submit_command` callers
    pub command_timeout: Duration,
    /// First reconnect delay; doubles per failed attempt
    pub retry_floor: Duration,
    /// Reconnect delay ceiling
    pub retry_cap: Duration,
}

impl LinkConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            retry_floor: DEFAULT_RETRY_FLOOR,
            retry_cap: DEFAULT_RETRY_CAP,
        }
    }
}

/// Serializable submit outcome for request-driven callers (HTTP
/// handlers and the like) that want a JSON-shaped answer instead of a
/// Result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub success: bool,
    pub reply: Option<String>,
    pub parsed: Option<ReplyKind>,
    pub error: Option<OutcomeError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeError {
    pub kind: String,
    pub message: String,
}

impl SubmitOutcome {
    pub fn ok(reply: Reply) -> Self {
        let parsed = match reply.kind {
            ReplyKind::Unrecognized => None,
            kind => Some(kind),
        };
        Self {
            success: true,
            reply: Some(reply.raw),
            parsed,
            error: None,
        }
    }

    pub fn fail(error: &BridgeError) -> Self {
        Self {
            success: false,
            reply: None,
            parsed: None,
            error: Some(OutcomeError {
                kind: error.kind().to_string(),
                message: error.to_string(),
            }),
        }
    }
}

impl From<super::Result<Reply>> for SubmitOutcome {
    fn from(result: super::Result<Reply>) -> Self {
        match result {
            Ok(reply) => SubmitOutcome::ok(reply),
            Err(error) => SubmitOutcome::fail(&error),
        }
    }
}
