pub mod channel;
pub mod manager;
pub mod models;

pub use channel::CommandChannel;
pub use manager::ConnectionManager;
pub use models::{Command, LinkConfig, LinkState, LinkStatus, OutcomeError, SubmitOutcome};

use std::time::Duration;

/// Caller-facing failure taxonomy. The variants draw the line the
/// caller cares about: was the link down before the attempt, did the
/// device stay silent, or did the link break underneath the exchange.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// No open connection; retry once the link recovers
    #[error("Link unavailable: {0}")]
    LinkUnavailable(String),

    /// The device did not answer in time; the link itself is presumed
    /// alive
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    /// IO failure during the exchange; reconnection runs in the
    /// background
    #[error("Link error: {0}")]
    LinkError(String),

    /// The link was closed while the command waited
    #[error("Link closed")]
    LinkClosed,

    /// Rejected before touching the link
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl BridgeError {
    /// Stable machine-readable tag for the serializable boundary
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::LinkUnavailable(_) => "unavailable",
            BridgeError::Timeout(_) => "timeout",
            BridgeError::LinkError(_) => "link_error",
            BridgeError::LinkClosed => "closed",
            BridgeError::InvalidCommand(_) => "invalid_command",
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
