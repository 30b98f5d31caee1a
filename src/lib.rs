//! Half-duplex command/response bridge for serial and Bluetooth
//! microcontroller links: one command on the wire at a time, newline
//! framing, reply correlation with timeouts, and automatic reconnect
//! with backoff. [`SerialBridge`] is the entry point; [`RemoteControl`]
//! adds the device vocabulary on top.

pub mod bridge;
pub mod control;
pub mod link;
pub mod serial;

pub use bridge::SerialBridge;
pub use control::RemoteControl;
pub use link::{BridgeError, Command, LinkConfig, LinkState, LinkStatus, SubmitOutcome};
pub use serial::{available_endpoints, PortInfo, Reply, ReplyKind};
