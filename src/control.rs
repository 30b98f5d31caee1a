use crate::bridge::SerialBridge;
use crate::link::models::Command;
use crate::link::Result;
use crate::serial::Reply;

// Line vocabulary of the remote-control firmware
const STATUS_COMMAND: &str = "STATUS";
const TEMPERATURE_COMMAND: &str = "TEMP";
const PRESET_PREFIX: &str = "PRESET:";

/// Typed helpers over the device's command vocabulary. Everything
/// funnels through the bridge, so these calls queue and serialize like
/// any other submission.
pub struct RemoteControl {
    bridge: SerialBridge,
}

impl RemoteControl {
    pub fn new(bridge: SerialBridge) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &SerialBridge {
        &self.bridge
    }

    pub fn into_bridge(self) -> SerialBridge {
        self.bridge
    }

    /// Send preformatted text as-is (trimmed)
    pub async fn send_raw(&self, text: &str) -> Result<Reply> {
        self.bridge.submit(Command::new(text.trim())).await
    }

    /// Apply a named preset: `PRESET:<name>`
    pub async fn send_preset(&self, name: &str) -> Result<Reply> {
        let payload = format!("{}{}", PRESET_PREFIX, name.trim());
        self.bridge.submit(Command::new(payload)).await
    }

    /// Query device status
    pub async fn status(&self) -> Result<Reply> {
        self.bridge.submit(Command::new(STATUS_COMMAND)).await
    }

    /// Query the temperature sensor. `Ok(None)` when the device
    /// answered with something that is not a reading.
    pub async fn temperature(&self) -> Result<Option<f64>> {
        let reply = self.bridge.submit(Command::new(TEMPERATURE_COMMAND)).await?;
        Ok(reply.temperature())
    }
}
