pub mod framer;
pub mod mock;
pub mod parser;
pub mod transport;

pub use framer::LineFramer;
pub use mock::{MockBehavior, MockHandle, MockTransport};
pub use parser::{parse_reply, Reply, ReplyKind};
pub use transport::{SerialTransport, Transport};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// List serial endpoints present on this host, USB metadata included
/// where the platform reports it. Bluetooth RFCOMM bindings usually
/// show up as plain ports with no USB info.
pub fn available_endpoints() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    let mut endpoints = Vec::new();

    for port in ports {
        let mut info = PortInfo {
            port_name: port.port_name.clone(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        };
        if let serialport::SerialPortType::UsbPort(usb_info) = port.port_type {
            info.vid = Some(usb_info.vid);
            info.pid = Some(usb_info.pid);
            info.manufacturer = usb_info.manufacturer;
            info.product = usb_info.product;
        }
        endpoints.push(info);
    }

    Ok(endpoints)
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Failed to open {endpoint}: {detail}")]
    OpenFailed { endpoint: String, detail: String },

    #[error("Read timeout")]
    Timeout,

    #[error("Port is closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
