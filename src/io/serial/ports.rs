// src/io/serial/ports.rs
//
// Serial port discovery for picking the sensor board.

use serialport::{SerialPortInfo, SerialPortType};

use crate::io::error::LinkError;

/// One discovered port, reduced to what is needed to recognise the board.
#[derive(Clone, Debug, PartialEq)]
pub struct PortEntry {
    pub name: String,
    /// `usb`, `bluetooth`, `pci` or `unknown`
    pub kind: &'static str,
    /// USB vendor and product id
    pub usb_id: Option<(u16, u16)>,
    /// USB product string, else manufacturer
    pub description: Option<String>,
}

impl From<SerialPortInfo> for PortEntry {
    fn from(info: SerialPortInfo) -> Self {
        let (kind, usb_id, description) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                ("usb", Some((usb.vid, usb.pid)), usb.product.or(usb.manufacturer))
            }
            SerialPortType::BluetoothPort => ("bluetooth", None, None),
            SerialPortType::PciPort => ("pci", None, None),
            SerialPortType::Unknown => ("unknown", None, None),
        };
        PortEntry {
            name: info.port_name,
            kind,
            usb_id,
            description,
        }
    }
}

impl PortEntry {
    /// Tab-separated `name kind vid:pid description` row.
    pub fn row(&self) -> String {
        let usb_id = match self.usb_id {
            Some((vid, pid)) => format!("{:04x}:{:04x}", vid, pid),
            None => "-".to_string(),
        };
        format!(
            "{}\t{}\t{}\t{}",
            self.name,
            self.kind,
            usb_id,
            self.description.as_deref().unwrap_or("")
        )
    }
}

/// Ports on this machine, USB devices first, each group sorted by name.
pub fn list_serial_ports() -> Result<Vec<PortEntry>, LinkError> {
    let ports = serialport::available_ports().map_err(LinkError::Enumerate)?;
    Ok(sorted_entries(ports))
}

fn sorted_entries(ports: Vec<SerialPortInfo>) -> Vec<PortEntry> {
    let mut entries: Vec<PortEntry> = ports.into_iter().map(PortEntry::from).collect();
    entries.sort_by(|a, b| {
        b.usb_id
            .is_some()
            .cmp(&a.usb_id.is_some())
            .then_with(|| a.name.cmp(&b.name))
    });
    entries
}
