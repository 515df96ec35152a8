// src/io/serial/mod.rs
//
// Serial device link for the sensor board's line protocol.
//
// Features:
// - Newline framing with an over-length guard
// - Line classification into sensor packets (JSON telemetry, ACK/ERR, text)
// - Background reader feeding an observer and the latest-telemetry slot
// - Outbound GOTO/RGB/LED commands
// - Port discovery

pub mod codec;
pub mod config;
pub mod framer;
pub mod link;
pub mod ports;

pub use codec::{parse_line, Command, MAX_COMMAND_LENGTH};
pub use config::{LinkOptions, Parity, SerialConfig};
pub use framer::{LineFrame, LineFramer};
pub use link::DeviceLink;
pub use ports::{list_serial_ports, PortEntry};
