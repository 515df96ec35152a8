// src/io/serial/config.rs
//
// Line settings for the device port and the reader's timing limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{DataBits, SerialPortBuilder, StopBits};

use crate::io::error::LinkError;

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    /// Letter used in `8N1`-style summaries
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Reader loop timing and framing limits
#[derive(Clone, Debug)]
pub struct LinkOptions {
    /// Bound on a single blocking read; also the worst-case shutdown latency
    pub read_timeout: Duration,
    /// Pause after a channel I/O failure before reading again
    pub io_backoff: Duration,
    /// Lines longer than this many bytes (terminator excluded) are discarded
    pub max_line_length: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        LinkOptions {
            read_timeout: Duration::from_millis(1000),
            io_backoff: Duration::from_millis(5000),
            max_line_length: 1024,
        }
    }
}

/// Serial port configuration
#[derive(Clone, Debug)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub options: LinkOptions,
}

impl SerialConfig {
    /// 8N1 at `baud_rate` with default reader options.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        SerialConfig {
            port: port.into(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            options: LinkOptions::default(),
        }
    }

    /// Framing summary such as `8N1`.
    pub fn framing(&self) -> String {
        format!("{}{}{}", self.data_bits, self.parity.letter(), self.stop_bits)
    }

    /// Port builder for these settings. Bit counts the hardware cannot do
    /// are rejected instead of silently replaced.
    pub(crate) fn builder(&self) -> Result<SerialPortBuilder, LinkError> {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            n => return Err(LinkError::Config(format!("unsupported data bits: {}", n))),
        };
        let stop_bits = match self.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            n => return Err(LinkError::Config(format!("unsupported stop bits: {}", n))),
        };

        Ok(serialport::new(self.port.as_str(), self.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(self.parity.into())
            .timeout(self.options.read_timeout))
    }
}
