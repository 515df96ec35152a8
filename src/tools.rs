// src/tools.rs
//
// Tool-call surface over an open device link.
//
// Each method returns a short human-readable answer, which is what tool
// callers (assistants, consoles, HTTP handlers) hand back to their users.
// Missing data reads as a "Could not retrieve ..." answer, never an error.

use std::sync::Arc;
use std::time::Duration;

use crate::io::error::LinkError;
use crate::io::serial::DeviceLink;
use crate::observer::LogRing;
use crate::packet::Telemetry;
use crate::tlog;

pub struct DeviceTools {
    link: Arc<DeviceLink>,
    log: Arc<LogRing>,
    state_timeout: Duration,
}

impl DeviceTools {
    pub fn new(link: Arc<DeviceLink>, log: Arc<LogRing>, state_timeout: Duration) -> Self {
        DeviceTools {
            link,
            log,
            state_timeout,
        }
    }

    pub fn link(&self) -> &DeviceLink {
        &self.link
    }

    /// Send a GOTO command (metres).
    pub fn goto_target(&self, x: f64, y: f64, z: f64) -> Result<String, LinkError> {
        self.link.send_goto(x, y, z)?;
        let message = format!("GOTO target set to: x={}, y={}, z={}.", x, y, z);
        tlog!("[tools] {}", message);
        Ok(message)
    }

    pub fn current_temperature(&self) -> String {
        match self.latest().and_then(|t| t.temp_c) {
            Some(temp) => format!("{:.2} degrees celsius", temp),
            None => "Could not retrieve temperature.".to_string(),
        }
    }

    pub fn current_humidity(&self) -> String {
        match self.latest().and_then(|t| t.humidity_rh) {
            Some(humidity) => format!("{:.2}%", humidity),
            None => "Could not retrieve humidity.".to_string(),
        }
    }

    pub fn current_position(&self) -> String {
        match self.latest().and_then(|t| t.resolved_position()) {
            Some(pos) => format!("x={:.2}, y={:.2}, z={:.2}", pos.x, pos.y, pos.z),
            None => "Could not retrieve position.".to_string(),
        }
    }

    /// Newest `limit` lines of device activity, oldest first.
    pub fn recent_logs(&self, limit: usize) -> Vec<String> {
        self.log.lines(limit)
    }

    // Each accessor consumes its own snapshot from the slot.
    fn latest(&self) -> Option<Telemetry> {
        self.link
            .get_state(self.state_timeout)
            .and_then(|packet| packet.telemetry().cloned())
    }
}
