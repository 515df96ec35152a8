// src/observer.rs
//
// Packet observers: callbacks run on the reader thread for every parsed packet.
//
// Observers must return quickly. A returned error or a panic is caught and
// logged by the link; it never stops the reader.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::packet::{Frame, SensorPacket};
use crate::tlog;

pub trait PacketObserver: Send + Sync {
    fn on_packet(&self, packet: &SensorPacket) -> Result<(), String>;
}

impl<F> PacketObserver for F
where
    F: Fn(&SensorPacket) -> Result<(), String> + Send + Sync,
{
    fn on_packet(&self, packet: &SensorPacket) -> Result<(), String> {
        self(packet)
    }
}

// ============================================================================
// Log Ring
// ============================================================================

pub const DEFAULT_LOG_CAPACITY: usize = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Bounded ring of human-readable log lines built from packets, for UIs and
/// tool callers that want recent device activity.
pub struct LogRing {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LogRing {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full. Blank messages are skipped.
    pub fn push(&self, timestamp: DateTime<Utc>, level: LogLevel, message: &str) {
        if message.trim().is_empty() {
            return;
        }
        let line = format!(
            "{} {} {}",
            timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            level.as_str(),
            message
        );
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The newest `limit` lines, oldest first.
    pub fn lines(&self, limit: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = lines.len().saturating_sub(limit);
        lines.iter().skip(skip).cloned().collect()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        LogRing::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Level and message to record for a packet; `None` means not worth logging.
fn describe(packet: &SensorPacket) -> Option<(LogLevel, String)> {
    match &packet.frame {
        Frame::Json(json) => {
            let pos = json.telemetry.position.as_ref()?;
            let axis = |name: &str| pos.get(name).and_then(|v| v.as_f64()).unwrap_or(0.0);
            Some((
                LogLevel::Info,
                format!(
                    "POSITION x={:.2}, y={:.2}, z={:.2}",
                    axis("x"),
                    axis("y"),
                    axis("z")
                ),
            ))
        }
        Frame::Err(err) => Some((LogLevel::Error, err.error.clone())),
        Frame::Ack(ack) => Some((LogLevel::Debug, ack.payload.clone())),
        Frame::Text(text) => Some((LogLevel::Info, text.info.clone())),
        Frame::Info(info) => Some((LogLevel::Info, info.info.clone())),
    }
}

impl PacketObserver for LogRing {
    fn on_packet(&self, packet: &SensorPacket) -> Result<(), String> {
        if let Some((level, message)) = describe(packet) {
            if message.trim().is_empty() {
                return Ok(());
            }
            tlog!("[device] {} {}", level.as_str(), message);
            self.push(packet.timestamp, level, &message);
        }
        Ok(())
    }
}
