// src/packet.rs
//
// Classified units of inbound line-protocol data.
//
// Every packet carries its capture time and the trimmed line that produced it.
// The payload is a sum type so each kind only exposes the fields that mean
// something for it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

// ============================================================================
// Value Types
// ============================================================================

/// Three-component vector (accelerometer, gyroscope, magnetometer).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }
}

/// Resolved target coordinates (metres).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Resolve a `{x, y, z}` mapping. All three components must be numbers.
    pub fn from_map(map: &Map<String, Value>) -> Option<Self> {
        Some(Position {
            x: map.get("x")?.as_f64()?,
            y: map.get("y")?.as_f64()?,
            z: map.get("z")?.as_f64()?,
        })
    }
}

/// Colour sensor reading (red, green, blue, clear).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ColorReading {
    pub r: i64,
    pub g: i64,
    pub b: i64,
    pub c: i64,
}

// ============================================================================
// Frames
// ============================================================================

/// Typed view of a JSON telemetry object. Every field is independently optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Telemetry {
    /// Device uptime in milliseconds, as reported by the firmware
    pub device_ms: Option<u64>,
    pub temp_c: Option<f64>,
    pub humidity_rh: Option<f64>,
    pub pressure_kpa: Option<f64>,
    pub proximity: Option<i64>,
    pub gesture: Option<i64>,
    pub color: Option<ColorReading>,
    pub acc_g: Option<Vec3>,
    pub gyro_dps: Option<Vec3>,
    pub mag_ut: Option<Vec3>,
    /// Only kept when the source value is a mapping
    pub position: Option<Map<String, Value>>,
    pub distance_to_target: Option<f64>,
}

impl Telemetry {
    /// Position resolved to numeric coordinates, if all of x/y/z are present.
    pub fn resolved_position(&self) -> Option<Position> {
        self.position.as_ref().and_then(Position::from_map)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JsonFrame {
    /// Typed fields; all absent when the decoded value is not an object
    pub telemetry: Telemetry,
    /// The decoded value, kept for fields that are not modelled
    pub raw: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AckFrame {
    /// Text after `ACK=`
    pub payload: String,
    /// Set only for a well-formed `TARGET_SET,<x>,<y>,<z>` payload
    pub position: Option<Position>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrFrame {
    /// Text after `ERR=`
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextFrame {
    pub info: String,
}

/// A line with a recognised informational prefix.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InfoFrame {
    /// Text following the prefix
    pub info: String,
    pub distance_to_target: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Frame {
    Json(JsonFrame),
    Ack(AckFrame),
    Err(ErrFrame),
    Text(TextFrame),
    Info(InfoFrame),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    Json,
    Ack,
    Err,
    Text,
    Info,
}

impl PacketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketKind::Json => "json",
            PacketKind::Ack => "ack",
            PacketKind::Err => "err",
            PacketKind::Text => "text",
            PacketKind::Info => "info",
        }
    }
}

// ============================================================================
// Sensor Packet
// ============================================================================

/// One classified inbound line. Never mutated after construction.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensorPacket {
    pub timestamp: DateTime<Utc>,
    /// Trimmed, non-empty source line
    pub raw_line: String,
    #[serde(flatten)]
    pub frame: Frame,
}

impl SensorPacket {
    pub fn kind(&self) -> PacketKind {
        match self.frame {
            Frame::Json(_) => PacketKind::Json,
            Frame::Ack(_) => PacketKind::Ack,
            Frame::Err(_) => PacketKind::Err,
            Frame::Text(_) => PacketKind::Text,
            Frame::Info(_) => PacketKind::Info,
        }
    }

    /// Telemetry fields, for json packets only.
    pub fn telemetry(&self) -> Option<&Telemetry> {
        match &self.frame {
            Frame::Json(json) => Some(&json.telemetry),
            _ => None,
        }
    }

    pub fn is_telemetry(&self) -> bool {
        matches!(self.frame, Frame::Json(_))
    }
}
