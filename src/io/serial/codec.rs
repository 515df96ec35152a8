// src/io/serial/codec.rs
//
// Device line-protocol codec.
//
// Inbound line formats (UTF-8, newline terminated):
//   Telemetry: {"temp_c":21.4,"humidity_rh":40.2,"position":{"x":0,"y":0,"z":0},...}
//   Ack:       ACK=<payload>          (ACK=TARGET_SET,<x>,<y>,<z> carries a position)
//   Error:     ERR=<message>
//   Info:      Distance to target: <d> m
//   Text:      anything else (READY, banners, ...)
//
// Outbound commands:
//   GOTO=<x>,<y>,<z>\n
//   RGB=<r>,<g>,<b>\n   (0-255 each)
//   LED=ON\n / LED=OFF\n

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::packet::{
    AckFrame, ColorReading, ErrFrame, Frame, InfoFrame, JsonFrame, Position, SensorPacket,
    Telemetry, TextFrame, Vec3,
};

const ACK_PREFIX: &str = "ACK=";
const ERR_PREFIX: &str = "ERR=";
const TARGET_SET: &str = "TARGET_SET";
const DISTANCE_PREFIX: &str = "distance to target";

/// Longest command line the firmware accepts (excluding the newline).
pub const MAX_COMMAND_LENGTH: usize = 96;

// ============================================================================
// Inbound
// ============================================================================

/// Classify one line of device output.
///
/// Returns `None` only for lines that are empty after trimming. Malformed JSON
/// or bad numeric arguments degrade to a less specific packet; this function
/// has no failure path.
///
/// Examples:
///   `{"temp_c":21.5}`          -> Json, temp_c = 21.5
///   `ACK=TARGET_SET,1,2,3`     -> Ack, position (1, 2, 3)
///   `ERR=BAD_GOTO,VAL=GOTO=`   -> Err
///   `READY`                    -> Text
pub fn parse_line(line: &str, now: DateTime<Utc>) -> Option<SensorPacket> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let frame = match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(obj)) => Frame::Json(JsonFrame {
            telemetry: telemetry_from_object(&obj),
            raw: Value::Object(obj),
        }),
        Ok(other) => Frame::Json(JsonFrame {
            telemetry: Telemetry::default(),
            raw: other,
        }),
        Err(_) => parse_text_line(line),
    };

    Some(SensorPacket {
        timestamp: now,
        raw_line: line.to_string(),
        frame,
    })
}

fn parse_text_line(line: &str) -> Frame {
    if let Some(payload) = line.strip_prefix(ACK_PREFIX) {
        return Frame::Ack(AckFrame {
            payload: payload.to_string(),
            position: parse_target_set(payload),
        });
    }

    if let Some(error) = line.strip_prefix(ERR_PREFIX) {
        return Frame::Err(ErrFrame {
            error: error.to_string(),
        });
    }

    if let Some(rest) = strip_prefix_ignore_case(line, DISTANCE_PREFIX) {
        let info = rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
        return Frame::Info(InfoFrame {
            info: info.to_string(),
            distance_to_target: trailing_number(info),
        });
    }

    Frame::Text(TextFrame {
        info: line.to_string(),
    })
}

/// `TARGET_SET,<x>,<y>,<z>` with all three numeric; anything else has no position.
fn parse_target_set(payload: &str) -> Option<Position> {
    let parts: Vec<&str> = payload.split(',').collect();
    if parts.len() != 4 || parts[0] != TARGET_SET {
        return None;
    }
    Some(Position {
        x: parse_number(parts[1])?,
        y: parse_number(parts[2])?,
        z: parse_number(parts[3])?,
    })
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        line.get(prefix.len()..)
    } else {
        None
    }
}

/// Last whitespace-separated token that parses as a number.
fn trailing_number(text: &str) -> Option<f64> {
    text.split_whitespace().rev().find_map(parse_number)
}

// ----------------------------------------------------------------------------
// Telemetry field mapping
// ----------------------------------------------------------------------------

fn telemetry_from_object(obj: &Map<String, Value>) -> Telemetry {
    Telemetry {
        device_ms: obj.get("timestamp").and_then(Value::as_u64),
        temp_c: number_field(obj, &["temp_c", "temperature"]),
        humidity_rh: number_field(obj, &["humidity_rh", "humidity"]),
        pressure_kpa: number_field(obj, &["pressure_kpa", "pressure"]),
        proximity: obj.get("proximity").and_then(Value::as_i64),
        gesture: obj.get("gesture").and_then(Value::as_i64),
        color: obj.get("color").and_then(as_color),
        acc_g: obj.get("acc_g").and_then(as_vec3),
        gyro_dps: obj.get("gyro_dps").and_then(as_vec3),
        mag_ut: obj.get("mag_uT").and_then(as_vec3),
        position: obj.get("position").and_then(Value::as_object).cloned(),
        distance_to_target: obj.get("distance_to_target").and_then(Value::as_f64),
    }
}

/// Value of the first of `keys` that holds a number.
fn number_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_f64))
}

fn as_vec3(value: &Value) -> Option<Vec3> {
    match value.as_array()?.as_slice() {
        [x, y, z] => Some(Vec3::new(x.as_f64()?, y.as_f64()?, z.as_f64()?)),
        _ => None,
    }
}

fn as_color(value: &Value) -> Option<ColorReading> {
    match value {
        Value::Object(map) => Some(ColorReading {
            r: map.get("r")?.as_i64()?,
            g: map.get("g")?.as_i64()?,
            b: map.get("b")?.as_i64()?,
            c: map.get("c")?.as_i64()?,
        }),
        Value::Array(items) => match items.as_slice() {
            [r, g, b, c] => Some(ColorReading {
                r: r.as_i64()?,
                g: g.as_i64()?,
                b: b.as_i64()?,
                c: c.as_i64()?,
            }),
            _ => None,
        },
        _ => None,
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Commands understood by the device firmware.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Goto { x: f64, y: f64, z: f64 },
    Rgb { r: u8, g: u8, b: u8 },
    Led(bool),
}

impl Command {
    /// RGB command with each component clamped to 0-255.
    pub fn rgb_clamped(r: i32, g: i32, b: i32) -> Self {
        Command::Rgb {
            r: clamp_byte(r),
            g: clamp_byte(g),
            b: clamp_byte(b),
        }
    }

    /// Encode as ASCII, including the trailing `\n`.
    pub fn encode(&self) -> Vec<u8> {
        let line = match self {
            Command::Goto { x, y, z } => format!(
                "GOTO={},{},{}",
                format_coordinate(*x),
                format_coordinate(*y),
                format_coordinate(*z)
            ),
            Command::Rgb { r, g, b } => format!("RGB={},{},{}", r, g, b),
            Command::Led(true) => "LED=ON".to_string(),
            Command::Led(false) => "LED=OFF".to_string(),
        };
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        bytes
    }
}

fn clamp_byte(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

// Exponent form outside the ordinary range keeps a GOTO line well under
// MAX_COMMAND_LENGTH for any f64.
fn format_coordinate(v: f64) -> String {
    let magnitude = v.abs();
    if v.is_finite() && v != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        format!("{:e}", v)
    } else {
        v.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
