//! Text protocol spoken over the command characteristic.
//!
//! Outbound commands are colon-delimited ASCII (`SERVO:2:45`, `AUTO:ON`, ...)
//! without framing, length prefix or checksum. Inbound notifications are
//! recognized by prefix: `STATUS:<json>`, `ERROR:<message>` and
//! `UNKNOWN_COMMAND`. Anything else is ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::str;
use serde::Deserialize;

use crate::device::constants::{ANGLE_MAX, ANGLE_MIN, JOINT_COUNT};
use crate::device::gesture::Gesture;
use crate::error::DecodeError;

const STATUS_PREFIX: &str = "STATUS:";
const ERROR_PREFIX: &str = "ERROR:";
const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Moves at least one joint.
    Motion,
    /// Toggles a mode/flag or queries status.
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    QueryStatus,
    Servo { joint: usize, angle: u8 },
    All { angle: u8 },
    Gesture(Gesture),
    EmergencyStop(bool),
    AutoMode(bool),
    ServosEnabled(bool),
}

impl Command {
    pub fn class(&self) -> CommandClass {
        match self {
            Command::Servo { .. } | Command::All { .. } | Command::Gesture(_) => CommandClass::Motion,
            Command::QueryStatus
            | Command::EmergencyStop(_)
            | Command::AutoMode(_)
            | Command::ServosEnabled(_) => CommandClass::System,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "ON" } else { "OFF" }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::QueryStatus => write!(f, "STATUS"),
            Command::Servo { joint, angle } => write!(f, "SERVO:{}:{}", joint, angle),
            Command::All { angle } => write!(f, "ALL:{}", angle),
            Command::Gesture(gesture) => write!(f, "GESTURE:{}", gesture.name()),
            Command::EmergencyStop(on) => write!(f, "EMERGENCY:{}", on_off(*on)),
            Command::AutoMode(on) => write!(f, "AUTO:{}", on_off(*on)),
            Command::ServosEnabled(on) => write!(f, "SERVOS:{}", on_off(*on)),
        }
    }
}

/// Clamp a requested angle into the servo range. Done when an intent is
/// created, never inside the mirror.
pub fn clamp_angle(angle: i32) -> u8 {
    angle.clamp(ANGLE_MIN as i32, ANGLE_MAX as i32) as u8
}

/// Full device state carried by a `STATUS:` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub servos_enabled: bool,
    pub emergency_stop: bool,
    pub auto_mode: bool,
    /// Joints absent from the payload keep their mirrored value.
    pub angles: Option<BTreeMap<usize, u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Status(StatusReport),
    DeviceError(String),
    UnknownCommand,
    /// Unrecognized prefix; dropped for forward compatibility.
    Ignored,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnglesPayload {
    ByIndex(BTreeMap<String, f64>),
    List(Vec<f64>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    servos_enabled: bool,
    emergency_stop: bool,
    auto_mode: bool,
    #[serde(default)]
    angles: Option<AnglesPayload>,
}

fn validate_angle(joint: usize, angle: f64) -> Result<u8, DecodeError> {
    let rounded = angle.round();
    if !rounded.is_finite() || rounded < ANGLE_MIN as f64 || rounded > ANGLE_MAX as f64 {
        return Err(DecodeError::InvalidAngle { joint, angle: rounded as i64 });
    }
    Ok(rounded as u8)
}

fn validate_angles(payload: AnglesPayload) -> Result<BTreeMap<usize, u8>, DecodeError> {
    let mut angles = BTreeMap::new();

    match payload {
        AnglesPayload::ByIndex(map) => {
            for (key, angle) in map {
                let joint = match key.trim().parse::<usize>() {
                    Ok(joint) if joint < JOINT_COUNT => joint,
                    _ => return Err(DecodeError::InvalidJoint(key)),
                };
                angles.insert(joint, validate_angle(joint, angle)?);
            }
        },
        AnglesPayload::List(list) => {
            if list.len() > JOINT_COUNT {
                return Err(DecodeError::InvalidJoint(list.len().to_string()));
            }
            for (joint, angle) in list.into_iter().enumerate() {
                angles.insert(joint, validate_angle(joint, angle)?);
            }
        },
    }

    Ok(angles)
}

fn decode_status(json: &str) -> Result<StatusReport, DecodeError> {
    let payload: StatusPayload = serde_json::from_str(json)
        .map_err(|err| DecodeError::MalformedStatus(err.to_string()))?;

    let angles = match payload.angles {
        None => None,
        Some(angles) => Some(validate_angles(angles)?),
    };

    Ok(StatusReport {
        servos_enabled: payload.servos_enabled,
        emergency_stop: payload.emergency_stop,
        auto_mode: payload.auto_mode,
        angles,
    })
}

/// Decode the raw value of a notification. A STATUS payload is validated as
/// a whole, so a returned report can be applied without partial updates.
pub fn decode_notification(value: &[u8]) -> Result<Notification, DecodeError> {
    let text = str::from_utf8(value).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim_end_matches(|c| c == '\r' || c == '\n' || c == '\0');

    if let Some(json) = text.strip_prefix(STATUS_PREFIX) {
        return decode_status(json).map(Notification::Status);
    }

    if let Some(message) = text.strip_prefix(ERROR_PREFIX) {
        return Ok(Notification::DeviceError(message.to_string()));
    }

    if text.starts_with(UNKNOWN_COMMAND) {
        return Ok(Notification::UnknownCommand);
    }

    Ok(Notification::Ignored)
}
