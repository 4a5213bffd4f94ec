use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use uuid::Uuid;
use btleplug;
use serde_json;

use crate::device::safety::Denial;
use crate::device::types::SessionState;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Failure reported by the wireless transport. Kept `Clone` so it can travel
/// inside session updates; btleplug errors are flattened into text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Bluetooth is unavailable: {0}")]
    Unavailable(String),

    #[error("Not allowed to access Bluetooth")]
    PermissionDenied,

    #[error("Bluetooth operation took too long")]
    TimedOut,

    #[error("Peripheral is not connected")]
    NotConnected,

    #[error("Error communicating with device (btleplug): {0}")]
    Other(String),
}

impl From<btleplug::Error> for TransportError {
    fn from(source: btleplug::Error) -> Self {
        match source {
            btleplug::Error::PermissionDenied => TransportError::PermissionDenied,
            btleplug::Error::NotConnected => TransportError::NotConnected,
            btleplug::Error::TimedOut(_) => TransportError::TimedOut,
            other => TransportError::Other(other.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Notification is not valid utf-8")]
    NotUtf8,

    #[error("Malformed STATUS payload: {0}")]
    MalformedStatus(String),

    #[error("STATUS payload names unknown joint {0}")]
    InvalidJoint(String),

    #[error("STATUS payload carries out of range angle {angle} for joint {joint}")]
    InvalidAngle { joint: usize, angle: i64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Bluetooth is unavailable: {source}")]
    TransportUnavailable { source: TransportError },

    #[error("device not found")]
    ScanTimeout,

    #[error("Scanning failed: {source}")]
    ScanFailed { source: TransportError },

    #[error("Failed to connect: {source}")]
    ConnectFailed { source: TransportError },

    #[error("Required bluetooth service {0} is not available")]
    ServiceNotFound(Uuid),

    #[error("Required bluetooth characteristic {0} is not available")]
    CharacteristicNotFound(Uuid),

    #[error("Failed to send command: {source}")]
    WriteFailed { source: TransportError },

    #[error("Failed to decode notification: {source}")]
    DecodeFailed { #[from] source: DecodeError },

    #[error("Device reported an error: {0}")]
    DeviceReportedError(String),

    #[error("Device did not recognize the command")]
    ProtocolMismatch,

    #[error("Connection lost")]
    UnsolicitedDisconnect,

    #[error("{0}")]
    Denied(Denial),

    #[error("Joint index {0} does not exist")]
    InvalidJoint(usize),

    #[error("Invalid gesture name {0:?}")]
    InvalidGesture(String),

    #[error("Session is busy ({0})")]
    Busy(SessionState),

    #[error("Session has been shut down")]
    SessionClosed,
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    Transport { #[from] source: TransportError },

    #[error("Session failed: {source}")]
    Session { #[from] source: SessionError },

    #[error("Failed to initialize logging: {source}")]
    Logging { #[from] source: fern::InitError },
}
