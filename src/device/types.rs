use std::fmt;

use crate::device::mirror::DeviceStateMirror;
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Scanning => "scanning",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        };

        write!(f, "{}", result)
    }
}

/// What a discovered peripheral must advertise to be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub advertised_name: String,
}

impl DeviceIdentity {
    pub fn new(advertised_name: impl Into<String>) -> Self {
        DeviceIdentity { advertised_name: advertised_name.into() }
    }

    /// Exact, case-sensitive comparison. Peripherals without a name never match.
    pub fn matches(&self, advertised: Option<&str>) -> bool {
        advertised == Some(self.advertised_name.as_str())
    }
}

/// Snapshot delivered to the presentation layer after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub session_state: SessionState,
    pub mirror: DeviceStateMirror,
    pub last_error: Option<SessionError>,
}

impl SessionUpdate {
    pub fn initial() -> Self {
        SessionUpdate {
            session_state: SessionState::Disconnected,
            mirror: DeviceStateMirror::default(),
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session_state == SessionState::Connected
    }

    pub fn status_line(&self) -> String {
        match (&self.session_state, &self.last_error) {
            (SessionState::Scanning, _) => "Scanning…".to_string(),
            (SessionState::Connecting, _) => "Connecting…".to_string(),
            (SessionState::Connected, Some(SessionError::DeviceReportedError(message))) => {
                format!("Connected (device error: {})", message)
            },
            (SessionState::Connected, Some(SessionError::ProtocolMismatch)) => {
                "Connected (command not recognized)".to_string()
            },
            (SessionState::Connected, _) => "Connected".to_string(),
            (SessionState::Disconnected, None) => "Disconnected".to_string(),
            (SessionState::Disconnected, Some(SessionError::ScanTimeout)) => "Device not found".to_string(),
            (SessionState::Disconnected, Some(SessionError::TransportUnavailable { .. })) => {
                "Bluetooth unavailable".to_string()
            },
            (SessionState::Disconnected, Some(SessionError::ScanFailed { .. })) => "Scan error".to_string(),
            (SessionState::Disconnected, Some(SessionError::UnsolicitedDisconnect)) => "Connection lost".to_string(),
            (SessionState::Disconnected, Some(_)) => "Connection error".to_string(),
        }
    }
}
