use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{
    make_hand_command_uuid, make_hand_service_uuid, CONNECT_DEADLINE, DEVICE_NAME, SCAN_TIMEOUT, WRITE_DEADLINE,
};
use crate::device::safety::SafetyGate;
use crate::device::types::DeviceIdentity;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub device_name: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub scan_timeout_ms: u64,
    pub connect_deadline_ms: u64,
    pub write_deadline_ms: u64,
    pub gate_motion_on_servos_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            device_name: DEVICE_NAME.to_string(),
            service_uuid: make_hand_service_uuid(),
            characteristic_uuid: make_hand_command_uuid(),
            scan_timeout_ms: SCAN_TIMEOUT,
            connect_deadline_ms: CONNECT_DEADLINE,
            write_deadline_ms: WRITE_DEADLINE,
            gate_motion_on_servos_enabled: true,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.is_empty() {
            return Err(ConfigError::Invalid { field: "deviceName", reason: "must not be empty" });
        }
        if self.scan_timeout_ms == 0 {
            return Err(ConfigError::Invalid { field: "scanTimeoutMs", reason: "must be greater than zero" });
        }
        if self.connect_deadline_ms == 0 {
            return Err(ConfigError::Invalid { field: "connectDeadlineMs", reason: "must be greater than zero" });
        }
        if self.write_deadline_ms == 0 {
            return Err(ConfigError::Invalid { field: "writeDeadlineMs", reason: "must be greater than zero" });
        }
        Ok(())
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.device_name.clone())
    }

    pub fn safety_gate(&self) -> SafetyGate {
        SafetyGate { gate_on_servos_enabled: self.gate_motion_on_servos_enabled }
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn connect_deadline(&self) -> Duration {
        Duration::from_millis(self.connect_deadline_ms)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }
}
