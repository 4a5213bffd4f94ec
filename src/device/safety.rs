use std::fmt;

use crate::device::codec::CommandClass;
use crate::device::types::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    NotConnected,
    EmergencyStopActive,
    ServosDisabled,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            Denial::NotConnected => "not connected",
            Denial::EmergencyStopActive => "emergency stop active",
            Denial::ServosDisabled => "servos disabled",
        };

        write!(f, "{}", result)
    }
}

/// Decides whether a command may reach the wire. Pure; holds only policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyGate {
    /// Deny motion commands while the servos are disabled.
    pub gate_on_servos_enabled: bool,
}

impl Default for SafetyGate {
    fn default() -> Self {
        SafetyGate { gate_on_servos_enabled: true }
    }
}

impl SafetyGate {
    pub fn check(
        &self,
        class: CommandClass,
        state: SessionState,
        emergency_stop: bool,
        servos_enabled: bool,
    ) -> Result<(), Denial> {
        if state != SessionState::Connected {
            return Err(Denial::NotConnected);
        }

        if class == CommandClass::Motion {
            if emergency_stop {
                return Err(Denial::EmergencyStopActive);
            }
            if self.gate_on_servos_enabled && !servos_enabled {
                return Err(Denial::ServosDisabled);
            }
        }

        Ok(())
    }
}

pub fn can_send(
    class: CommandClass,
    state: SessionState,
    emergency_stop: bool,
    servos_enabled: bool,
) -> Result<(), Denial> {
    SafetyGate::default().check(class, state, emergency_stop, servos_enabled)
}
