use std::ops::Index;

use crate::device::codec::{Command, StatusReport};
use crate::device::constants::{JOINT_COUNT, NEUTRAL_ANGLE};

/// Exactly one angle per joint, indices 0..JOINT_COUNT, each in [0, 180].
/// Callers clamp before storing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JointAngles([u8; JOINT_COUNT]);

impl JointAngles {
    pub fn uniform(angle: u8) -> Self {
        JointAngles([angle; JOINT_COUNT])
    }

    pub fn as_array(&self) -> [u8; JOINT_COUNT] {
        self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.0.iter().copied().enumerate()
    }
}

impl Default for JointAngles {
    fn default() -> Self {
        JointAngles::uniform(NEUTRAL_ANGLE)
    }
}

impl From<[u8; JOINT_COUNT]> for JointAngles {
    fn from(angles: [u8; JOINT_COUNT]) -> Self {
        JointAngles(angles)
    }
}

impl Index<usize> for JointAngles {
    type Output = u8;

    fn index(&self, joint: usize) -> &u8 {
        &self.0[joint]
    }
}

/// Last known device state. Outlives connections: after a disconnect the
/// values stay displayed until a fresh STATUS overwrites them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStateMirror {
    pub servos_enabled: bool,
    pub emergency_stop: bool,
    pub auto_mode: bool,
    pub joint_angles: JointAngles,
}

impl Default for DeviceStateMirror {
    fn default() -> Self {
        DeviceStateMirror {
            servos_enabled: true,
            emergency_stop: false,
            auto_mode: true,
            joint_angles: JointAngles::default(),
        }
    }
}

impl DeviceStateMirror {
    /// Authoritative update from the device. The report was validated as a
    /// whole by the codec, so this never leaves the mirror half-applied.
    pub fn apply_status(&mut self, status: &StatusReport) {
        self.servos_enabled = status.servos_enabled;
        self.emergency_stop = status.emergency_stop;
        self.auto_mode = status.auto_mode;

        if let Some(angles) = &status.angles {
            let mut merged = self.joint_angles.0;
            for (&joint, &angle) in angles {
                if let Some(slot) = merged.get_mut(joint) {
                    *slot = angle;
                }
            }
            self.joint_angles = JointAngles(merged);
        }
    }

    pub fn apply_optimistic_angle(&mut self, joint: usize, angle: u8) {
        if let Some(slot) = self.joint_angles.0.get_mut(joint) {
            *slot = angle;
        }
    }

    pub fn apply_optimistic_all(&mut self, angle: u8) {
        self.joint_angles = JointAngles::uniform(angle);
    }

    pub fn apply_optimistic_pose(&mut self, angles: [u8; JOINT_COUNT]) {
        self.joint_angles = JointAngles(angles);
    }

    /// Reflect an outgoing command before the device confirms it. The next
    /// STATUS reply is the authority and overwrites whatever is set here.
    pub fn apply_command(&mut self, command: &Command) {
        match command {
            Command::QueryStatus => {},
            Command::Servo { joint, angle } => self.apply_optimistic_angle(*joint, *angle),
            Command::All { angle } => self.apply_optimistic_all(*angle),
            Command::Gesture(gesture) => self.apply_optimistic_pose(gesture.angles()),
            Command::EmergencyStop(on) => self.emergency_stop = *on,
            Command::AutoMode(on) => self.auto_mode = *on,
            Command::ServosEnabled(on) => self.servos_enabled = *on,
        }
    }
}
