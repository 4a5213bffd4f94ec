use crate::device::constants::{JOINT_COUNT, NEUTRAL_ANGLE};
use crate::error::SessionError;

/// Joint targets (thumb to little finger) for the gestures the firmware knows.
const GESTURES: [(&str, [u8; JOINT_COUNT]); 6] = [
    ("OPEN", [180, 180, 180, 180, 180]),
    ("CLOSE", [0, 0, 0, 0, 0]),
    ("PEACE", [0, 180, 180, 0, 0]),
    ("OK", [45, 45, 180, 180, 180]),
    ("POINT", [0, 180, 0, 0, 0]),
    ("ROCK", [0, 180, 0, 0, 180]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gesture {
    name: String,
}

impl Gesture {
    /// Names must be usable as a single protocol token. Unknown names are
    /// accepted and fall back to the neutral pose locally.
    pub fn parse(name: &str) -> Result<Gesture, SessionError> {
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii() && !c.is_ascii_whitespace() && !c.is_ascii_control() && c != ':');

        if !valid {
            return Err(SessionError::InvalidGesture(name.to_string()));
        }

        Ok(Gesture { name: name.to_string() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_known(&self) -> bool {
        GESTURES.iter().any(|(name, _)| *name == self.name)
    }

    pub fn angles(&self) -> [u8; JOINT_COUNT] {
        GESTURES
            .iter()
            .find(|(name, _)| *name == self.name)
            .map(|(_, angles)| *angles)
            .unwrap_or([NEUTRAL_ANGLE; JOINT_COUNT])
    }
}
