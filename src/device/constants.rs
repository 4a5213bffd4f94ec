use uuid::Uuid;

/**
 * The name the hand advertises. Scan matching is exact and case-sensitive.
 */
pub const DEVICE_NAME: &str = "MaoRobotica_ESP32";

/**
 * How long (milliseconds) to scan for the hand before giving up.
 */
pub const SCAN_TIMEOUT: u64 = 10_000;

/**
 * How long (milliseconds) connecting, service discovery and subscribing may take together.
 */
pub const CONNECT_DEADLINE: u64 = 15_000;

/**
 * How long (milliseconds) a write to the command characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2_000;

pub const JOINT_COUNT: usize = 5;

pub const JOINT_NAMES: [&str; JOINT_COUNT] = ["Thumb", "Index", "Middle", "Ring", "Little"];

pub const ANGLE_MIN: u8 = 0;
pub const ANGLE_MAX: u8 = 180;

/**
 * Every joint starts here before the first STATUS reply arrives.
 */
pub const NEUTRAL_ANGLE: u8 = 90;

/**
 * The UUID of the Bluetooth BLE service exposed by the hand firmware.
 */
pub fn make_hand_service_uuid() -> Uuid {
    Uuid::from_u128(0x12345678_1234_1234_1234_123456789abc)
}

/**
 * The UUID of the read/write/notify characteristic that carries text commands and replies.
 */
pub fn make_hand_command_uuid() -> Uuid {
    Uuid::from_u128(0x87654321_4321_4321_4321_cba987654321)
}

pub fn joint_name(index: usize) -> &'static str {
    JOINT_NAMES.get(index).copied().unwrap_or("?")
}
