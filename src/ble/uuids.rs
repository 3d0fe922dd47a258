//! BLE Service and Characteristic UUIDs.
//!
//! These are fixed by the motor controller firmware and must not change.

use uuid::Uuid;

/// Motor control service UUID.
pub const MOTOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x12341234_1212_efde_1523_785feabcd120);
/// Enable characteristic UUID (write, integer 0/1).
pub const ENABLE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x12341234_1212_efde_1523_785feabcd121);
/// Setpoint characteristic UUID (write, f64).
pub const SETPOINT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x12341234_1212_efde_1523_785feabcd122);
/// Control mode characteristic UUID (write, integer 0-2).
pub const MODE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x12341234_1212_efde_1523_785feabcd123);
/// Motor select characteristic UUID (write, integer 0/1).
pub const MOTOR_SELECT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x12341234_1212_efde_1523_785feabcd124);

/// Advertised name the motor controller firmware uses.
pub const MOTOR_DEVICE_NAME: &str = "TMOTOR";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            MOTOR_SERVICE_UUID.to_string(),
            "12341234-1212-efde-1523-785feabcd120"
        );
        assert_eq!(
            MOTOR_SELECT_CHARACTERISTIC_UUID.to_string(),
            "12341234-1212-efde-1523-785feabcd124"
        );
    }

    #[test]
    fn test_uuids_parse_from_firmware_strings() {
        let parsed = Uuid::parse_str("12341234-1212-EFDE-1523-785FEABCD121").unwrap();
        assert_eq!(parsed, ENABLE_CHARACTERISTIC_UUID);
    }
}
