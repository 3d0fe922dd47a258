//! Characteristic payload encoding.
//!
//! Every characteristic carries a fixed-width little-endian value:
//! - enable, mode, motor-select: 8-byte signed integer (0/1, 0-2, 0/1)
//! - setpoint: 8-byte IEEE-754 double
//!
//! The width and byte order are set by the firmware and are independent of
//! the host architecture.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::data::{Mode, MotorSelect};
use crate::error::{Error, Result};

/// Width in bytes of an integer payload.
pub const INT_PAYLOAD_LEN: usize = 8;

/// Width in bytes of a setpoint payload.
pub const SETPOINT_PAYLOAD_LEN: usize = 8;

/// Encode an integer payload.
pub fn encode_int(value: i64) -> Bytes {
    let mut buf = BytesMut::with_capacity(INT_PAYLOAD_LEN);
    buf.put_i64_le(value);
    buf.freeze()
}

/// Decode an integer payload.
///
/// # Errors
///
/// Returns [`Error::InvalidData`] if `data` is not exactly 8 bytes.
pub fn decode_int(data: &[u8]) -> Result<i64> {
    check_len(data, INT_PAYLOAD_LEN, "integer")?;
    let mut buf = data;
    Ok(buf.get_i64_le())
}

/// Encode a setpoint payload.
pub fn encode_f64(value: f64) -> Bytes {
    let mut buf = BytesMut::with_capacity(SETPOINT_PAYLOAD_LEN);
    buf.put_f64_le(value);
    buf.freeze()
}

/// Decode a setpoint payload.
///
/// # Errors
///
/// Returns [`Error::InvalidData`] if `data` is not exactly 8 bytes.
pub fn decode_f64(data: &[u8]) -> Result<f64> {
    check_len(data, SETPOINT_PAYLOAD_LEN, "setpoint")?;
    let mut buf = data;
    Ok(buf.get_f64_le())
}

fn check_len(data: &[u8], expected: usize, what: &str) -> Result<()> {
    if data.len() != expected {
        return Err(Error::InvalidData {
            context: format!(
                "{} payload must be {} bytes, got {}",
                what,
                expected,
                data.len()
            ),
        });
    }
    Ok(())
}

/// A value with a fixed characteristic encoding.
pub trait WireValue: Sized {
    /// Encode into the payload written to the characteristic.
    fn encode(&self) -> Bytes;

    /// Decode from a characteristic payload.
    fn decode(data: &[u8]) -> Result<Self>;
}

impl WireValue for bool {
    fn encode(&self) -> Bytes {
        encode_int(i64::from(*self))
    }

    fn decode(data: &[u8]) -> Result<Self> {
        match decode_int(data)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::InvalidData {
                context: format!("Enable flag must be 0 or 1, got {}", other),
            }),
        }
    }
}

impl WireValue for f64 {
    fn encode(&self) -> Bytes {
        encode_f64(*self)
    }

    fn decode(data: &[u8]) -> Result<Self> {
        decode_f64(data)
    }
}

impl WireValue for Mode {
    fn encode(&self) -> Bytes {
        encode_int(self.ordinal())
    }

    fn decode(data: &[u8]) -> Result<Self> {
        Mode::from_ordinal(decode_int(data)?)
    }
}

impl WireValue for MotorSelect {
    fn encode(&self) -> Bytes {
        encode_int(self.ordinal())
    }

    fn decode(data: &[u8]) -> Result<Self> {
        MotorSelect::from_ordinal(decode_int(data)?)
    }
}
