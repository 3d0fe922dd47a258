//! Motor control value types.
//!
//! These are the semantic values the typed write operations accept. Each
//! travels over the wire as its ordinal (see [`crate::protocol::wire`]).

use crate::error::{Error, Result};

/// Control mode for the selected motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Mode {
    /// Position control.
    #[default]
    Position = 0,
    /// Velocity control.
    Velocity = 1,
    /// Torque control.
    Torque = 2,
}

impl Mode {
    /// All modes in ordinal order.
    pub const ALL: [Mode; 3] = [Mode::Position, Mode::Velocity, Mode::Torque];

    /// The ordinal sent over the wire.
    pub fn ordinal(&self) -> i64 {
        *self as i64
    }

    /// Create from a wire ordinal.
    pub fn from_ordinal(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Position),
            1 => Ok(Self::Velocity),
            2 => Ok(Self::Torque),
            _ => Err(Error::InvalidData {
                context: format!("Mode ordinal out of range: {}", value),
            }),
        }
    }

    /// Advisory setpoint range for this mode.
    ///
    /// Used by front ends to bound their setpoint controls. The session never
    /// clamps setpoints itself.
    pub fn setpoint_range(&self) -> SetpointRange {
        match self {
            Self::Position => SetpointRange::new(-12.0, 12.0),
            Self::Velocity => SetpointRange::new(-5.0, 5.0),
            Self::Torque => SetpointRange::new(-5.0, 5.0),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Position => write!(f, "Position"),
            Self::Velocity => write!(f, "Velocity"),
            Self::Torque => write!(f, "Torque"),
        }
    }
}

impl TryFrom<i64> for Mode {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        Self::from_ordinal(value)
    }
}

/// Which motor subsequent commands apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MotorSelect {
    /// Left motor.
    #[default]
    Left = 0,
    /// Right motor.
    Right = 1,
}

impl MotorSelect {
    /// The ordinal sent over the wire.
    pub fn ordinal(&self) -> i64 {
        *self as i64
    }

    /// Create from a wire ordinal.
    pub fn from_ordinal(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Left),
            1 => Ok(Self::Right),
            _ => Err(Error::InvalidData {
                context: format!("MotorSelect ordinal out of range: {}", value),
            }),
        }
    }
}

impl std::fmt::Display for MotorSelect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "Left"),
            Self::Right => write!(f, "Right"),
        }
    }
}

impl TryFrom<i64> for MotorSelect {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        Self::from_ordinal(value)
    }
}

/// Inclusive setpoint bounds for a control mode.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SetpointRange {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl SetpointRange {
    /// Create a new range.
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Check whether a setpoint falls inside the range.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp a setpoint into the range.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}
