//! Data structures for motor control values.
//!
//! This module contains the value types accepted by the typed write
//! operations and the advisory setpoint ranges for each control mode.

pub mod control;

pub use control::{Mode, MotorSelect, SetpointRange};
