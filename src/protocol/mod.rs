//! Protocol module for characteristic payloads.
//!
//! This module contains the fixed-width little-endian encoding used for
//! every value written to the motor controller.

pub mod wire;

pub use wire::{decode_f64, decode_int, encode_f64, encode_int, WireValue};
