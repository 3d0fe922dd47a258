//! Error types for the tmotor-ble crate.

use thiserror::Error;

use crate::ble::characteristics::CharacteristicRole;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Operation requires a connection but no motor controller is connected.
    #[error("Motor controller not connected")]
    NotConnected,

    /// The characteristic for this role was never discovered on the peripheral.
    #[error("Characteristic unavailable: {role}")]
    CharacteristicUnavailable {
        /// The role that has no cached characteristic.
        role: CharacteristicRole,
    },

    /// The characteristic was discovered but does not support writes.
    #[error("Characteristic not writable: {role}")]
    CharacteristicNotWritable {
        /// The role whose characteristic lacks write support.
        role: CharacteristicRole,
    },

    /// Invalid data was received or supplied for decoding.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
