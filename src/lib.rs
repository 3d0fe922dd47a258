// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # tmotor-ble
//!
//! A cross-platform Rust library for driving a BLE motor controller that
//! exposes the TMOTOR control service.
//!
//! The library scans for the controller, connects automatically once it is
//! close enough, discovers its four control characteristics, and sends typed
//! values to them. Link loss and explicit disconnects both fall back to
//! scanning, so the controller is picked up again as soon as it reappears.
//!
//! ## Features
//!
//! - **Automatic connection**: connect to the first `TMOTOR` peripheral
//!   stronger than a configurable RSSI threshold
//! - **Typed writes**: enable flag, setpoint, control mode, motor selection
//! - **Lifecycle callbacks**: `on_connect` / `on_disconnect`
//! - **Automatic reconnection**: no backoff, no retry limit
//! - **Optional timeouts**: bound the connect and discovery phases
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tmotor_ble::{Mode, Result, SessionConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = SessionManager::new(SessionConfig::default()).await?;
//!
//!     let _connected = manager.on_connect(|peripheral| {
//!         println!("Motor controller {} ready", peripheral);
//!     });
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!
//!     if manager.update_mode(Mode::Velocity) && manager.update_setpoint(1.5) {
//!         manager.update_enable(true);
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Wire Format
//!
//! Integer values (enable, mode, motor select) are 8-byte little-endian
//! integers; setpoints are 8-byte little-endian IEEE-754 doubles. See
//! [`protocol::wire`].
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration and value types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod session;
pub mod session_manager;

// Re-exports for convenience
pub use config::{SessionConfig, WriteKinds};
pub use error::{Error, Result};
pub use session::{Session, SessionEvent};
pub use session_manager::{CallbackHandle, SessionManager};

// Re-export commonly used types from submodules
pub use ble::characteristics::{CharacteristicRef, CharacteristicRole};
pub use ble::connection::ConnectionState;
pub use ble::platform::BtleplugTransport;
pub use ble::scanner::{ConnectFilter, DiscoveredPeripheral, PeripheralId};
pub use ble::transport::{CentralTransport, PlatformEvent, WriteKind};
pub use data::{Mode, MotorSelect, SetpointRange};
