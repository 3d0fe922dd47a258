//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy building blocks used by the
//! session: peripheral discovery, characteristic caching, and the platform
//! transport.

pub mod characteristics;
pub mod connection;
pub mod platform;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use characteristics::{CharacteristicCache, CharacteristicRef, CharacteristicRole};
pub use connection::ConnectionState;
pub use platform::BtleplugTransport;
pub use scanner::{ConnectFilter, DiscoveredPeripheral, DiscoveryList, PeripheralId};
pub use transport::{CentralTransport, PlatformEvent, WriteKind};
pub use uuids::*;
