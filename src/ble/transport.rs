//! Platform BLE transport abstraction.
//!
//! The session drives the platform through [`CentralTransport`], whose
//! operations are fire-and-forget. Their outcomes come back later as
//! [`PlatformEvent`]s, delivered in order on a single channel.

use btleplug::api::WriteType;
use bytes::Bytes;
use uuid::Uuid;

use crate::ble::characteristics::{CharacteristicRef, DiscoveredCharacteristic};
use crate::ble::scanner::{DiscoveredPeripheral, PeripheralId};

/// How a characteristic write is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteKind {
    /// Request a write acknowledgement from the peripheral.
    #[default]
    WithResponse,
    /// Send without acknowledgement.
    WithoutResponse,
}

impl From<WriteKind> for WriteType {
    fn from(kind: WriteKind) -> Self {
        match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        }
    }
}

/// Central-role operations consumed from the platform BLE stack.
///
/// Implementations must not block; each call only queues the operation.
#[cfg_attr(test, mockall::automock)]
pub trait CentralTransport: Send + 'static {
    /// Begin scanning with duplicate reports, optionally filtered by service.
    fn start_scan(&self, service: Option<Uuid>);

    /// Stop scanning.
    fn stop_scan(&self);

    /// Request a connection to a discovered peripheral.
    fn connect(&self, peripheral: &PeripheralId);

    /// Cancel a pending or established connection.
    fn cancel_connection(&self, peripheral: &PeripheralId);

    /// Discover services of a connected peripheral, optionally filtered.
    fn discover_services(&self, peripheral: &PeripheralId, service: Option<Uuid>);

    /// Discover every characteristic of one service.
    fn discover_characteristics(&self, peripheral: &PeripheralId, service: Uuid);

    /// Write a payload to a characteristic.
    fn write(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        payload: Bytes,
        kind: WriteKind,
    );
}

/// Event reported by the platform BLE stack.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// The adapter was powered on or off.
    AdapterStateChanged {
        /// Whether the adapter is now powered on.
        powered_on: bool,
    },
    /// A peripheral was seen while scanning. Repeats are expected.
    Discovered(DiscoveredPeripheral),
    /// A connection request completed.
    Connected(PeripheralId),
    /// A connection request failed.
    ConnectFailed {
        /// The peripheral that could not be connected.
        peripheral: PeripheralId,
        /// Platform description of the failure.
        reason: String,
    },
    /// A peripheral disconnected, either on request or through link loss.
    Disconnected(PeripheralId),
    /// Service discovery completed.
    ServicesDiscovered {
        /// The peripheral that was queried.
        peripheral: PeripheralId,
        /// Discovered service UUIDs, or the platform error.
        result: Result<Vec<Uuid>, String>,
    },
    /// Characteristic discovery for one service completed.
    CharacteristicsDiscovered {
        /// The peripheral that was queried.
        peripheral: PeripheralId,
        /// The service whose characteristics were discovered.
        service: Uuid,
        /// Discovered characteristics, or the platform error.
        result: Result<Vec<DiscoveredCharacteristic>, String>,
    },
    /// A characteristic value changed on the peripheral.
    ValueUpdated {
        /// The peripheral that sent the value.
        peripheral: PeripheralId,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// The new value.
        value: Bytes,
    },
}
