//! BLE scanning functionality.
//!
//! Tracks peripherals reported during a scan and decides which one the
//! session should connect to.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::ble::uuids::MOTOR_DEVICE_NAME;

/// Default RSSI threshold in dBm; a peripheral must be strictly stronger.
pub const DEFAULT_RSSI_THRESHOLD: i16 = -70;

/// Stable identity of a peripheral, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Create a new identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A peripheral seen during scanning.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredPeripheral {
    /// Platform identifier.
    pub id: PeripheralId,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// When the peripheral was last reported.
    pub last_seen: DateTime<Utc>,
}

impl DiscoveredPeripheral {
    /// Create a discovery record stamped with the current time.
    pub fn new(id: PeripheralId, name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            id,
            name,
            rssi,
            last_seen: Utc::now(),
        }
    }
}

/// Peripherals discovered during the current scan, deduplicated by identity.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryList {
    peripherals: Vec<DiscoveredPeripheral>,
}

impl DiscoveryList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovery report.
    ///
    /// A repeat report for a known identity refreshes its name, RSSI and
    /// timestamp in place. Returns `true` if the peripheral was new.
    pub fn record(&mut self, peripheral: DiscoveredPeripheral) -> bool {
        if let Some(existing) = self.peripherals.iter_mut().find(|p| p.id == peripheral.id) {
            trace!("Refreshing discovered peripheral {}", peripheral.id);
            if peripheral.name.is_some() {
                existing.name = peripheral.name;
            }
            if peripheral.rssi.is_some() {
                existing.rssi = peripheral.rssi;
            }
            existing.last_seen = peripheral.last_seen;
            return false;
        }

        trace!("New peripheral {} ({:?})", peripheral.id, peripheral.name);
        self.peripherals.push(peripheral);
        true
    }

    /// Get a peripheral by identity.
    pub fn get(&self, id: &PeripheralId) -> Option<&DiscoveredPeripheral> {
        self.peripherals.iter().find(|p| &p.id == id)
    }

    /// All peripherals in discovery order.
    pub fn peripherals(&self) -> &[DiscoveredPeripheral] {
        &self.peripherals
    }

    /// Number of distinct peripherals.
    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    /// Check whether nothing has been discovered.
    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    /// Forget every peripheral.
    pub fn clear(&mut self) {
        self.peripherals.clear();
    }
}

/// Decides which discovered peripheral to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectFilter {
    /// Advertised name that must match exactly.
    pub name: String,
    /// RSSI in dBm the peripheral must strictly exceed.
    pub rssi_threshold: i16,
}

impl Default for ConnectFilter {
    fn default() -> Self {
        Self {
            name: MOTOR_DEVICE_NAME.to_string(),
            rssi_threshold: DEFAULT_RSSI_THRESHOLD,
        }
    }
}

impl ConnectFilter {
    /// Check whether a peripheral should be connected to.
    ///
    /// A peripheral without a name or without an RSSI reading never matches.
    pub fn matches(&self, peripheral: &DiscoveredPeripheral) -> bool {
        let name_matches = peripheral.name.as_deref() == Some(self.name.as_str());
        let strong_enough = peripheral
            .rssi
            .map(|rssi| rssi > self.rssi_threshold)
            .unwrap_or(false);

        name_matches && strong_enough
    }
}
