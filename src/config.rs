//! Session configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicRole;
use crate::ble::scanner::ConnectFilter;
use crate::ble::transport::WriteKind;
use crate::ble::uuids::MOTOR_SERVICE_UUID;

/// Write kind used for each characteristic role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteKinds {
    /// Enable characteristic.
    pub enable: WriteKind,
    /// Setpoint characteristic.
    pub setpoint: WriteKind,
    /// Mode characteristic.
    pub mode: WriteKind,
    /// Motor select characteristic.
    pub motor_select: WriteKind,
}

impl WriteKinds {
    /// Get the write kind for a role.
    pub fn get(&self, role: CharacteristicRole) -> WriteKind {
        match role {
            CharacteristicRole::Enable => self.enable,
            CharacteristicRole::Setpoint => self.setpoint,
            CharacteristicRole::Mode => self.mode,
            CharacteristicRole::MotorSelect => self.motor_select,
        }
    }

    /// Set the write kind for a role.
    pub fn set(&mut self, role: CharacteristicRole, kind: WriteKind) {
        match role {
            CharacteristicRole::Enable => self.enable = kind,
            CharacteristicRole::Setpoint => self.setpoint = kind,
            CharacteristicRole::Mode => self.mode = kind,
            CharacteristicRole::MotorSelect => self.motor_select = kind,
        }
    }
}

/// Configuration for a motor controller session.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Which discovered peripheral to connect to.
    pub connect_filter: ConnectFilter,
    /// Service discovered after connecting, and used to filter re-scans.
    pub service_uuid: Uuid,
    /// Write kind per characteristic.
    pub write_kinds: WriteKinds,
    /// Give up on a connection attempt after this long. `None` waits forever.
    pub connect_timeout: Option<Duration>,
    /// Give up on GATT discovery after this long. `None` waits forever.
    pub discovery_timeout: Option<Duration>,
    /// Start scanning when the adapter reports it has powered on.
    pub scan_on_power_on: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_filter: ConnectFilter::default(),
            service_uuid: MOTOR_SERVICE_UUID,
            write_kinds: WriteKinds::default(),
            connect_timeout: None,
            discovery_timeout: None,
            scan_on_power_on: true,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised name to connect to.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.connect_filter.name = name.into();
        self
    }

    /// Set the RSSI threshold in dBm.
    pub fn with_rssi_threshold(mut self, threshold: i16) -> Self {
        self.connect_filter.rssi_threshold = threshold;
        self
    }

    /// Set the write kind for one characteristic.
    pub fn with_write_kind(mut self, role: CharacteristicRole, kind: WriteKind) -> Self {
        self.write_kinds.set(role, kind);
        self
    }

    /// Bound the connecting phase.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bound the GATT discovery phase.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = Some(timeout);
        self
    }

    /// Enable or disable scanning on adapter power-on.
    pub fn with_scan_on_power_on(mut self, enabled: bool) -> Self {
        self.scan_on_power_on = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::scanner::DEFAULT_RSSI_THRESHOLD;
    use crate::ble::uuids::MOTOR_DEVICE_NAME;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.connect_filter, ConnectFilter::default());
        assert_eq!(config.connect_filter.name, MOTOR_DEVICE_NAME);
        assert_eq!(config.connect_filter.rssi_threshold, DEFAULT_RSSI_THRESHOLD);
        assert_eq!(config.service_uuid, MOTOR_SERVICE_UUID);
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.discovery_timeout, None);
        assert!(config.scan_on_power_on);
        for role in CharacteristicRole::ALL {
            assert_eq!(config.write_kinds.get(role), WriteKind::WithResponse);
        }
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new()
            .with_device_name("BENCH")
            .with_rssi_threshold(-60)
            .with_write_kind(CharacteristicRole::Mode, WriteKind::WithoutResponse)
            .with_connect_timeout(Duration::from_secs(5))
            .with_scan_on_power_on(false);

        assert_eq!(config.connect_filter.name, "BENCH");
        assert_eq!(config.connect_filter.rssi_threshold, -60);
        assert_eq!(
            config.write_kinds.get(CharacteristicRole::Mode),
            WriteKind::WithoutResponse
        );
        assert_eq!(
            config.write_kinds.get(CharacteristicRole::Enable),
            WriteKind::WithResponse
        );
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
        assert!(!config.scan_on_power_on);
    }
}
