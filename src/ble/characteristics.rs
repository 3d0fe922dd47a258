//! GATT characteristic handling.
//!
//! Maps discovered characteristics onto the four roles the motor controller
//! exposes and caches the resulting references for the current connection.

use btleplug::api::CharPropFlags;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::uuids::*;

/// The role a characteristic plays in the motor control service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CharacteristicRole {
    /// Motor enable flag.
    Enable,
    /// Motor setpoint.
    Setpoint,
    /// Control mode.
    Mode,
    /// Selected motor.
    MotorSelect,
}

impl CharacteristicRole {
    /// All roles.
    pub const ALL: [CharacteristicRole; 4] = [
        CharacteristicRole::Enable,
        CharacteristicRole::Setpoint,
        CharacteristicRole::Mode,
        CharacteristicRole::MotorSelect,
    ];

    /// Resolve a characteristic UUID to its role.
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        match *uuid {
            ENABLE_CHARACTERISTIC_UUID => Some(Self::Enable),
            SETPOINT_CHARACTERISTIC_UUID => Some(Self::Setpoint),
            MODE_CHARACTERISTIC_UUID => Some(Self::Mode),
            MOTOR_SELECT_CHARACTERISTIC_UUID => Some(Self::MotorSelect),
            _ => None,
        }
    }

    /// The characteristic UUID for this role.
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Enable => ENABLE_CHARACTERISTIC_UUID,
            Self::Setpoint => SETPOINT_CHARACTERISTIC_UUID,
            Self::Mode => MODE_CHARACTERISTIC_UUID,
            Self::MotorSelect => MOTOR_SELECT_CHARACTERISTIC_UUID,
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Enable => 0,
            Self::Setpoint => 1,
            Self::Mode => 2,
            Self::MotorSelect => 3,
        }
    }
}

impl std::fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enable => write!(f, "enable"),
            Self::Setpoint => write!(f, "setpoint"),
            Self::Mode => write!(f, "mode"),
            Self::MotorSelect => write!(f, "motor-select"),
        }
    }
}

/// A characteristic as reported by the platform during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the service the characteristic belongs to.
    pub service_uuid: Uuid,
    /// Capability flags.
    pub properties: CharPropFlags,
}

impl DiscoveredCharacteristic {
    /// Create a new discovered characteristic.
    pub fn new(uuid: Uuid, service_uuid: Uuid, properties: CharPropFlags) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
        }
    }
}

impl From<&btleplug::api::Characteristic> for DiscoveredCharacteristic {
    fn from(characteristic: &btleplug::api::Characteristic) -> Self {
        Self::new(
            characteristic.uuid,
            characteristic.service_uuid,
            characteristic.properties,
        )
    }
}

/// A cached reference to a characteristic, valid for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRef {
    /// The role this characteristic fills.
    pub role: CharacteristicRole,
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Capability flags.
    pub properties: CharPropFlags,
    /// Connection epoch the reference was discovered under.
    pub epoch: u64,
}

impl CharacteristicRef {
    /// Check whether the characteristic accepts writes of either kind.
    pub fn is_writable(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
    }
}

/// The four characteristic slots for the current connection.
#[derive(Debug, Clone, Default)]
pub struct CharacteristicCache {
    slots: [Option<CharacteristicRef>; 4],
}

impl CharacteristicCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache a discovered characteristic if its UUID is one of the known roles.
    ///
    /// Returns the role it was cached under, or `None` for unknown UUIDs.
    pub fn insert(
        &mut self,
        characteristic: &DiscoveredCharacteristic,
        epoch: u64,
    ) -> Option<CharacteristicRole> {
        let Some(role) = CharacteristicRole::from_uuid(&characteristic.uuid) else {
            trace!(
                "Ignoring unknown characteristic {} in service {}",
                characteristic.uuid,
                characteristic.service_uuid
            );
            return None;
        };

        debug!(
            "Found {} characteristic, properties: {:?}",
            role, characteristic.properties
        );

        self.slots[role.index()] = Some(CharacteristicRef {
            role,
            uuid: characteristic.uuid,
            service_uuid: characteristic.service_uuid,
            properties: characteristic.properties,
            epoch,
        });

        Some(role)
    }

    /// Get the cached reference for a role.
    pub fn get(&self, role: CharacteristicRole) -> Option<&CharacteristicRef> {
        self.slots[role.index()].as_ref()
    }

    /// Roles that have no cached reference.
    pub fn missing_roles(&self) -> Vec<CharacteristicRole> {
        CharacteristicRole::ALL
            .into_iter()
            .filter(|role| self.get(*role).is_none())
            .collect()
    }

    /// Check whether every role is cached.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Check whether no role is cached.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Drop every cached reference.
    pub fn clear(&mut self) {
        self.slots = Default::default();
    }
}
