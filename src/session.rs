//! Motor controller session state machine.
//!
//! [`Session`] owns the scan → connect → discover → write lifecycle for a
//! single peripheral. It is synchronous and single-threaded: platform results
//! are fed in through [`Session::handle_event`] in delivery order, and every
//! outgoing operation is queued on the [`CentralTransport`] without waiting.
//!
//! ```text
//! Disconnected ──start_scan──▶ Scanning ──filter match──▶ Connecting
//!      ▲                          ▲                           │
//!      │                          │                       connected
//!      │                          │                           ▼
//!      └──────── disconnected ────┴──────────────────────  Connected
//! ```
//!
//! A disconnect always lands back in `Scanning`, so reconnection is automatic.

use bytes::Bytes;
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::characteristics::{
    CharacteristicCache, CharacteristicRef, CharacteristicRole, DiscoveredCharacteristic,
};
use crate::ble::connection::ConnectionState;
use crate::ble::scanner::{DiscoveredPeripheral, DiscoveryList, PeripheralId};
use crate::ble::transport::{CentralTransport, PlatformEvent};
use crate::config::SessionConfig;
use crate::data::{Mode, MotorSelect};
use crate::error::{Error, Result};
use crate::protocol::WireValue;

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Event published by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A peripheral connected and GATT discovery finished.
    Connected(PeripheralId),
    /// The connected peripheral went away.
    Disconnected(PeripheralId),
    /// GATT discovery failed; the session waits for the link to drop.
    DiscoveryFailed {
        /// The connected peripheral.
        peripheral: PeripheralId,
        /// Platform description of the failure.
        reason: String,
    },
    /// The peripheral reported a characteristic value.
    ValueUpdated {
        /// The connected peripheral.
        peripheral: PeripheralId,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// The role of the characteristic, if it is one of ours.
        role: Option<CharacteristicRole>,
        /// The reported value.
        value: Bytes,
    },
}

/// Scan/connect/discover/write state machine for one motor controller.
pub struct Session<T: CentralTransport> {
    /// Platform operations.
    transport: T,
    /// Session configuration.
    config: SessionConfig,
    /// Current connection state.
    state: ConnectionState,
    /// Peripherals seen during the current scan.
    discovered: DiscoveryList,
    /// The peripheral being connected to, or the connected one.
    peripheral: Option<PeripheralId>,
    /// Characteristic references for the current connection.
    characteristics: CharacteristicCache,
    /// Services whose characteristic discovery has not completed.
    pending_services: HashSet<Uuid>,
    /// Incremented on every connection; tags characteristic references.
    epoch: u64,
    /// Service filter used by the most recent scan.
    scan_filter: Option<Uuid>,
    /// When the current connect or discovery phase times out.
    deadline: Option<Instant>,
    /// Channel for session events.
    event_tx: broadcast::Sender<SessionEvent>,
    /// Lossless channel for `Connected` and `Disconnected` events.
    lifecycle_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl<T: CentralTransport> Session<T> {
    /// Create a new session in the `Disconnected` state.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            transport,
            config,
            state: ConnectionState::Disconnected,
            discovered: DiscoveryList::new(),
            peripheral: None,
            characteristics: CharacteristicCache::new(),
            pending_services: HashSet::new(),
            epoch: 0,
            scan_filter: None,
            deadline: None,
            event_tx,
            lifecycle_tx: None,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the connected peripheral, if any.
    pub fn connected_peripheral(&self) -> Option<&PeripheralId> {
        if self.state.is_connected() {
            self.peripheral.as_ref()
        } else {
            None
        }
    }

    /// Peripherals seen during the current scan.
    pub fn discovered_peripherals(&self) -> &[DiscoveredPeripheral] {
        self.discovered.peripherals()
    }

    /// Get the cached characteristic for a role.
    pub fn characteristic(&self, role: CharacteristicRole) -> Option<&CharacteristicRef> {
        self.characteristics.get(role)
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Take a lossless stream of `Connected` and `Disconnected` events.
    ///
    /// Unlike [`Session::subscribe`], this stream never lags, so every
    /// connection transition is delivered. A second call replaces the
    /// previous stream.
    pub fn lifecycle_events(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lifecycle_tx = Some(tx);
        rx
    }

    /// Get a sender handle for session events.
    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.event_tx.clone()
    }

    /// When the current connect or discovery phase times out, if bounded.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    // === Lifecycle ===

    /// Start scanning, optionally filtered by advertised service.
    ///
    /// Re-issues the platform scan if already scanning. Ignored while a
    /// peripheral is connected or being connected.
    pub fn start_scan(&mut self, service: Option<Uuid>) {
        if self.state.has_peripheral() {
            debug!("Ignoring scan request while {}", self.state);
            return;
        }

        if self.state != ConnectionState::Scanning {
            self.discovered.clear();
        }

        info!("Starting BLE scan for motor controller");

        self.scan_filter = service;
        self.transport.start_scan(service);
        self.set_state(ConnectionState::Scanning);
    }

    /// Disconnect from the current peripheral and resume scanning.
    ///
    /// Also cancels a connection attempt in progress. Does nothing if there
    /// is no peripheral.
    pub fn disconnect(&mut self) {
        let Some(peripheral) = self.peripheral.clone() else {
            debug!("No peripheral to disconnect");
            return;
        };

        info!("Disconnecting from {}", peripheral);

        self.transport.cancel_connection(&peripheral);
        self.teardown();
        self.start_scan(Some(self.config.service_uuid));
    }

    /// Drop any peripheral and stop scanning, leaving the session idle.
    ///
    /// Unlike [`Session::disconnect`], does not resume scanning.
    pub fn stop(&mut self) {
        if let Some(peripheral) = self.peripheral.clone() {
            info!("Stopping session, disconnecting from {}", peripheral);
            self.transport.cancel_connection(&peripheral);
            self.teardown();
        } else if self.state == ConnectionState::Scanning {
            info!("Stopping BLE scan");
            self.transport.stop_scan();
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Apply a platform event.
    pub fn handle_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::AdapterStateChanged { powered_on } => {
                self.on_adapter_state(powered_on);
            }
            PlatformEvent::Discovered(peripheral) => {
                self.on_discovered(peripheral);
            }
            PlatformEvent::Connected(peripheral) => {
                self.on_connected(peripheral);
            }
            PlatformEvent::ConnectFailed { peripheral, reason } => {
                self.on_connect_failed(peripheral, reason);
            }
            PlatformEvent::Disconnected(peripheral) => {
                self.on_disconnected(peripheral);
            }
            PlatformEvent::ServicesDiscovered { peripheral, result } => {
                self.on_services_discovered(peripheral, result);
            }
            PlatformEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => {
                self.on_characteristics_discovered(peripheral, service, result);
            }
            PlatformEvent::ValueUpdated {
                peripheral,
                characteristic,
                value,
            } => {
                self.on_value_updated(peripheral, characteristic, value);
            }
        }
    }

    /// Abandon a connect or discovery phase whose deadline has passed.
    ///
    /// Returns `true` if the session timed out and went back to scanning.
    pub fn handle_timeout(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return false,
        }

        let Some(peripheral) = self.peripheral.clone() else {
            self.deadline = None;
            return false;
        };

        let phase = if self.state.is_connected() {
            "Discovery"
        } else {
            "Connection"
        };
        warn!("{} timed out for {}, resuming scan", phase, peripheral);

        self.transport.cancel_connection(&peripheral);
        self.teardown();
        self.start_scan(self.scan_filter);

        true
    }

    // === Writes ===

    /// Write the enable flag.
    pub fn try_update_enable(&self, enabled: bool) -> Result<()> {
        self.try_write(CharacteristicRole::Enable, enabled.encode())
    }

    /// Write the setpoint. No range clamping is applied.
    pub fn try_update_setpoint(&self, setpoint: f64) -> Result<()> {
        self.try_write(CharacteristicRole::Setpoint, setpoint.encode())
    }

    /// Write the control mode.
    pub fn try_update_mode(&self, mode: Mode) -> Result<()> {
        self.try_write(CharacteristicRole::Mode, mode.encode())
    }

    /// Write the selected motor.
    pub fn try_update_motor_select(&self, motor: MotorSelect) -> Result<()> {
        self.try_write(CharacteristicRole::MotorSelect, motor.encode())
    }

    /// Write the enable flag, reporting only success or failure.
    pub fn update_enable(&self, enabled: bool) -> bool {
        report(CharacteristicRole::Enable, self.try_update_enable(enabled))
    }

    /// Write the setpoint, reporting only success or failure.
    pub fn update_setpoint(&self, setpoint: f64) -> bool {
        report(CharacteristicRole::Setpoint, self.try_update_setpoint(setpoint))
    }

    /// Write the control mode, reporting only success or failure.
    pub fn update_mode(&self, mode: Mode) -> bool {
        report(CharacteristicRole::Mode, self.try_update_mode(mode))
    }

    /// Write the selected motor, reporting only success or failure.
    pub fn update_motor_select(&self, motor: MotorSelect) -> bool {
        report(
            CharacteristicRole::MotorSelect,
            self.try_update_motor_select(motor),
        )
    }

    /// Dispatch a payload to the characteristic for `role`.
    ///
    /// Success means the write was handed to the platform, not that the
    /// peripheral acknowledged it.
    fn try_write(&self, role: CharacteristicRole, payload: Bytes) -> Result<()> {
        if !self.state.is_connected() {
            return Err(Error::NotConnected);
        }

        let peripheral = self.peripheral.as_ref().ok_or(Error::NotConnected)?;

        let characteristic = self
            .characteristics
            .get(role)
            .filter(|c| c.epoch == self.epoch)
            .ok_or(Error::CharacteristicUnavailable { role })?;

        if !characteristic.is_writable() {
            return Err(Error::CharacteristicNotWritable { role });
        }

        let kind = self.config.write_kinds.get(role);

        trace!(
            "Writing {} bytes to {} characteristic ({:?}): {:02X?}",
            payload.len(),
            role,
            kind,
            &payload[..]
        );

        self.transport.write(peripheral, characteristic, payload, kind);

        Ok(())
    }

    // === Event handlers ===

    fn on_adapter_state(&mut self, powered_on: bool) {
        if !powered_on {
            warn!("Bluetooth adapter powered off");
            if self.state == ConnectionState::Scanning {
                self.set_state(ConnectionState::Disconnected);
            }
            return;
        }

        info!("Bluetooth adapter powered on");

        if self.config.scan_on_power_on && self.state == ConnectionState::Disconnected {
            self.start_scan(Some(self.config.service_uuid));
        }
    }

    fn on_discovered(&mut self, peripheral: DiscoveredPeripheral) {
        let id = peripheral.id.clone();
        self.discovered.record(peripheral);

        if self.state != ConnectionState::Scanning {
            return;
        }

        let Some(candidate) = self.discovered.get(&id) else {
            return;
        };

        if !self.config.connect_filter.matches(candidate) {
            return;
        }

        info!("Connecting to {} (RSSI: {:?} dBm)", id, candidate.rssi);

        self.transport.stop_scan();
        self.transport.connect(&id);
        self.peripheral = Some(id);
        self.deadline = self.config.connect_timeout.map(|t| Instant::now() + t);
        self.set_state(ConnectionState::Connecting);
    }

    fn on_connected(&mut self, peripheral: PeripheralId) {
        if !self.is_current(&peripheral) {
            // A connect that completed after it was cancelled or timed out.
            warn!("Unexpected connection to {}, cancelling", peripheral);
            self.transport.cancel_connection(&peripheral);
            return;
        }

        if self.state != ConnectionState::Connecting {
            debug!("Ignoring connection event for {}", peripheral);
            return;
        }

        self.transport.stop_scan();

        self.epoch += 1;
        self.characteristics.clear();
        self.pending_services.clear();
        self.deadline = self.config.discovery_timeout.map(|t| Instant::now() + t);
        self.set_state(ConnectionState::Connected);

        info!("Connected to {}, discovering services", peripheral);

        self.transport
            .discover_services(&peripheral, Some(self.config.service_uuid));
    }

    fn on_connect_failed(&mut self, peripheral: PeripheralId, reason: String) {
        if self.state != ConnectionState::Connecting || !self.is_current(&peripheral) {
            debug!("Ignoring connection failure for {}", peripheral);
            return;
        }

        warn!("Connection to {} failed: {}", peripheral, reason);

        self.teardown();
        self.start_scan(self.scan_filter);
    }

    fn on_disconnected(&mut self, peripheral: PeripheralId) {
        if !self.is_current(&peripheral) {
            debug!("Ignoring disconnection of {}", peripheral);
            return;
        }

        info!("Disconnected from {}", peripheral);

        self.teardown();
        self.start_scan(self.scan_filter);
    }

    fn on_services_discovered(
        &mut self,
        peripheral: PeripheralId,
        result: std::result::Result<Vec<Uuid>, String>,
    ) {
        if !self.is_connected_to(&peripheral) {
            debug!("Ignoring service discovery for {}", peripheral);
            return;
        }

        let services = match result {
            Ok(services) => services,
            Err(reason) => {
                self.discovery_failed(peripheral, reason);
                return;
            }
        };

        if services.is_empty() {
            let reason = format!("service {} not found", self.config.service_uuid);
            self.discovery_failed(peripheral, reason);
            return;
        }

        for service in services {
            if self.pending_services.insert(service) {
                debug!("Discovering characteristics of service {}", service);
                self.transport.discover_characteristics(&peripheral, service);
            }
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        peripheral: PeripheralId,
        service: Uuid,
        result: std::result::Result<Vec<DiscoveredCharacteristic>, String>,
    ) {
        if !self.is_connected_to(&peripheral) || !self.pending_services.contains(&service) {
            debug!(
                "Ignoring characteristic discovery for {} service {}",
                peripheral, service
            );
            return;
        }

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(reason) => {
                self.discovery_failed(peripheral, reason);
                return;
            }
        };

        for characteristic in &characteristics {
            self.characteristics.insert(characteristic, self.epoch);
        }

        self.pending_services.remove(&service);

        if self.pending_services.is_empty() {
            self.finish_discovery(peripheral);
        }
    }

    fn on_value_updated(&mut self, peripheral: PeripheralId, characteristic: Uuid, value: Bytes) {
        if !self.is_connected_to(&peripheral) {
            return;
        }

        let role = CharacteristicRole::from_uuid(&characteristic);

        trace!(
            "Value update from {} ({:?}): {:02X?}",
            characteristic,
            role,
            &value[..]
        );

        self.publish(SessionEvent::ValueUpdated {
            peripheral,
            characteristic,
            role,
            value,
        });
    }

    // === Internals ===

    fn finish_discovery(&mut self, peripheral: PeripheralId) {
        self.deadline = None;

        if self.characteristics.is_empty() {
            warn!(
                "{} exposes none of the motor characteristics; all writes will fail",
                peripheral
            );
        } else if !self.characteristics.is_complete() {
            warn!(
                "{} is missing characteristics: {:?}; writes to them will fail",
                peripheral,
                self.characteristics.missing_roles()
            );
        }

        info!("Motor controller {} ready", peripheral);

        self.publish(SessionEvent::Connected(peripheral));
    }

    fn discovery_failed(&mut self, peripheral: PeripheralId, reason: String) {
        error!("Discovery failed for {}: {}", peripheral, reason);

        self.pending_services.clear();
        self.deadline = None;

        self.publish(SessionEvent::DiscoveryFailed { peripheral, reason });
    }

    /// Forget the current peripheral and everything discovered on it.
    ///
    /// Publishes `Disconnected` only if the session was connected.
    fn teardown(&mut self) {
        let was_connected = self.state.is_connected();
        let peripheral = self.peripheral.take();

        self.characteristics.clear();
        self.pending_services.clear();
        self.deadline = None;
        self.set_state(ConnectionState::Disconnected);

        if let (true, Some(peripheral)) = (was_connected, peripheral) {
            self.publish(SessionEvent::Disconnected(peripheral));
        }
    }

    fn is_current(&self, peripheral: &PeripheralId) -> bool {
        self.peripheral.as_ref() == Some(peripheral)
    }

    fn is_connected_to(&self, peripheral: &PeripheralId) -> bool {
        self.state.is_connected() && self.is_current(peripheral)
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        let old_state = self.state;
        self.state = new_state;

        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);
            self.publish(SessionEvent::StateChanged(new_state));
        }
    }

    fn publish(&self, event: SessionEvent) {
        if let Some(lifecycle_tx) = &self.lifecycle_tx {
            if matches!(
                event,
                SessionEvent::Connected(_) | SessionEvent::Disconnected(_)
            ) {
                let _ = lifecycle_tx.send(event.clone());
            }
        }
        let _ = self.event_tx.send(event);
    }
}

fn report(role: CharacteristicRole, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to update {}: {}", role, e);
            false
        }
    }
}
