//! btleplug-backed platform transport.
//!
//! [`BtleplugTransport`] queues commands for a single worker task that owns
//! the btleplug adapter. The worker runs commands in order, translates
//! adapter events, and reports every outcome as a [`PlatformEvent`].

use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::characteristics::{CharacteristicRef, DiscoveredCharacteristic};
use crate::ble::scanner::{DiscoveredPeripheral, PeripheralId};
use crate::ble::transport::{CentralTransport, PlatformEvent, WriteKind};
use crate::error::{Error, Result};

/// Operation queued for the worker.
#[derive(Debug)]
enum Command {
    StartScan(Option<Uuid>),
    StopScan,
    Connect(PeripheralId),
    CancelConnection(PeripheralId),
    DiscoverServices(PeripheralId, Option<Uuid>),
    DiscoverCharacteristics(PeripheralId, Uuid),
    Write {
        peripheral: PeripheralId,
        characteristic: CharacteristicRef,
        payload: Bytes,
        kind: WriteKind,
    },
}

/// [`CentralTransport`] over the system BLE stack via btleplug.
pub struct BtleplugTransport {
    /// Channel to the worker task.
    command_tx: mpsc::UnboundedSender<Command>,
    /// Handle to the worker task.
    worker: JoinHandle<()>,
}

impl BtleplugTransport {
    /// Create a transport on the first Bluetooth adapter.
    ///
    /// Returns the transport and the receiver for its platform events.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<PlatformEvent>)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a transport on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> (Self, mpsc::UnboundedReceiver<PlatformEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            adapter,
            peripherals: HashMap::new(),
            connecting: HashMap::new(),
            listeners: HashMap::new(),
            event_tx,
        };

        let worker = tokio::spawn(worker.run(command_rx));

        (Self { command_tx, worker }, event_rx)
    }

    fn send(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            warn!("BLE worker stopped, dropping command");
        }
    }
}

impl CentralTransport for BtleplugTransport {
    fn start_scan(&self, service: Option<Uuid>) {
        self.send(Command::StartScan(service));
    }

    fn stop_scan(&self) {
        self.send(Command::StopScan);
    }

    fn connect(&self, peripheral: &PeripheralId) {
        self.send(Command::Connect(peripheral.clone()));
    }

    fn cancel_connection(&self, peripheral: &PeripheralId) {
        self.send(Command::CancelConnection(peripheral.clone()));
    }

    fn discover_services(&self, peripheral: &PeripheralId, service: Option<Uuid>) {
        self.send(Command::DiscoverServices(peripheral.clone(), service));
    }

    fn discover_characteristics(&self, peripheral: &PeripheralId, service: Uuid) {
        self.send(Command::DiscoverCharacteristics(peripheral.clone(), service));
    }

    fn write(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        payload: Bytes,
        kind: WriteKind,
    ) {
        self.send(Command::Write {
            peripheral: peripheral.clone(),
            characteristic: characteristic.clone(),
            payload,
            kind,
        });
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Owns the adapter and executes queued commands.
struct Worker {
    adapter: Adapter,
    /// Peripherals reported by the adapter, by identity.
    peripherals: HashMap<PeripheralId, Peripheral>,
    /// Connect requests in flight, by identity.
    connecting: HashMap<PeripheralId, JoinHandle<()>>,
    /// Notification forwarding tasks, by identity.
    listeners: HashMap<PeripheralId, JoinHandle<()>>,
    event_tx: mpsc::UnboundedSender<PlatformEvent>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut central_events = match self.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to get adapter events: {}", e);
                return;
            }
        };

        // btleplug only reports state changes, so a usable adapter counts as on.
        self.emit(PlatformEvent::AdapterStateChanged { powered_on: true });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = central_events.next() => {
                    self.handle_central_event(event).await;
                }
            }
        }

        for (_, task) in self.connecting.drain().chain(self.listeners.drain()) {
            task.abort();
        }

        debug!("BLE worker ended");
    }

    async fn handle_command(&mut self, command: Command) {
        trace!("BLE command: {:?}", command);

        match command {
            Command::StartScan(service) => {
                let mut filter = ScanFilter::default();
                filter.services = service.into_iter().collect();

                if let Err(e) = self.adapter.start_scan(filter).await {
                    error!("Failed to start scan: {}", e);
                }
            }
            Command::StopScan => {
                if let Err(e) = self.adapter.stop_scan().await {
                    warn!("Failed to stop scan: {}", e);
                }
            }
            Command::Connect(id) => self.connect(id),
            Command::CancelConnection(id) => {
                if let Some(task) = self.connecting.remove(&id) {
                    debug!("Aborting connect request for {}", id);
                    task.abort();
                }
                self.stop_listener(&id);
                if let Some(peripheral) = self.peripherals.get(&id) {
                    if let Err(e) = peripheral.disconnect().await {
                        warn!("Failed to disconnect {}: {}", id, e);
                    }
                }
            }
            Command::DiscoverServices(id, filter) => {
                let result = self.discover_services(&id, filter).await;
                self.emit(PlatformEvent::ServicesDiscovered {
                    peripheral: id,
                    result,
                });
            }
            Command::DiscoverCharacteristics(id, service) => {
                let result = self.characteristics_of(&id, service);
                self.emit(PlatformEvent::CharacteristicsDiscovered {
                    peripheral: id,
                    service,
                    result,
                });
            }
            Command::Write {
                peripheral,
                characteristic,
                payload,
                kind,
            } => {
                self.write(&peripheral, &characteristic, &payload, kind)
                    .await;
            }
        }
    }

    /// Connect on a separate task so cancellation is not queued behind it.
    fn connect(&mut self, id: PeripheralId) {
        let Some(peripheral) = self.peripherals.get(&id).cloned() else {
            self.emit(PlatformEvent::ConnectFailed {
                peripheral: id,
                reason: "peripheral not discovered".to_string(),
            });
            return;
        };

        let event_tx = self.event_tx.clone();
        let task_id = id.clone();

        let task = tokio::spawn(async move {
            let event = match peripheral.connect().await {
                Ok(()) => PlatformEvent::Connected(id),
                Err(e) => PlatformEvent::ConnectFailed {
                    peripheral: id,
                    reason: e.to_string(),
                },
            };
            let _ = event_tx.send(event);
        });

        if let Some(previous) = self.connecting.insert(task_id, task) {
            previous.abort();
        }
    }

    async fn discover_services(
        &mut self,
        id: &PeripheralId,
        filter: Option<Uuid>,
    ) -> std::result::Result<Vec<Uuid>, String> {
        let peripheral = self
            .peripherals
            .get(id)
            .cloned()
            .ok_or_else(|| format!("unknown peripheral {}", id))?;

        // The connect request that led here has completed.
        self.connecting.remove(id);

        peripheral
            .discover_services()
            .await
            .map_err(|e| e.to_string())?;

        self.start_listener(id, peripheral.clone());

        Ok(peripheral
            .services()
            .iter()
            .map(|service| service.uuid)
            .filter(|uuid| filter.map_or(true, |f| *uuid == f))
            .collect())
    }

    fn characteristics_of(
        &self,
        id: &PeripheralId,
        service: Uuid,
    ) -> std::result::Result<Vec<DiscoveredCharacteristic>, String> {
        let peripheral = self
            .peripherals
            .get(id)
            .ok_or_else(|| format!("unknown peripheral {}", id))?;

        peripheral
            .services()
            .iter()
            .find(|s| s.uuid == service)
            .map(|s| {
                s.characteristics
                    .iter()
                    .map(DiscoveredCharacteristic::from)
                    .collect()
            })
            .ok_or_else(|| format!("service {} not found", service))
    }

    async fn write(
        &self,
        id: &PeripheralId,
        characteristic: &CharacteristicRef,
        payload: &[u8],
        kind: WriteKind,
    ) {
        let Some(peripheral) = self.peripherals.get(id) else {
            warn!("Write to unknown peripheral {}", id);
            return;
        };

        let target = peripheral.characteristics().into_iter().find(|c| {
            c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid
        });

        let Some(target) = target else {
            warn!("{} characteristic no longer present on {}", characteristic.role, id);
            return;
        };

        match peripheral.write(&target, payload, kind.into()).await {
            Ok(()) => trace!(
                "Wrote {} bytes to {} characteristic",
                payload.len(),
                characteristic.role
            ),
            Err(e) => warn!("Write to {} characteristic failed: {}", characteristic.role, e),
        }
    }

    /// Forward characteristic notifications from a connected peripheral.
    fn start_listener(&mut self, id: &PeripheralId, peripheral: Peripheral) {
        self.stop_listener(id);

        let event_tx = self.event_tx.clone();
        let listener_id = id.clone();

        let handle = tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                let event = PlatformEvent::ValueUpdated {
                    peripheral: listener_id.clone(),
                    characteristic: notification.uuid,
                    value: Bytes::from(notification.value),
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }

            debug!("Notification listener for {} stopped", listener_id);
        });

        self.listeners.insert(id.clone(), handle);
    }

    fn stop_listener(&mut self, id: &PeripheralId) {
        if let Some(handle) = self.listeners.remove(id) {
            handle.abort();
        }
    }

    async fn handle_central_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                self.report_peripheral(id).await;
            }
            CentralEvent::DeviceConnected(id) => {
                // Connections are reported from the connect request itself.
                debug!("Device connected: {:?}", id);
            }
            CentralEvent::DeviceDisconnected(id) => {
                let id = PeripheralId::new(id.to_string());
                debug!("Device disconnected: {}", id);
                self.stop_listener(&id);
                self.emit(PlatformEvent::Disconnected(id));
            }
            CentralEvent::StateUpdate(state) => {
                self.emit(PlatformEvent::AdapterStateChanged {
                    powered_on: matches!(state, CentralState::PoweredOn),
                });
            }
            _ => {}
        }
    }

    async fn report_peripheral(&mut self, id: btleplug::platform::PeripheralId) {
        let peripheral = match self.adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let identifier = PeripheralId::new(id.to_string());
        self.peripherals.insert(identifier.clone(), peripheral);

        self.emit(PlatformEvent::Discovered(DiscoveredPeripheral::new(
            identifier,
            properties.local_name,
            properties.rssi,
        )));
    }

    fn emit(&self, event: PlatformEvent) {
        let _ = self.event_tx.send(event);
    }
}
