//! End-to-end tests driving a `SessionManager` through a scripted transport.

use btleplug::api::CharPropFlags;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tmotor_ble::ble::characteristics::DiscoveredCharacteristic;
use tmotor_ble::ble::uuids::*;
use tmotor_ble::protocol::{decode_f64, decode_int};
use tmotor_ble::{
    CentralTransport, CharacteristicRef, CharacteristicRole, ConnectionState,
    DiscoveredPeripheral, Mode, MotorSelect, PeripheralId, PlatformEvent, SessionConfig,
    SessionManager, WriteKind,
};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, PartialEq)]
enum Call {
    StartScan(Option<Uuid>),
    StopScan,
    Connect(PeripheralId),
    Cancel(PeripheralId),
    DiscoverServices(PeripheralId),
    DiscoverCharacteristics(Uuid),
    Write(CharacteristicRole, Bytes, WriteKind),
}

/// Transport that reports every operation on a channel instead of touching
/// a radio.
struct ScriptedTransport {
    calls: mpsc::UnboundedSender<Call>,
}

impl ScriptedTransport {
    fn record(&self, call: Call) {
        let _ = self.calls.send(call);
    }
}

impl CentralTransport for ScriptedTransport {
    fn start_scan(&self, service: Option<Uuid>) {
        self.record(Call::StartScan(service));
    }

    fn stop_scan(&self) {
        self.record(Call::StopScan);
    }

    fn connect(&self, peripheral: &PeripheralId) {
        self.record(Call::Connect(peripheral.clone()));
    }

    fn cancel_connection(&self, peripheral: &PeripheralId) {
        self.record(Call::Cancel(peripheral.clone()));
    }

    fn discover_services(&self, peripheral: &PeripheralId, _service: Option<Uuid>) {
        self.record(Call::DiscoverServices(peripheral.clone()));
    }

    fn discover_characteristics(&self, _peripheral: &PeripheralId, service: Uuid) {
        self.record(Call::DiscoverCharacteristics(service));
    }

    fn write(
        &self,
        _peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        value: Bytes,
        kind: WriteKind,
    ) {
        self.record(Call::Write(characteristic.role, value, kind));
    }
}

struct Harness {
    manager: SessionManager<ScriptedTransport>,
    platform: mpsc::UnboundedSender<PlatformEvent>,
    calls: mpsc::UnboundedReceiver<Call>,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let (calls_tx, calls) = mpsc::unbounded_channel();
        let (platform, events) = mpsc::unbounded_channel();
        let transport = ScriptedTransport { calls: calls_tx };

        Self {
            manager: SessionManager::with_transport(transport, events, config),
            platform,
            calls,
        }
    }

    fn send(&self, event: PlatformEvent) {
        self.platform.send(event).expect("event loop stopped");
    }

    async fn next_call(&mut self) -> Call {
        tokio::time::timeout(WAIT, self.calls.recv())
            .await
            .expect("timed out waiting for a transport call")
            .expect("transport dropped")
    }

    async fn expect_calls(&mut self, expected: &[Call]) {
        for call in expected {
            assert_eq!(&self.next_call().await, call);
        }
    }

    fn advertise(&self, id: &str, name: &str, rssi: i16) {
        self.send(PlatformEvent::Discovered(DiscoveredPeripheral::new(
            PeripheralId::from(id),
            Some(name.to_string()),
            Some(rssi),
        )));
    }

    /// Walk a peripheral from advertisement to a fully discovered GATT table.
    async fn connect(&mut self, id: &str) {
        let peripheral = PeripheralId::from(id);

        self.advertise(id, MOTOR_DEVICE_NAME, -60);
        self.expect_calls(&[Call::StopScan, Call::Connect(peripheral.clone())])
            .await;

        self.send(PlatformEvent::Connected(peripheral.clone()));
        self.expect_calls(&[Call::StopScan, Call::DiscoverServices(peripheral.clone())])
            .await;

        self.send(PlatformEvent::ServicesDiscovered {
            peripheral: peripheral.clone(),
            result: Ok(vec![MOTOR_SERVICE_UUID]),
        });
        self.expect_calls(&[Call::DiscoverCharacteristics(MOTOR_SERVICE_UUID)])
            .await;

        let characteristics = CharacteristicRole::ALL
            .iter()
            .map(|role| {
                DiscoveredCharacteristic::new(
                    role.uuid(),
                    MOTOR_SERVICE_UUID,
                    CharPropFlags::READ | CharPropFlags::WRITE | CharPropFlags::NOTIFY,
                )
            })
            .collect();

        self.send(PlatformEvent::CharacteristicsDiscovered {
            peripheral,
            service: MOTOR_SERVICE_UUID,
            result: Ok(characteristics),
        });
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    let result = tokio::time::timeout(QUIET, rx.recv()).await;
    assert!(result.is_err(), "unexpected message: {:?}", result);
}

#[tokio::test]
async fn test_full_lifecycle_fires_callbacks_once() {
    let mut h = Harness::new(SessionConfig::default());

    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let (disconnected_tx, mut disconnected) = mpsc::unbounded_channel();
    let _on_connect = h.manager.on_connect(move |p| {
        let _ = connected_tx.send(p.clone());
    });
    let _on_disconnect = h.manager.on_disconnect(move |p| {
        let _ = disconnected_tx.send(p.clone());
    });

    h.send(PlatformEvent::AdapterStateChanged { powered_on: true });
    h.expect_calls(&[Call::StartScan(Some(MOTOR_SERVICE_UUID))])
        .await;

    h.connect("motor-1").await;
    assert_eq!(recv(&mut connected).await, PeripheralId::from("motor-1"));
    assert_quiet(&mut connected).await;

    assert!(h.manager.is_connected());
    assert_eq!(
        h.manager.connected_peripheral(),
        Some(PeripheralId::from("motor-1"))
    );

    h.send(PlatformEvent::Disconnected(PeripheralId::from("motor-1")));
    assert_eq!(recv(&mut disconnected).await, PeripheralId::from("motor-1"));
    h.expect_calls(&[Call::StartScan(Some(MOTOR_SERVICE_UUID))])
        .await;
    assert_quiet(&mut disconnected).await;

    assert_eq!(h.manager.state(), ConnectionState::Scanning);
    assert!(!h.manager.update_enable(true));

    // Same peripheral comes back and is picked up without any caller action.
    h.connect("motor-1").await;
    assert_eq!(recv(&mut connected).await, PeripheralId::from("motor-1"));
}

#[tokio::test]
async fn test_callbacks_survive_notification_bursts() {
    let mut h = Harness::new(SessionConfig::default());

    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let (disconnected_tx, mut disconnected) = mpsc::unbounded_channel();
    let _on_connect = h.manager.on_connect(move |p| {
        let _ = connected_tx.send(p.clone());
    });
    let _on_disconnect = h.manager.on_disconnect(move |p| {
        let _ = disconnected_tx.send(p.clone());
    });

    h.manager.start_scan(Some(MOTOR_SERVICE_UUID));
    h.expect_calls(&[Call::StartScan(Some(MOTOR_SERVICE_UUID))])
        .await;
    h.connect("motor-1").await;

    // Flood the session before any callback has had a chance to run.
    for i in 0..100 {
        h.send(PlatformEvent::ValueUpdated {
            peripheral: PeripheralId::from("motor-1"),
            characteristic: SETPOINT_CHARACTERISTIC_UUID,
            value: Bytes::copy_from_slice(&f64::from(i).to_le_bytes()),
        });
    }
    h.send(PlatformEvent::Disconnected(PeripheralId::from("motor-1")));
    for i in 0..100 {
        h.send(PlatformEvent::ValueUpdated {
            peripheral: PeripheralId::from("motor-1"),
            characteristic: SETPOINT_CHARACTERISTIC_UUID,
            value: Bytes::copy_from_slice(&f64::from(i).to_le_bytes()),
        });
    }

    assert_eq!(recv(&mut connected).await, PeripheralId::from("motor-1"));
    assert_eq!(recv(&mut disconnected).await, PeripheralId::from("motor-1"));
    assert_quiet(&mut connected).await;
    assert_quiet(&mut disconnected).await;
}

#[tokio::test]
async fn test_writes_reach_the_transport_once_ready() {
    let mut h = Harness::new(SessionConfig::default());

    assert!(!h.manager.update_setpoint(1.0));

    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let _on_connect = h.manager.on_connect(move |p| {
        let _ = connected_tx.send(p.clone());
    });

    h.manager.start_scan(Some(MOTOR_SERVICE_UUID));
    h.expect_calls(&[Call::StartScan(Some(MOTOR_SERVICE_UUID))])
        .await;
    h.connect("motor-1").await;
    recv(&mut connected).await;

    assert!(h.manager.update_setpoint(-3.5));
    assert!(h.manager.update_mode(Mode::Torque));
    assert!(h.manager.update_motor_select(MotorSelect::Right));
    assert!(h.manager.update_enable(true));

    match h.next_call().await {
        Call::Write(CharacteristicRole::Setpoint, value, WriteKind::WithResponse) => {
            assert_eq!(decode_f64(&value).unwrap(), -3.5);
        }
        other => panic!("unexpected call: {:?}", other),
    }
    match h.next_call().await {
        Call::Write(CharacteristicRole::Mode, value, _) => {
            assert_eq!(decode_int(&value).unwrap(), 2);
        }
        other => panic!("unexpected call: {:?}", other),
    }
    match h.next_call().await {
        Call::Write(CharacteristicRole::MotorSelect, value, _) => {
            assert_eq!(decode_int(&value).unwrap(), 1);
        }
        other => panic!("unexpected call: {:?}", other),
    }
    match h.next_call().await {
        Call::Write(CharacteristicRole::Enable, value, _) => {
            assert_eq!(decode_int(&value).unwrap(), 1);
        }
        other => panic!("unexpected call: {:?}", other),
    }
}

#[tokio::test]
async fn test_weak_and_unnamed_peripherals_are_skipped() {
    let mut h = Harness::new(SessionConfig::default());

    h.manager.start_scan(None);
    h.expect_calls(&[Call::StartScan(None)]).await;

    h.advertise("far-away", MOTOR_DEVICE_NAME, -75);
    h.advertise("stranger", "Thermometer", -40);
    h.advertise("motor-2", MOTOR_DEVICE_NAME, -50);

    h.expect_calls(&[Call::StopScan, Call::Connect(PeripheralId::from("motor-2"))])
        .await;

    assert_eq!(h.manager.state(), ConnectionState::Connecting);
    assert_eq!(h.manager.discovered_peripherals().len(), 3);
}

#[tokio::test]
async fn test_explicit_disconnect_rescans_without_duplicate_callback() {
    let mut h = Harness::new(SessionConfig::default());

    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let (disconnected_tx, mut disconnected) = mpsc::unbounded_channel();
    let _on_connect = h.manager.on_connect(move |p| {
        let _ = connected_tx.send(p.clone());
    });
    let _on_disconnect = h.manager.on_disconnect(move |p| {
        let _ = disconnected_tx.send(p.clone());
    });

    h.manager.start_scan(Some(MOTOR_SERVICE_UUID));
    h.expect_calls(&[Call::StartScan(Some(MOTOR_SERVICE_UUID))])
        .await;
    h.connect("motor-1").await;
    recv(&mut connected).await;

    h.manager.disconnect();
    h.expect_calls(&[
        Call::Cancel(PeripheralId::from("motor-1")),
        Call::StartScan(Some(MOTOR_SERVICE_UUID)),
    ])
    .await;
    assert_eq!(recv(&mut disconnected).await, PeripheralId::from("motor-1"));

    // The platform confirms the disconnect after the session already moved on.
    h.send(PlatformEvent::Disconnected(PeripheralId::from("motor-1")));
    assert_quiet(&mut disconnected).await;

    assert_eq!(h.manager.state(), ConnectionState::Scanning);
    assert!(h.manager.characteristic(CharacteristicRole::Enable).is_none());
}

#[tokio::test]
async fn test_connect_timeout_resumes_scanning() {
    let config = SessionConfig::default().with_connect_timeout(Duration::from_millis(50));
    let mut h = Harness::new(config);

    h.manager.start_scan(Some(MOTOR_SERVICE_UUID));
    h.expect_calls(&[Call::StartScan(Some(MOTOR_SERVICE_UUID))])
        .await;

    h.advertise("motor-1", MOTOR_DEVICE_NAME, -60);
    h.expect_calls(&[
        Call::StopScan,
        Call::Connect(PeripheralId::from("motor-1")),
        Call::Cancel(PeripheralId::from("motor-1")),
        Call::StartScan(Some(MOTOR_SERVICE_UUID)),
    ])
    .await;

    assert_eq!(h.manager.state(), ConnectionState::Scanning);
}

#[tokio::test]
async fn test_discovery_failure_is_published() {
    let mut h = Harness::new(SessionConfig::default());
    let mut events = h.manager.subscribe();

    h.manager.start_scan(Some(MOTOR_SERVICE_UUID));
    h.expect_calls(&[Call::StartScan(Some(MOTOR_SERVICE_UUID))])
        .await;

    let peripheral = PeripheralId::from("motor-1");
    h.advertise("motor-1", MOTOR_DEVICE_NAME, -60);
    h.expect_calls(&[Call::StopScan, Call::Connect(peripheral.clone())])
        .await;
    h.send(PlatformEvent::Connected(peripheral.clone()));
    h.expect_calls(&[Call::StopScan, Call::DiscoverServices(peripheral.clone())])
        .await;
    h.send(PlatformEvent::ServicesDiscovered {
        peripheral: peripheral.clone(),
        result: Err("GATT error".to_string()),
    });

    let failure = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(tmotor_ble::SessionEvent::DiscoveryFailed { peripheral, reason }) => {
                    break (peripheral, reason)
                }
                Ok(_) => continue,
                Err(e) => panic!("event channel error: {}", e),
            }
        }
    })
    .await
    .expect("no discovery failure published");

    assert_eq!(failure, (peripheral, "GATT error".to_string()));
    assert!(!h.manager.update_mode(Mode::Position));
}

#[tokio::test]
async fn test_shutdown_stops_scanning() {
    let mut h = Harness::new(SessionConfig::default());

    h.manager.start_scan(None);
    h.expect_calls(&[Call::StartScan(None)]).await;

    tokio_test::assert_ok!(h.manager.shutdown().await);
    h.expect_calls(&[Call::StopScan]).await;

    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
}
