//! Session manager for a motor controller.
//!
//! [`SessionManager`] is the handle a front end owns. It runs the
//! [`Session`] state machine on a background task, serializes platform events
//! and caller operations through one lock, and turns connection transitions
//! into `on_connect` / `on_disconnect` callbacks.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::characteristics::{CharacteristicRef, CharacteristicRole};
use crate::ble::connection::ConnectionState;
use crate::ble::platform::BtleplugTransport;
use crate::ble::scanner::{DiscoveredPeripheral, PeripheralId};
use crate::ble::transport::{CentralTransport, PlatformEvent};
use crate::config::SessionConfig;
use crate::data::{Mode, MotorSelect};
use crate::error::Result;
use crate::session::{Session, SessionEvent};

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Registered lifecycle callbacks, in registration order.
type CallbackRegistry = Arc<Mutex<BTreeMap<u64, Arc<dyn Fn(&SessionEvent) + Send + Sync>>>>;

/// Owns one motor controller session and mediates every write to it.
///
/// Create one per hosting screen or application session and pass it to the
/// components that need it. Must be created inside a tokio runtime.
pub struct SessionManager<T: CentralTransport = BtleplugTransport> {
    /// The state machine, shared with the event loop.
    session: Arc<Mutex<Session<T>>>,
    /// Session event channel.
    event_tx: broadcast::Sender<SessionEvent>,
    /// Lifecycle callbacks.
    callbacks: CallbackRegistry,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Event loop task handle.
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager<BtleplugTransport> {
    /// Create a session manager on the system Bluetooth adapter.
    ///
    /// Scanning starts once the adapter reports it is powered on, unless
    /// [`SessionConfig::scan_on_power_on`] is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(config: SessionConfig) -> Result<Self> {
        let (transport, events) = BtleplugTransport::new().await?;
        Ok(Self::with_transport(transport, events, config))
    }
}

impl<T: CentralTransport> SessionManager<T> {
    /// Create a session manager over any transport.
    ///
    /// `events` must carry the transport's platform events in delivery order.
    pub fn with_transport(
        transport: T,
        events: mpsc::UnboundedReceiver<PlatformEvent>,
        config: SessionConfig,
    ) -> Self {
        let mut session = Session::new(transport, config);
        let event_tx = session.event_sender();
        let lifecycle = session.lifecycle_events();
        let session = Arc::new(Mutex::new(session));
        let callbacks = CallbackRegistry::default();

        let handle = tokio::spawn(Self::run_event_loop(session.clone(), events));

        // Ends once the session, which owns the sending half, is dropped.
        tokio::spawn(dispatch_lifecycle(callbacks.clone(), lifecycle));

        Self {
            session,
            event_tx,
            callbacks,
            callback_counter: AtomicU64::new(0),
            event_loop: Mutex::new(Some(handle)),
        }
    }

    /// Apply platform events and deadlines one at a time.
    async fn run_event_loop(
        session: Arc<Mutex<Session<T>>>,
        mut events: mpsc::UnboundedReceiver<PlatformEvent>,
    ) {
        loop {
            let deadline = session.lock().next_deadline();

            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("Platform event channel closed");
                        break;
                    };
                    session.lock().handle_event(event);
                }
                _ = sleep_until(deadline) => {
                    session.lock().handle_timeout(Instant::now());
                }
            }
        }

        debug!("Session event loop ended");
    }

    // === Lifecycle ===

    /// Start scanning, optionally filtered by advertised service.
    pub fn start_scan(&self, service: Option<Uuid>) {
        self.session.lock().start_scan(service);
    }

    /// Disconnect from the motor controller and resume scanning.
    pub fn disconnect(&self) {
        self.session.lock().disconnect();
    }

    /// Disconnect, stop scanning, and stop processing platform events.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down session manager");

        self.session.lock().stop();

        let handle = self.event_loop.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        Ok(())
    }

    // === State ===

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.session.lock().state()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Get the connected peripheral, if any.
    pub fn connected_peripheral(&self) -> Option<PeripheralId> {
        self.session.lock().connected_peripheral().cloned()
    }

    /// Peripherals seen during the current scan.
    pub fn discovered_peripherals(&self) -> Vec<DiscoveredPeripheral> {
        self.session.lock().discovered_peripherals().to_vec()
    }

    /// Get the cached characteristic for a role.
    pub fn characteristic(&self, role: CharacteristicRole) -> Option<CharacteristicRef> {
        self.session.lock().characteristic(role).cloned()
    }

    // === Writes ===

    /// Write the enable flag. Returns `true` if the write was dispatched.
    pub fn update_enable(&self, enabled: bool) -> bool {
        self.session.lock().update_enable(enabled)
    }

    /// Write the setpoint. Returns `true` if the write was dispatched.
    pub fn update_setpoint(&self, setpoint: f64) -> bool {
        self.session.lock().update_setpoint(setpoint)
    }

    /// Write the control mode. Returns `true` if the write was dispatched.
    pub fn update_mode(&self, mode: Mode) -> bool {
        self.session.lock().update_mode(mode)
    }

    /// Write the selected motor. Returns `true` if the write was dispatched.
    pub fn update_motor_select(&self, motor: MotorSelect) -> bool {
        self.session.lock().update_motor_select(motor)
    }

    /// Write the enable flag, reporting why it could not be dispatched.
    pub fn try_update_enable(&self, enabled: bool) -> Result<()> {
        self.session.lock().try_update_enable(enabled)
    }

    /// Write the setpoint, reporting why it could not be dispatched.
    pub fn try_update_setpoint(&self, setpoint: f64) -> Result<()> {
        self.session.lock().try_update_setpoint(setpoint)
    }

    /// Write the control mode, reporting why it could not be dispatched.
    pub fn try_update_mode(&self, mode: Mode) -> Result<()> {
        self.session.lock().try_update_mode(mode)
    }

    /// Write the selected motor, reporting why it could not be dispatched.
    pub fn try_update_motor_select(&self, motor: MotorSelect) -> Result<()> {
        self.session.lock().try_update_motor_select(motor)
    }

    // === Callbacks ===

    /// Subscribe to every session event.
    ///
    /// A slow subscriber may lag and miss events; the `on_connect` and
    /// `on_disconnect` callbacks never do.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for when a motor controller is connected and ready.
    pub fn on_connect<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&PeripheralId) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let SessionEvent::Connected(peripheral) = event {
                callback(peripheral);
            }
        })
    }

    /// Register a callback for when the motor controller disconnects.
    pub fn on_disconnect<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&PeripheralId) + Send + Sync + 'static,
    {
        self.register(move |event| {
            if let SessionEvent::Disconnected(peripheral) = event {
                callback(peripheral);
            }
        })
    }

    fn register<F>(&self, handler: F) -> CallbackHandle
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().insert(callback_id, Arc::new(handler));

        let callbacks = Arc::downgrade(&self.callbacks);

        CallbackHandle::new(callback_id, move || {
            if let Some(callbacks) = callbacks.upgrade() {
                callbacks.lock().remove(&callback_id);
            }
        })
    }
}

impl<T: CentralTransport> Drop for SessionManager<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.get_mut().take() {
            handle.abort();
        }
    }
}

/// Run the registered callbacks for every connection transition, in order.
async fn dispatch_lifecycle(
    callbacks: CallbackRegistry,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        // Snapshot so callbacks may register or unregister without deadlock.
        let handlers: Vec<_> = callbacks.lock().values().cloned().collect();
        trace!("Dispatching {:?} to {} callbacks", event, handlers.len());

        for handler in handlers {
            handler(&event);
        }
    }

    debug!("Lifecycle dispatcher ended");
}

/// Sleep until `deadline`, or forever if there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_callback_handle_unregisters_once() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let handle = CallbackHandle::new(3, move || flag.store(true, Ordering::SeqCst));

        assert_eq!(handle.id(), 3);
        handle.unregister();
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_lifecycle_dispatch_reaches_registered_callbacks() {
        let callbacks = CallbackRegistry::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let (seen_tx, mut seen) = mpsc::unbounded_channel();

        callbacks.lock().insert(
            0,
            Arc::new(move |event: &SessionEvent| {
                let _ = seen_tx.send(event.clone());
            }),
        );

        let peripheral = PeripheralId::from("motor-1");
        tx.send(SessionEvent::Connected(peripheral.clone())).unwrap();
        tx.send(SessionEvent::Disconnected(peripheral.clone())).unwrap();
        drop(tx);

        dispatch_lifecycle(callbacks, rx).await;

        assert_eq!(seen.recv().await, Some(SessionEvent::Connected(peripheral.clone())));
        assert_eq!(seen.recv().await, Some(SessionEvent::Disconnected(peripheral)));
    }

    #[test]
    fn test_callback_handle_unregisters_on_drop() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        drop(CallbackHandle::new(0, move || flag.store(true, Ordering::SeqCst)));
        assert!(called.load(Ordering::SeqCst));
    }
}
