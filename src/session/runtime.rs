//! Async session service.
//!
//! [`Session`] runs a [`SessionManager`] on its own tokio task. Stack
//! events, timer firings and commands from any number of [`Session`] clones
//! are serialized through one `select!` loop, so the manager never sees
//! concurrent calls.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::ble::{BleStack, BtleplugStack, StackEvent};
use crate::config::SessionConfig;
use crate::data::DiscoveredDevice;
use crate::error::{Error, Result};
use crate::session::events::SensorEvent;
use crate::session::manager::SessionManager;
use crate::session::state::SensorState;
use crate::session::timer::{TimerFired, TokioScheduler};
use crate::storage::DeviceStore;

enum Command {
    BeginScan(oneshot::Sender<bool>),
    StopScan(oneshot::Sender<()>),
    Connect(DiscoveredDevice, oneshot::Sender<Result<()>>),
    CancelConnect(oneshot::Sender<bool>),
    Disconnect(oneshot::Sender<Result<()>>),
    ClearConnection {
        stop_scan: bool,
        reply: oneshot::Sender<()>,
    },
    ReconnectLastDevice(oneshot::Sender<bool>),
    ForgetLastDevice(oneshot::Sender<Result<()>>),
    Refresh(oneshot::Sender<Result<()>>),
    DiscoveredDevices(oneshot::Sender<Vec<DiscoveredDevice>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running sensor session.
///
/// Cheap to clone; every clone talks to the same session task.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SensorEvent>,
    state: Arc<RwLock<SensorState>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Session {
    /// Start a session on the first Bluetooth adapter of this machine.
    pub async fn start(config: SessionConfig, store: Box<dyn DeviceStore>) -> Result<Self> {
        let (stack, stack_events) = BtleplugStack::new().await?;
        Ok(Self::with_stack(stack, stack_events, config, store))
    }

    /// Start a session over any [`BleStack`].
    ///
    /// `stack_events` must carry the callbacks of `stack`. Must be called
    /// inside a tokio runtime.
    pub fn with_stack<S>(
        stack: S,
        stack_events: mpsc::UnboundedReceiver<StackEvent>,
        config: SessionConfig,
        store: Box<dyn DeviceStore>,
    ) -> Self
    where
        S: BleStack + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let manager = SessionManager::new(stack, TokioScheduler::new(timer_tx), store, config);
        let events = manager.event_sender();
        let state = Arc::new(RwLock::new(manager.state()));

        let task = tokio::spawn(run(manager, command_rx, stack_events, timer_rx, state.clone()));

        Self {
            commands: command_tx,
            events,
            state,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SensorEvent> {
        self.events.subscribe()
    }

    /// Current derived state.
    pub fn state(&self) -> SensorState {
        *self.state.read()
    }

    /// Check if the session task is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Start a scan window. Returns `false` if the adapter is not powered on.
    pub async fn begin_scan(&self) -> Result<bool> {
        self.request(Command::BeginScan).await
    }

    /// End a running scan early.
    pub async fn stop_scan(&self) -> Result<()> {
        self.request(Command::StopScan).await
    }

    /// Connect to a discovered sensor.
    pub async fn connect(&self, device: DiscoveredDevice) -> Result<()> {
        self.request(|reply| Command::Connect(device, reply)).await?
    }

    /// Abandon a pending connect attempt. Returns `false` if none was pending.
    pub async fn cancel_connect(&self) -> Result<bool> {
        self.request(Command::CancelConnect).await
    }

    /// Drop the current connection.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await?
    }

    /// Reset all connection state, optionally stopping a running scan.
    pub async fn clear_connection(&self, stop_scan: bool) -> Result<()> {
        self.request(|reply| Command::ClearConnection { stop_scan, reply })
            .await
    }

    /// Schedule a reconnect to the last connected sensor. Returns `false` if
    /// none is remembered.
    pub async fn reconnect_last_device(&self) -> Result<bool> {
        self.request(Command::ReconnectLastDevice).await
    }

    /// Forget the remembered sensor.
    pub async fn forget_last_device(&self) -> Result<()> {
        self.request(Command::ForgetLastDevice).await?
    }

    /// Re-read every characteristic of the connected sensor.
    pub async fn refresh(&self) -> Result<()> {
        self.request(Command::Refresh).await?
    }

    /// Devices found by the current or last scan.
    pub async fn discovered_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        self.request(Command::DiscoveredDevices).await
    }

    /// Stop the session task, dropping any connection.
    pub async fn shutdown(&self) -> Result<()> {
        // A task that already exited counts as shut down.
        let _ = self.request(Command::Shutdown).await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| Error::Internal(format!("Session task failed: {}", e)))?;
        }
        Ok(())
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| Error::SessionClosed)?;
        reply_rx.await.map_err(|_| Error::SessionClosed)
    }
}

async fn run<S: BleStack>(
    mut manager: SessionManager<S, TokioScheduler>,
    mut commands: mpsc::Receiver<Command>,
    mut stack_events: mpsc::UnboundedReceiver<StackEvent>,
    mut timers: mpsc::UnboundedReceiver<TimerFired>,
    state: Arc<RwLock<SensorState>>,
) {
    info!("Sensor session started");

    let shutdown_reply = loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("All session handles dropped");
                    break None;
                };
                if let Some(reply) = handle_command(&mut manager, command, &state) {
                    break Some(reply);
                }
            }
            Some(event) = stack_events.recv() => {
                manager.handle_stack_event(event);
            }
            Some(fired) = timers.recv() => {
                manager.handle_timer(fired.id, fired.kind);
            }
        }

        publish(&manager, &state);
    };

    manager.shutdown();
    publish(&manager, &state);
    info!("Sensor session stopped");

    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
}

/// Apply a command. Returns the reply channel of a shutdown request.
///
/// The cached state is published before each reply, so a caller reading
/// [`Session::state`] after the await sees the effect of its command.
fn handle_command<S: BleStack>(
    manager: &mut SessionManager<S, TokioScheduler>,
    command: Command,
    state: &RwLock<SensorState>,
) -> Option<oneshot::Sender<()>> {
    match command {
        Command::BeginScan(reply) => {
            let started = manager.begin_scan();
            publish(manager, state);
            let _ = reply.send(started);
        }
        Command::StopScan(reply) => {
            manager.stop_scan();
            publish(manager, state);
            let _ = reply.send(());
        }
        Command::Connect(device, reply) => {
            let result = manager.connect(&device);
            publish(manager, state);
            let _ = reply.send(result);
        }
        Command::CancelConnect(reply) => {
            let cancelled = manager.cancel_connect();
            publish(manager, state);
            let _ = reply.send(cancelled);
        }
        Command::Disconnect(reply) => {
            let result = manager.disconnect();
            publish(manager, state);
            let _ = reply.send(result);
        }
        Command::ClearConnection { stop_scan, reply } => {
            manager.clear_connection(stop_scan);
            publish(manager, state);
            let _ = reply.send(());
        }
        Command::ReconnectLastDevice(reply) => {
            let scheduled = manager.reconnect_last_device();
            publish(manager, state);
            let _ = reply.send(scheduled);
        }
        Command::ForgetLastDevice(reply) => {
            let _ = reply.send(manager.forget_last_device());
        }
        Command::Refresh(reply) => {
            let result = manager.refresh();
            publish(manager, state);
            let _ = reply.send(result);
        }
        Command::DiscoveredDevices(reply) => {
            publish(manager, state);
            let _ = reply.send(manager.discovered_devices().to_vec());
        }
        Command::Shutdown(reply) => return Some(reply),
    }
    None
}

fn publish<S: BleStack>(manager: &SessionManager<S, TokioScheduler>, state: &RwLock<SensorState>) {
    *state.write() = manager.state();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{AdapterState, GattCharacteristic, GattService, PeripheralId};
    use crate::data::LastDeviceRecord;
    use crate::storage::MemoryStore;
    use std::time::Duration;
    use uuid::Uuid;

    /// Stack that answers connects immediately and records nothing else.
    struct LoopbackStack {
        events: mpsc::UnboundedSender<StackEvent>,
    }

    impl BleStack for LoopbackStack {
        fn adapter_state(&self) -> AdapterState {
            AdapterState::PoweredOn
        }

        fn start_scan(&self, _services: Vec<Uuid>) {
            let _ = self.events.send(StackEvent::AdvertisementObserved {
                peripheral: PeripheralId::new("p1"),
                local_name: Some("RTemp_1".into()),
            });
        }

        fn stop_scan(&self) {}

        fn connect(&self, peripheral: &PeripheralId) {
            let _ = self.events.send(StackEvent::Connected(peripheral.clone()));
        }

        fn cancel_connect(&self, peripheral: &PeripheralId) {
            let _ = self.events.send(StackEvent::Disconnected(peripheral.clone()));
        }

        fn discover_services(&self, peripheral: &PeripheralId) {
            let _ = self.events.send(StackEvent::ServicesDiscovered {
                peripheral: peripheral.clone(),
                result: Ok(Vec::new()),
            });
        }

        fn discover_characteristics(&self, _peripheral: &PeripheralId, _service: GattService) {}

        fn read(&self, _peripheral: &PeripheralId, _characteristic: GattCharacteristic) {}

        fn set_notify(&self, _peripheral: &PeripheralId, _characteristic: GattCharacteristic, _enabled: bool) {}

        fn retrieve_peripheral(&self, _identifier: &str) -> Option<(PeripheralId, Option<String>)> {
            None
        }
    }

    fn start_session(config: SessionConfig) -> Session {
        let (tx, rx) = mpsc::unbounded_channel();
        Session::with_stack(
            LoopbackStack { events: tx },
            rx,
            config,
            Box::new(MemoryStore::new()),
        )
    }

    async fn next_matching(
        events: &mut broadcast::Receiver<SensorEvent>,
        pred: impl Fn(&SensorEvent) -> bool,
    ) -> SensorEvent {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_scan_through_handle() {
        let session = start_session(SessionConfig::default());
        let mut events = session.subscribe();

        assert!(session.begin_scan().await.unwrap());

        let event = next_matching(&mut events, |e| matches!(e, SensorEvent::DeviceDiscovered(_))).await;
        let SensorEvent::DeviceDiscovered(device) = event else {
            unreachable!()
        };
        assert_eq!(device.name(), "RTemp_1");

        let devices = session.discovered_devices().await.unwrap();
        assert_eq!(devices, vec![device]);
        assert_eq!(session.state(), SensorState::Scanning);

        session.stop_scan().await.unwrap();
        assert_eq!(session.state(), SensorState::NotConnected);

        session.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_window_elapses() {
        let session = start_session(SessionConfig::default().with_scan_window(Duration::from_secs(3)));
        let mut events = session.subscribe();

        session.begin_scan().await.unwrap();
        let event = next_matching(&mut events, |e| matches!(e, SensorEvent::ScanComplete { .. })).await;
        assert_eq!(event, SensorEvent::ScanComplete { error: None });

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_sensor_service_reported() {
        let session = start_session(SessionConfig::default());
        let mut events = session.subscribe();

        session
            .connect(DiscoveredDevice::from_advertisement(PeripheralId::new("p1"), None))
            .await
            .unwrap();

        next_matching(&mut events, |e| matches!(e, SensorEvent::DiscoveryFailed { .. })).await;

        // Round trip through the loop so the cached state is current.
        session.discovered_devices().await.unwrap();
        assert_eq!(session.state(), SensorState::NotConnected);

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_report_errors() {
        let session = start_session(SessionConfig::default());

        let err = tokio_test::assert_err!(session.disconnect().await);
        assert!(matches!(err, Error::NotConnected));
        let err = tokio_test::assert_err!(session.refresh().await);
        assert!(matches!(err, Error::NotConnected));

        assert!(!tokio_test::assert_ok!(session.cancel_connect().await));
        assert!(!tokio_test::assert_ok!(session.reconnect_last_device().await));
        tokio_test::assert_ok!(session.clear_connection(true).await);
        tokio_test::assert_ok!(session.stop_scan().await);

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_session() {
        let session = start_session(SessionConfig::default());
        let other = session.clone();

        session.shutdown().await.unwrap();
        assert!(!other.is_running());
        assert!(matches!(other.begin_scan().await, Err(Error::SessionClosed)));

        // Shutting down twice is fine.
        other.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_state_current_after_command() {
        let session = start_session(SessionConfig::default());

        for _ in 0..500 {
            assert!(session.begin_scan().await.unwrap());
            assert_eq!(session.state(), SensorState::Scanning);

            session.stop_scan().await.unwrap();
            assert_eq!(session.state(), SensorState::NotConnected);
        }

        session.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_uses_store() {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = MemoryStore::with_record(LastDeviceRecord::new("p9", None));
        let session = Session::with_stack(
            LoopbackStack { events: tx },
            rx,
            SessionConfig::default(),
            Box::new(store),
        );

        // Known record, but the loopback stack cannot resolve it.
        assert!(session.reconnect_last_device().await.unwrap());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(session.state(), SensorState::NotConnected);

        tokio_test::assert_ok!(session.forget_last_device().await);
        assert!(!session.reconnect_last_device().await.unwrap());

        session.shutdown().await.unwrap();
    }
}
