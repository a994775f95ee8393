//! The sensor session state machine.
//!
//! [`SessionManager`] owns the scan list, the single active connection and
//! the log cursors. It is driven entirely from the outside: UI calls,
//! [`StackEvent`]s and timer firings all arrive as `&mut self` method calls on
//! one logical thread, and every reaction is a request to the [`BleStack`], a
//! timer on the [`Scheduler`] or a [`SensorEvent`] on the broadcast channel.

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::ble::{
    AdapterState, BleStack, GattCharacteristic, GattService, KnownCharacteristic, KnownService,
    PeripheralId, StackError, StackEvent, SENSOR_SERVICE_UUID,
};
use crate::config::SessionConfig;
use crate::data::{DiscoveredDevice, LastDeviceRecord, LogSnapshot};
use crate::error::{Error, Result};
use crate::protocol::{decode_battery, decode_humidity, decode_temperature, LogCursor, LogFrame, LogKind};
use crate::session::connection::{ActiveConnection, DiscoveryPhase};
use crate::session::events::SensorEvent;
use crate::session::state::{SensorState, SessionFlags};
use crate::session::timer::{Scheduler, TimerId, TimerKind};
use crate::storage::DeviceStore;

/// Single-sensor BLE session manager.
pub struct SessionManager<S, C> {
    stack: S,
    scheduler: C,
    store: Box<dyn DeviceStore>,
    config: SessionConfig,
    event_tx: broadcast::Sender<SensorEvent>,
    adapter_state: AdapterState,
    flags: SessionFlags,
    devices: Vec<DiscoveredDevice>,
    connection: ActiveConnection,
    temperature_log: LogCursor,
    humidity_log: LogCursor,
    waiting_for_connection: bool,
    scan_timer: Option<TimerId>,
    connect_timer: Option<TimerId>,
    refresh_timer: Option<TimerId>,
    reconnect_timer: Option<TimerId>,
}

impl<S: BleStack, C: Scheduler> SessionManager<S, C> {
    /// Create a manager over `stack`, reading the initial adapter state
    /// from it.
    pub fn new(stack: S, scheduler: C, store: Box<dyn DeviceStore>, config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let adapter_state = stack.adapter_state();

        Self {
            stack,
            scheduler,
            store,
            config,
            event_tx,
            adapter_state,
            flags: SessionFlags::default(),
            devices: Vec::new(),
            connection: ActiveConnection::default(),
            temperature_log: LogCursor::new(),
            humidity_log: LogCursor::new(),
            waiting_for_connection: false,
            scan_timer: None,
            connect_timer: None,
            refresh_timer: None,
            reconnect_timer: None,
        }
    }

    // === Observation ===

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SensorEvent> {
        self.event_tx.subscribe()
    }

    /// The sender events are published on.
    pub fn event_sender(&self) -> broadcast::Sender<SensorEvent> {
        self.event_tx.clone()
    }

    /// Current derived state.
    pub fn state(&self) -> SensorState {
        SensorState::derive(self.adapter_state, self.flags)
    }

    /// Last reported adapter state.
    pub fn adapter_state(&self) -> AdapterState {
        self.adapter_state
    }

    /// The booleans the state is derived from.
    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    /// Devices seen during the current or last scan, in arrival order.
    pub fn discovered_devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    /// The active connection's handles.
    pub fn connection(&self) -> &ActiveConnection {
        &self.connection
    }

    /// Check if every handle of the active connection is known.
    pub fn is_discovery_complete(&self) -> bool {
        self.connection.is_discovery_complete()
    }

    /// Check if a connect request is still waiting for the link.
    pub fn is_waiting_for_connection(&self) -> bool {
        self.waiting_for_connection
    }

    /// Change-detection cursor of a log stream.
    pub fn log_cursor(&self, kind: LogKind) -> LogCursor {
        match kind {
            LogKind::Temperature => self.temperature_log,
            LogKind::Humidity => self.humidity_log,
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The underlying stack.
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// The underlying scheduler.
    pub fn scheduler(&self) -> &C {
        &self.scheduler
    }

    // === Scanning ===

    /// Start a scan window for sensors.
    ///
    /// Returns `false` without scanning when the adapter is not powered on.
    /// The discovered list is cleared either way.
    pub fn begin_scan(&mut self) -> bool {
        self.devices.clear();

        if !self.adapter_state.is_powered_on() {
            warn!("Cannot scan, adapter is {}", self.adapter_state);
            return false;
        }

        info!("Starting scan for RTemp sensors");
        self.stack.start_scan(vec![SENSOR_SERVICE_UUID]);
        self.set_scan_in_progress(true);

        if let Some(previous) = self.scan_timer.take() {
            self.scheduler.cancel(previous);
        }
        self.scan_timer = Some(
            self.scheduler
                .schedule(TimerKind::ScanWindow, self.config.scan_window),
        );

        true
    }

    /// End a running scan before its window elapses.
    pub fn stop_scan(&mut self) {
        if !self.flags.scan_in_progress {
            debug!("Not scanning, ignoring stop request");
            return;
        }

        self.halt_scan();
        self.emit(SensorEvent::ScanComplete { error: None });
    }

    fn halt_scan(&mut self) {
        info!("Stopping scan");
        if let Some(timer) = self.scan_timer.take() {
            self.scheduler.cancel(timer);
        }
        self.stack.stop_scan();
        self.set_scan_in_progress(false);
    }

    fn handle_advertisement(&mut self, peripheral: PeripheralId, local_name: Option<String>) {
        if !self.flags.scan_in_progress {
            trace!("Advertisement from {} outside a scan, ignoring", peripheral);
            return;
        }

        let device = DiscoveredDevice::from_advertisement(peripheral, local_name);
        debug!("Discovered sensor {} ({:?})", device.name(), device.handle);

        self.devices.push(device.clone());
        self.emit(SensorEvent::DeviceDiscovered(device));
    }

    // === Connection ===

    /// Connect to `device`.
    ///
    /// Does nothing when the device has no handle. A running scan is stopped
    /// first. While an earlier attempt is still waiting for its link this
    /// returns [`Error::ConnectionInProgress`]; use
    /// [`cancel_connect`](Self::cancel_connect) to abandon it.
    pub fn connect(&mut self, device: &DiscoveredDevice) -> Result<()> {
        let Some(target) = device.handle.clone() else {
            debug!("Device {} has no handle, not connecting", device.name());
            return Ok(());
        };

        if self.waiting_for_connection {
            return Err(Error::ConnectionInProgress);
        }

        if self.flags.device_connected && self.connection.is_current(&target) {
            debug!("Already connected to {}", target);
            return Ok(());
        }

        if self.flags.scan_in_progress {
            self.halt_scan();
        }

        if let Some(previous) = self.connection.peripheral.clone() {
            if previous != target {
                info!("Dropping {} to connect to {}", previous, target);
                self.stack.cancel_connect(&previous);
                self.clear_connection(false);
            }
        }

        info!("Connecting to {} ({})", device.name(), target);

        self.set_device_connecting(true);

        if !self.connection.is_current(&target) {
            self.connection = ActiveConnection::for_peripheral(target.clone(), device.display_name.clone());
        }
        self.connection.phase = DiscoveryPhase::Idle;

        self.waiting_for_connection = true;
        self.stack.connect(&target);

        if let Some(previous) = self.connect_timer.take() {
            self.scheduler.cancel(previous);
        }
        self.connect_timer = Some(
            self.scheduler
                .schedule(TimerKind::ConnectTimeout, self.config.connect_timeout),
        );

        Ok(())
    }

    /// Abandon a connect attempt that is still waiting for its link.
    ///
    /// Returns `false` if no attempt was pending.
    pub fn cancel_connect(&mut self) -> bool {
        if !self.waiting_for_connection {
            return false;
        }

        if let Some(peripheral) = self.connection.peripheral.clone() {
            info!("Cancelling connect attempt to {}", peripheral);
            self.stack.cancel_connect(&peripheral);
        }
        self.clear_connection(false);
        true
    }

    /// Drop the current connection.
    pub fn disconnect(&mut self) -> Result<()> {
        let peripheral = self
            .connection
            .peripheral
            .clone()
            .ok_or(Error::NotConnected)?;

        info!("Disconnecting from {}", peripheral);
        self.stack.cancel_connect(&peripheral);
        self.clear_connection(true);
        Ok(())
    }

    /// Reset all connection state.
    ///
    /// Stops a running scan too when `stop_scan_too` is set. Calling this
    /// repeatedly leaves the same empty state.
    pub fn clear_connection(&mut self, stop_scan_too: bool) {
        if self.flags.scan_in_progress && stop_scan_too {
            self.halt_scan();
        }

        self.set_device_connected(false);
        self.set_device_connecting(false);

        self.connection.clear();
        self.temperature_log.reset();
        self.humidity_log.reset();

        self.waiting_for_connection = false;
        if let Some(timer) = self.connect_timer.take() {
            self.scheduler.cancel(timer);
        }
    }

    /// Re-read every known characteristic of the active connection.
    pub fn refresh(&mut self) -> Result<()> {
        let peripheral = self
            .connection
            .peripheral
            .clone()
            .ok_or(Error::NotConnected)?;

        let characteristics = self.connection.known_characteristics();
        debug!(
            "Refreshing {} characteristics on {}",
            characteristics.len(),
            peripheral
        );

        for characteristic in characteristics {
            self.stack.read(&peripheral, characteristic);
        }
        Ok(())
    }

    /// Schedule a silent reconnect to the last connected sensor.
    ///
    /// Returns `false` if no sensor has been remembered.
    pub fn reconnect_last_device(&mut self) -> bool {
        match self.store.load() {
            Ok(Some(record)) => {
                info!(
                    "Reconnecting to {} in {:?}",
                    record.identifier, self.config.reconnect_delay
                );
            }
            Ok(None) => {
                debug!("No remembered sensor");
                return false;
            }
            Err(e) => {
                warn!("Failed to load last device: {}", e);
                return false;
            }
        }

        if let Some(previous) = self.reconnect_timer.take() {
            self.scheduler.cancel(previous);
        }
        self.reconnect_timer = Some(
            self.scheduler
                .schedule(TimerKind::Reconnect, self.config.reconnect_delay),
        );
        true
    }

    /// Forget the remembered sensor and drop a pending reconnect.
    pub fn forget_last_device(&mut self) -> Result<()> {
        if let Some(timer) = self.reconnect_timer.take() {
            self.scheduler.cancel(timer);
        }
        self.store.clear()?;
        info!("Forgot last connected sensor");
        Ok(())
    }

    fn reconnect_now(&mut self) {
        let record = match self.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to load last device: {}", e);
                return;
            }
        };

        let Some((handle, name)) = self.stack.retrieve_peripheral(&record.identifier) else {
            info!("Remembered sensor {} is not available", record.identifier);
            return;
        };

        let device = DiscoveredDevice {
            display_name: name.or(record.name),
            handle: Some(handle),
        };

        if let Err(e) = self.connect(&device) {
            warn!("Reconnect to {} skipped: {}", record.identifier, e);
        }
    }

    /// Stop scanning, drop the connection and cancel every timer.
    pub fn shutdown(&mut self) {
        info!("Shutting down sensor session");

        if let Some(peripheral) = self.connection.peripheral.clone() {
            self.stack.cancel_connect(&peripheral);
        }
        self.clear_connection(true);

        for timer in [
            self.scan_timer.take(),
            self.refresh_timer.take(),
            self.reconnect_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.scheduler.cancel(timer);
        }
    }

    // === Inputs ===

    /// Process a timer firing. Firings of timers the manager no longer
    /// tracks are ignored.
    pub fn handle_timer(&mut self, id: TimerId, kind: TimerKind) {
        match kind {
            TimerKind::ScanWindow => {
                if self.scan_timer != Some(id) {
                    trace!("Stale scan timer {:?}", id);
                    return;
                }
                self.scan_timer = None;

                info!("Scan window elapsed, {} sensors found", self.devices.len());
                self.stack.stop_scan();
                self.set_scan_in_progress(false);
                self.emit(SensorEvent::ScanComplete { error: None });
            }
            TimerKind::ConnectTimeout => {
                if self.connect_timer != Some(id) {
                    trace!("Stale connect timer {:?}", id);
                    return;
                }
                self.connect_timer = None;

                if self.waiting_for_connection {
                    if let Some(peripheral) = self.connection.peripheral.clone() {
                        warn!("Connect to {} timed out", peripheral);
                        self.stack.cancel_connect(&peripheral);
                    }
                    self.clear_connection(false);
                }
            }
            TimerKind::Refresh => {
                if self.refresh_timer != Some(id) {
                    trace!("Stale refresh timer {:?}", id);
                    return;
                }
                self.refresh_timer = None;

                if self.flags.device_connected {
                    if let Err(e) = self.refresh() {
                        debug!("Periodic refresh skipped: {}", e);
                    }
                    self.refresh_timer = Some(
                        self.scheduler
                            .schedule(TimerKind::Refresh, self.config.refresh_interval),
                    );
                }
            }
            TimerKind::Reconnect => {
                if self.reconnect_timer != Some(id) {
                    trace!("Stale reconnect timer {:?}", id);
                    return;
                }
                self.reconnect_timer = None;
                self.reconnect_now();
            }
        }
    }

    /// Process a callback from the radio stack.
    pub fn handle_stack_event(&mut self, event: StackEvent) {
        match event {
            StackEvent::AdapterStateChanged(state) => {
                info!("Adapter state: {} -> {}", self.adapter_state, state);
                self.adapter_state = state;
                self.emit_state();
            }
            StackEvent::AdvertisementObserved {
                peripheral,
                local_name,
            } => self.handle_advertisement(peripheral, local_name),
            StackEvent::Connected(peripheral) => self.handle_connected(peripheral),
            StackEvent::ConnectFailed { peripheral, error } => {
                self.handle_connect_failed(peripheral, error)
            }
            StackEvent::Disconnected(peripheral) => {
                if self.connection.is_current(&peripheral) {
                    info!("Sensor {} disconnected", peripheral);
                    self.clear_connection(true);
                } else {
                    trace!("Ignoring disconnect of {}", peripheral);
                }
            }
            StackEvent::ServicesDiscovered { peripheral, result } => {
                self.handle_services(peripheral, result)
            }
            StackEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => self.handle_characteristics(peripheral, service, result),
            StackEvent::ValueUpdated {
                peripheral,
                characteristic,
                result,
            } => self.handle_value(peripheral, characteristic, result),
        }
    }

    fn handle_connected(&mut self, peripheral: PeripheralId) {
        if !self.connection.is_current(&peripheral) {
            debug!("Connected to stale target {}, ignoring", peripheral);
            return;
        }

        info!("Link up with {}, discovering services", peripheral);

        self.waiting_for_connection = false;
        if let Some(timer) = self.connect_timer.take() {
            self.scheduler.cancel(timer);
        }

        self.connection.phase = DiscoveryPhase::ServicesDiscovering;
        self.stack.discover_services(&peripheral);
    }

    fn handle_connect_failed(&mut self, peripheral: PeripheralId, error: StackError) {
        if !self.connection.is_current(&peripheral) {
            debug!("Connect failure for stale target {}, ignoring", peripheral);
            return;
        }

        warn!("Connect to {} failed: {}", peripheral, error);

        // The target stays recorded so the caller can retry it.
        self.waiting_for_connection = false;
        if let Some(timer) = self.connect_timer.take() {
            self.scheduler.cancel(timer);
        }
        self.set_device_connecting(false);

        self.emit(SensorEvent::ConnectFailed {
            reason: error.to_string(),
        });
    }

    fn handle_services(
        &mut self,
        peripheral: PeripheralId,
        result: std::result::Result<Vec<GattService>, StackError>,
    ) {
        if !self.connection.is_current(&peripheral) {
            return;
        }

        let services = match result {
            Ok(services) => services,
            Err(e) => return self.fail_discovery(format!("Service discovery failed: {e}")),
        };

        let mut known = Vec::new();
        for service in services {
            match KnownService::from_uuid(&service.uuid) {
                Some(kind) => known.push((kind, service)),
                None => trace!("Ignoring service {}", service.uuid),
            }
        }

        for required in [KnownService::Sensor, KnownService::Battery] {
            if !known.iter().any(|(kind, _)| *kind == required) {
                return self.fail_discovery(format!(
                    "{} does not expose the {:?} service",
                    peripheral, required
                ));
            }
        }

        for (kind, service) in known {
            debug!("Found {:?} service {}", kind, service.uuid);
            self.connection.set_service(kind, service);
            self.connection.await_characteristics(kind);
            self.stack.discover_characteristics(&peripheral, service);
        }
    }

    fn handle_characteristics(
        &mut self,
        peripheral: PeripheralId,
        service: GattService,
        result: std::result::Result<Vec<GattCharacteristic>, StackError>,
    ) {
        if !self.connection.is_current(&peripheral) {
            return;
        }

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                return self.fail_discovery(format!(
                    "Characteristic discovery failed for {}: {e}",
                    service.uuid
                ))
            }
        };

        if let Some(kind) = KnownService::from_uuid(&service.uuid) {
            self.connection.characteristics_answered(kind);
        }

        // First answer from any service: report connected without waiting
        // for the rest of discovery.
        self.set_device_connected(true);
        if self.connection.phase == DiscoveryPhase::ServicesDiscovering {
            self.connection.phase = DiscoveryPhase::CharacteristicsDiscovering;
        }

        for characteristic in characteristics {
            if let Some(kind) = KnownCharacteristic::from_uuid(&characteristic.uuid) {
                debug!("Found {:?} characteristic", kind);
                self.connection.set_characteristic(kind, characteristic);

                if kind.is_streamed() {
                    self.stack.set_notify(&peripheral, characteristic, true);
                }
            }

            if self.connection.is_discovery_complete() && self.connection.phase.is_discovering() {
                self.complete_discovery();
            }
        }

        // Every service answered and a handle is still missing.
        if self.connection.phase.is_discovering()
            && !self.connection.is_awaiting_characteristics()
        {
            self.fail_discovery(format!("{} is missing sensor characteristics", peripheral));
        }
    }

    fn complete_discovery(&mut self) {
        self.connection.phase = DiscoveryPhase::Ready;

        self.set_device_connected(true);
        self.set_device_connecting(false);

        let device = DiscoveredDevice {
            display_name: self.connection.name.clone(),
            handle: self.connection.peripheral.clone(),
        };
        info!("Sensor {} ready", device.name());
        self.emit(SensorEvent::Ready { device });

        if let Err(e) = self.refresh() {
            debug!("Initial refresh skipped: {}", e);
        }
    }

    fn fail_discovery(&mut self, reason: String) {
        warn!("{}", reason);

        if let Some(peripheral) = self.connection.peripheral.clone() {
            self.stack.cancel_connect(&peripheral);
        }
        self.clear_connection(false);

        self.emit(SensorEvent::DiscoveryFailed { reason });
    }

    fn handle_value(
        &mut self,
        peripheral: PeripheralId,
        characteristic: GattCharacteristic,
        result: std::result::Result<bytes::Bytes, StackError>,
    ) {
        if !self.connection.is_current(&peripheral) {
            trace!("Value from {} outside the session, ignoring", peripheral);
            return;
        }

        let Some(kind) = KnownCharacteristic::from_uuid(&characteristic.uuid) else {
            trace!("Value for unknown characteristic {}", characteristic.uuid);
            return;
        };

        let data = match result {
            Ok(data) => data,
            Err(e) => {
                debug!("Skipping {:?} update: {}", kind, e);
                return;
            }
        };

        trace!("{:?} value: {:02X?}", kind, &data[..]);

        if let Err(e) = self.decode(kind, &data) {
            debug!("Dropping {:?} payload: {}", kind, e);
        }
    }

    fn decode(&mut self, kind: KnownCharacteristic, data: &[u8]) -> Result<()> {
        match kind {
            KnownCharacteristic::Temperature => {
                let celsius = decode_temperature(data)?;
                self.emit(SensorEvent::TemperatureUpdated(celsius));
            }
            KnownCharacteristic::Humidity => {
                let percent = decode_humidity(data)?;
                self.emit(SensorEvent::HumidityUpdated(percent));
            }
            KnownCharacteristic::Battery => {
                let percent = decode_battery(data)?;
                self.emit(SensorEvent::BatteryUpdated(percent));
            }
            KnownCharacteristic::TemperatureLog => {
                let frame = LogFrame::parse(data)?;
                if self.temperature_log.advance(frame.head) {
                    let snapshot = LogSnapshot::from_frame(LogKind::Temperature, &frame);
                    self.emit(SensorEvent::TemperatureLogUpdated(snapshot));
                }
            }
            KnownCharacteristic::HumidityLog => {
                let frame = LogFrame::parse(data)?;
                if self.humidity_log.advance(frame.head) {
                    let snapshot = LogSnapshot::from_frame(LogKind::Humidity, &frame);
                    self.emit(SensorEvent::HumidityLogUpdated(snapshot));
                }
            }
        }
        Ok(())
    }

    // === Flags ===

    fn set_scan_in_progress(&mut self, value: bool) {
        self.flags.scan_in_progress = value;
        self.emit_state();
    }

    fn set_device_connecting(&mut self, value: bool) {
        self.flags.device_connecting = value;
        self.emit_state();
    }

    fn set_device_connected(&mut self, value: bool) {
        let was_connected = self.flags.device_connected;
        self.flags.device_connected = value;
        self.emit_state();

        if value {
            if self.refresh_timer.is_none() {
                self.refresh_timer = Some(
                    self.scheduler
                        .schedule(TimerKind::Refresh, self.config.refresh_interval),
                );
            }
            if !was_connected {
                self.remember_connected_device();
            }
        } else if let Some(timer) = self.refresh_timer.take() {
            self.scheduler.cancel(timer);
        }
    }

    fn remember_connected_device(&mut self) {
        let Some(peripheral) = &self.connection.peripheral else {
            return;
        };

        let record = LastDeviceRecord::new(peripheral.as_str(), self.connection.name.clone());
        if let Err(e) = self.store.save(&record) {
            warn!("Failed to remember {}: {}", peripheral, e);
        }
    }

    fn emit_state(&self) {
        self.emit(SensorEvent::StateChanged(self.state()));
    }

    fn emit(&self, event: SensorEvent) {
        trace!("Emitting {}", event.name());
        let _ = self.event_tx.send(event);
    }
}
