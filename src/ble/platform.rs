//! btleplug-backed radio stack.
//!
//! [`BtleplugStack`] turns the fire-and-forget [`BleStack`] requests into
//! spawned btleplug calls and reports every outcome as a [`StackEvent`] on an
//! unbounded channel. Adapter events (advertisements, disconnects, power
//! changes) are watched by a background task for the lifetime of the stack.

use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::stack::{
    AdapterState, BleStack, GattCharacteristic, GattService, PeripheralId, StackError, StackEvent,
};
use crate::error::{Error, Result};

#[derive(Clone)]
struct KnownPeripheral {
    peripheral: Peripheral,
    name: Option<String>,
}

struct Shared {
    adapter: Adapter,
    state: RwLock<AdapterState>,
    scanning: RwLock<bool>,
    scan_services: RwLock<Vec<Uuid>>,
    peripherals: RwLock<HashMap<PeripheralId, KnownPeripheral>>,
    listeners: RwLock<HashMap<PeripheralId, JoinHandle<()>>>,
    event_tx: mpsc::UnboundedSender<StackEvent>,
}

/// [`BleStack`] on top of the platform Bluetooth adapter.
pub struct BtleplugStack {
    shared: Arc<Shared>,
    watcher: JoinHandle<()>,
}

impl BtleplugStack {
    /// Open the first Bluetooth adapter of this machine.
    ///
    /// Returns the stack and the receiver its events arrive on.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<StackEvent>)> {
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

        Self::with_adapter(adapter).await
    }

    /// Use a specific adapter.
    pub async fn with_adapter(
        adapter: Adapter,
    ) -> Result<(Self, mpsc::UnboundedReceiver<StackEvent>)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // Peripherals the adapter already knows can be reconnected without
        // scanning first.
        let mut peripherals = HashMap::new();
        for peripheral in adapter.peripherals().await.map_err(Error::Bluetooth)? {
            let name = peripheral
                .properties()
                .await
                .ok()
                .flatten()
                .and_then(|p| p.local_name);
            peripherals.insert(peripheral_id(&peripheral), KnownPeripheral { peripheral, name });
        }
        debug!("Adapter knows {} peripherals", peripherals.len());

        let state = initial_adapter_state(adapter.adapter_state().await);
        info!("Initial adapter state: {}", state);

        let shared = Arc::new(Shared {
            adapter,
            state: RwLock::new(state),
            scanning: RwLock::new(false),
            scan_services: RwLock::new(Vec::new()),
            peripherals: RwLock::new(peripherals),
            listeners: RwLock::new(HashMap::new()),
            event_tx,
        });

        let watcher = tokio::spawn(watch_adapter(shared.clone()));

        Ok((Self { shared, watcher }, event_rx))
    }

}

impl Drop for BtleplugStack {
    fn drop(&mut self) {
        self.watcher.abort();
        for (_, listener) in self.shared.listeners.write().drain() {
            listener.abort();
        }
    }
}

impl BleStack for BtleplugStack {
    fn adapter_state(&self) -> AdapterState {
        *self.shared.state.read()
    }

    fn start_scan(&self, services: Vec<Uuid>) {
        info!("Starting BLE scan for {:?}", services);

        *self.shared.scan_services.write() = services.clone();
        *self.shared.scanning.write() = true;

        let shared = self.shared.clone();
        tokio::spawn(async move {
            if let Err(e) = shared.adapter.start_scan(ScanFilter { services }).await {
                error!("Failed to start scan: {}", e);
                *shared.scanning.write() = false;
            }
        });
    }

    fn stop_scan(&self) {
        if !*self.shared.scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return;
        }

        info!("Stopping BLE scan");
        *self.shared.scanning.write() = false;

        let shared = self.shared.clone();
        tokio::spawn(async move {
            if let Err(e) = shared.adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
    }

    fn connect(&self, peripheral: &PeripheralId) {
        let Some(known) = self.shared.lookup(peripheral) else {
            self.shared.send(StackEvent::ConnectFailed {
                peripheral: peripheral.clone(),
                error: StackError(format!("Unknown peripheral {}", peripheral)),
            });
            return;
        };

        let shared = self.shared.clone();
        let id = peripheral.clone();
        tokio::spawn(async move {
            debug!("Connecting to {}", id);
            match known.peripheral.connect().await {
                Ok(()) => {
                    info!("Successfully connected to {}", id);
                    shared.listen(id.clone(), known.peripheral);
                    shared.send(StackEvent::Connected(id));
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", id, e);
                    shared.send(StackEvent::ConnectFailed {
                        peripheral: id,
                        error: e.into(),
                    });
                }
            }
        });
    }

    fn cancel_connect(&self, peripheral: &PeripheralId) {
        if let Some(listener) = self.shared.listeners.write().remove(peripheral) {
            listener.abort();
        }

        let Some(known) = self.shared.lookup(peripheral) else {
            debug!("Nothing to cancel for unknown peripheral {}", peripheral);
            return;
        };

        let id = peripheral.clone();
        tokio::spawn(async move {
            match known.peripheral.disconnect().await {
                Ok(()) => debug!("Disconnected from {}", id),
                Err(e) => warn!("Failed to disconnect from {}: {}", id, e),
            }
        });
    }

    fn discover_services(&self, peripheral: &PeripheralId) {
        let Some(known) = self.shared.lookup(peripheral) else {
            self.shared.send(StackEvent::ServicesDiscovered {
                peripheral: peripheral.clone(),
                result: Err(unknown(peripheral)),
            });
            return;
        };

        let shared = self.shared.clone();
        let id = peripheral.clone();
        tokio::spawn(async move {
            let result = match known.peripheral.discover_services().await {
                Ok(()) => Ok(known
                    .peripheral
                    .services()
                    .iter()
                    .map(|service| GattService { uuid: service.uuid })
                    .collect()),
                Err(e) => Err(e.into()),
            };
            shared.send(StackEvent::ServicesDiscovered {
                peripheral: id,
                result,
            });
        });
    }

    fn discover_characteristics(&self, peripheral: &PeripheralId, service: GattService) {
        // btleplug discovers characteristics together with services.
        let result = match self.shared.lookup(peripheral) {
            Some(known) => known
                .peripheral
                .services()
                .into_iter()
                .find(|s| s.uuid == service.uuid)
                .map(|s| s.characteristics.iter().map(to_gatt).collect())
                .ok_or_else(|| StackError(format!("Service {} not discovered", service.uuid))),
            None => Err(unknown(peripheral)),
        };

        self.shared.send(StackEvent::CharacteristicsDiscovered {
            peripheral: peripheral.clone(),
            service,
            result,
        });
    }

    fn read(&self, peripheral: &PeripheralId, characteristic: GattCharacteristic) {
        let target = self
            .shared
            .lookup(peripheral)
            .ok_or_else(|| unknown(peripheral))
            .and_then(|known| {
                find_characteristic(&known.peripheral, characteristic)
                    .map(|c| (known.peripheral, c))
            });

        let (device, handle) = match target {
            Ok(target) => target,
            Err(error) => {
                self.shared.send(StackEvent::ValueUpdated {
                    peripheral: peripheral.clone(),
                    characteristic,
                    result: Err(error),
                });
                return;
            }
        };

        let shared = self.shared.clone();
        let id = peripheral.clone();
        tokio::spawn(async move {
            let result = device.read(&handle).await.map(Bytes::from).map_err(StackError::from);
            if let Ok(data) = &result {
                trace!("Read {} bytes from characteristic {}", data.len(), handle.uuid);
            }
            shared.send(StackEvent::ValueUpdated {
                peripheral: id,
                characteristic,
                result,
            });
        });
    }

    fn set_notify(&self, peripheral: &PeripheralId, characteristic: GattCharacteristic, enabled: bool) {
        let Some(known) = self.shared.lookup(peripheral) else {
            debug!("Cannot change notifications on unknown peripheral {}", peripheral);
            return;
        };

        let handle = match find_characteristic(&known.peripheral, characteristic) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };

        tokio::spawn(async move {
            let result = if enabled {
                known.peripheral.subscribe(&handle).await
            } else {
                known.peripheral.unsubscribe(&handle).await
            };

            match result {
                Ok(()) => debug!(
                    "Notifications {} for {}",
                    if enabled { "enabled" } else { "disabled" },
                    handle.uuid
                ),
                Err(e) => warn!("Failed to change notifications for {}: {}", handle.uuid, e),
            }
        });
    }

    fn retrieve_peripheral(&self, identifier: &str) -> Option<(PeripheralId, Option<String>)> {
        let id = PeripheralId::new(identifier);
        let name = self.shared.peripherals.read().get(&id)?.name.clone();
        Some((id, name))
    }
}

impl Shared {
    fn send(&self, event: StackEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("Stack event dropped, session gone");
        }
    }

    fn lookup(&self, peripheral: &PeripheralId) -> Option<KnownPeripheral> {
        self.peripherals.read().get(peripheral).cloned()
    }

    /// Forward notifications of a connected peripheral as value updates.
    fn listen(self: &Arc<Self>, id: PeripheralId, peripheral: Peripheral) {
        let shared = self.clone();
        let key = id.clone();

        let handle = tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream for {}: {}", id, e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {}: {:02X?}",
                    notification.uuid,
                    &notification.value
                );

                let service_uuid = peripheral
                    .characteristics()
                    .iter()
                    .find(|c| c.uuid == notification.uuid)
                    .map(|c| c.service_uuid)
                    .unwrap_or_else(Uuid::nil);

                shared.send(StackEvent::ValueUpdated {
                    peripheral: id.clone(),
                    characteristic: GattCharacteristic {
                        uuid: notification.uuid,
                        service_uuid,
                    },
                    result: Ok(Bytes::from(notification.value)),
                });
            }

            debug!("Notification stream of {} ended", id);
        });

        if let Some(previous) = self.listeners.write().insert(key, handle) {
            previous.abort();
        }
    }

    async fn observe(&self, id: btleplug::platform::PeripheralId) {
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

        let services = self.scan_services.read().clone();
        if !matches_filter(&properties, &services) {
            return;
        }

        let handle = peripheral_id(&peripheral);
        let local_name = properties.local_name;

        self.peripherals.write().insert(
            handle.clone(),
            KnownPeripheral {
                peripheral,
                name: local_name.clone(),
            },
        );

        self.send(StackEvent::AdvertisementObserved {
            peripheral: handle,
            local_name,
        });
    }
}

async fn watch_adapter(shared: Arc<Shared>) {
    let mut events = match shared.adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to get adapter events: {}", e);
            return;
        }
    };

    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let scanning = *shared.scanning.read();
                if scanning {
                    shared.observe(id).await;
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let peripheral = PeripheralId::new(id.to_string());
                debug!("Device disconnected: {}", peripheral);

                if let Some(listener) = shared.listeners.write().remove(&peripheral) {
                    listener.abort();
                }
                shared.send(StackEvent::Disconnected(peripheral));
            }
            CentralEvent::StateUpdate(state) => {
                let state = adapter_state(state);
                info!("Adapter is now {}", state);

                *shared.state.write() = state;
                shared.send(StackEvent::AdapterStateChanged(state));
            }
            _ => {}
        }
    }

    debug!("Adapter event stream ended");
}

fn peripheral_id(peripheral: &Peripheral) -> PeripheralId {
    PeripheralId::new(peripheral.id().to_string())
}

fn unknown(peripheral: &PeripheralId) -> StackError {
    StackError(format!("Unknown peripheral {}", peripheral))
}

fn to_gatt(characteristic: &Characteristic) -> GattCharacteristic {
    GattCharacteristic {
        uuid: characteristic.uuid,
        service_uuid: characteristic.service_uuid,
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    characteristic: GattCharacteristic,
) -> std::result::Result<Characteristic, StackError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid)
        .ok_or_else(|| StackError(format!("Characteristic {} not discovered", characteristic.uuid)))
}

fn initial_adapter_state(state: btleplug::Result<CentralState>) -> AdapterState {
    match state {
        Ok(state) => adapter_state(state),
        Err(e) => {
            warn!("Could not read adapter state: {}", e);
            AdapterState::Unknown
        }
    }
}

fn adapter_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}

/// Check an advertisement against the scan's service filter. An empty
/// filter accepts everything.
fn matches_filter(properties: &PeripheralProperties, services: &[Uuid]) -> bool {
    services.is_empty() || properties.services.iter().any(|s| services.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{BATTERY_SERVICE_UUID, SENSOR_SERVICE_UUID};
    use btleplug::api::CharPropFlags;
    use std::collections::BTreeSet;

    #[test]
    fn test_adapter_state_mapping() {
        assert_eq!(adapter_state(CentralState::PoweredOn), AdapterState::PoweredOn);
        assert_eq!(adapter_state(CentralState::PoweredOff), AdapterState::PoweredOff);
        assert_eq!(adapter_state(CentralState::Unknown), AdapterState::Unknown);
    }

    #[test]
    fn test_initial_adapter_state() {
        assert_eq!(
            initial_adapter_state(Ok(CentralState::PoweredOff)),
            AdapterState::PoweredOff
        );
        assert_eq!(
            initial_adapter_state(Ok(CentralState::PoweredOn)),
            AdapterState::PoweredOn
        );
        assert_eq!(
            initial_adapter_state(Err(btleplug::Error::NotSupported("adapter state".into()))),
            AdapterState::Unknown
        );
    }

    #[test]
    fn test_scan_filter() {
        let mut properties = PeripheralProperties::default();
        assert!(matches_filter(&properties, &[]));
        assert!(!matches_filter(&properties, &[SENSOR_SERVICE_UUID]));

        properties.services = vec![BATTERY_SERVICE_UUID, SENSOR_SERVICE_UUID];
        assert!(matches_filter(&properties, &[SENSOR_SERVICE_UUID]));

        properties.services = vec![BATTERY_SERVICE_UUID];
        assert!(!matches_filter(&properties, &[SENSOR_SERVICE_UUID]));
    }

    #[test]
    fn test_to_gatt() {
        let characteristic = Characteristic {
            uuid: SENSOR_SERVICE_UUID,
            service_uuid: BATTERY_SERVICE_UUID,
            properties: CharPropFlags::empty(),
            descriptors: BTreeSet::new(),
        };
        assert_eq!(
            to_gatt(&characteristic),
            GattCharacteristic {
                uuid: SENSOR_SERVICE_UUID,
                service_uuid: BATTERY_SERVICE_UUID,
            }
        );
    }
}
