//! Bookkeeping for the single active sensor connection.

use crate::ble::{GattCharacteristic, GattService, KnownCharacteristic, KnownService, PeripheralId};

/// Progress of GATT discovery on the active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DiscoveryPhase {
    /// No link yet.
    #[default]
    Idle,
    /// Link is up, services requested.
    ServicesDiscovering,
    /// At least one service answered; some handles may still be missing.
    CharacteristicsDiscovering,
    /// Every service and characteristic handle is known.
    Ready,
}

impl DiscoveryPhase {
    /// Check if discovery is still running.
    pub fn is_discovering(&self) -> bool {
        matches!(self, Self::ServicesDiscovering | Self::CharacteristicsDiscovering)
    }
}

impl std::fmt::Display for DiscoveryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::ServicesDiscovering => write!(f, "ServicesDiscovering"),
            Self::CharacteristicsDiscovering => write!(f, "CharacteristicsDiscovering"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Handles gathered for the connected sensor.
///
/// The peripheral is recorded as soon as a connect attempt starts; services
/// and characteristics fill in as discovery callbacks arrive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveConnection {
    /// Target or connected peripheral.
    pub peripheral: Option<PeripheralId>,
    /// Name of the peripheral, if known.
    pub name: Option<String>,
    /// The RTemp sensor service.
    pub sensor_service: Option<GattService>,
    /// The standard battery service.
    pub battery_service: Option<GattService>,
    /// Live temperature characteristic.
    pub temperature: Option<GattCharacteristic>,
    /// Live humidity characteristic.
    pub humidity: Option<GattCharacteristic>,
    /// Battery level characteristic.
    pub battery: Option<GattCharacteristic>,
    /// Temperature log characteristic.
    pub temperature_log: Option<GattCharacteristic>,
    /// Humidity log characteristic.
    pub humidity_log: Option<GattCharacteristic>,
    /// Services whose characteristic answer has not arrived yet.
    pub pending_services: Vec<KnownService>,
    /// Discovery progress.
    pub phase: DiscoveryPhase,
}

impl ActiveConnection {
    /// Start tracking a connect attempt to `peripheral`.
    pub fn for_peripheral(peripheral: PeripheralId, name: Option<String>) -> Self {
        Self {
            peripheral: Some(peripheral),
            name,
            ..Self::default()
        }
    }

    /// Check if `peripheral` is the one being tracked.
    pub fn is_current(&self, peripheral: &PeripheralId) -> bool {
        self.peripheral.as_ref() == Some(peripheral)
    }

    /// Record a discovered service.
    pub fn set_service(&mut self, kind: KnownService, service: GattService) {
        match kind {
            KnownService::Sensor => self.sensor_service = Some(service),
            KnownService::Battery => self.battery_service = Some(service),
        }
    }

    /// Note that characteristics were requested for `kind`.
    pub fn await_characteristics(&mut self, kind: KnownService) {
        if !self.pending_services.contains(&kind) {
            self.pending_services.push(kind);
        }
    }

    /// Note that `kind` answered its characteristic request.
    pub fn characteristics_answered(&mut self, kind: KnownService) {
        self.pending_services.retain(|&pending| pending != kind);
    }

    /// Check if any service still owes a characteristic answer.
    pub fn is_awaiting_characteristics(&self) -> bool {
        !self.pending_services.is_empty()
    }

    /// Handle slot for a known characteristic.
    pub fn characteristic(&self, kind: KnownCharacteristic) -> Option<GattCharacteristic> {
        match kind {
            KnownCharacteristic::Temperature => self.temperature,
            KnownCharacteristic::Humidity => self.humidity,
            KnownCharacteristic::Battery => self.battery,
            KnownCharacteristic::TemperatureLog => self.temperature_log,
            KnownCharacteristic::HumidityLog => self.humidity_log,
        }
    }

    /// Record a discovered characteristic.
    pub fn set_characteristic(&mut self, kind: KnownCharacteristic, handle: GattCharacteristic) {
        let slot = match kind {
            KnownCharacteristic::Temperature => &mut self.temperature,
            KnownCharacteristic::Humidity => &mut self.humidity,
            KnownCharacteristic::Battery => &mut self.battery,
            KnownCharacteristic::TemperatureLog => &mut self.temperature_log,
            KnownCharacteristic::HumidityLog => &mut self.humidity_log,
        };
        *slot = Some(handle);
    }

    /// All recorded characteristics, in refresh order.
    pub fn known_characteristics(&self) -> Vec<GattCharacteristic> {
        KnownCharacteristic::ALL
            .iter()
            .filter_map(|&kind| self.characteristic(kind))
            .collect()
    }

    /// Check if the peripheral, both services and all five
    /// characteristics are known.
    pub fn is_discovery_complete(&self) -> bool {
        self.peripheral.is_some()
            && self.sensor_service.is_some()
            && self.battery_service.is_some()
            && KnownCharacteristic::ALL
                .iter()
                .all(|&kind| self.characteristic(kind).is_some())
    }

    /// Check if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
