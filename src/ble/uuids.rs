//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for RTemp sensor communication.

use uuid::Uuid;

// RTemp Sensor Service (custom 128-bit base)
/// RTemp sensor service UUID, also used as the scan filter.
pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x1bc5_0000_0200_3180_e511_9da1608c7b7b);
/// Live temperature characteristic UUID (Read, Notify).
pub const TEMPERATURE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x1bc5_0001_0200_3180_e511_9da1608c7b7b);
/// Live humidity characteristic UUID (Read, Notify).
pub const HUMIDITY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x1bc5_0002_0200_3180_e511_9da1608c7b7b);
/// Temperature log characteristic UUID (Read).
pub const TEMPERATURE_LOG_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x1bc5_0003_0200_3180_e511_9da1608c7b7b);
/// Humidity log characteristic UUID (Read).
pub const HUMIDITY_LOG_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x1bc5_0004_0200_3180_e511_9da1608c7b7b);

// Battery Service (Standard BLE)
/// Standard BLE Battery Service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);
/// Battery Level characteristic UUID (Read, Notify).
pub const BATTERY_LEVEL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);

/// Services the session manager records during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownService {
    /// The RTemp sensor service.
    Sensor,
    /// The standard battery service.
    Battery,
}

impl KnownService {
    /// Classify a service UUID.
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        match *uuid {
            SENSOR_SERVICE_UUID => Some(Self::Sensor),
            BATTERY_SERVICE_UUID => Some(Self::Battery),
            _ => None,
        }
    }
}

/// The five characteristics the session manager tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownCharacteristic {
    /// Live temperature reading.
    Temperature,
    /// Live humidity reading.
    Humidity,
    /// Battery level.
    Battery,
    /// Circular temperature history.
    TemperatureLog,
    /// Circular humidity history.
    HumidityLog,
}

impl KnownCharacteristic {
    /// All known characteristics, in refresh order.
    pub const ALL: [Self; 5] = [
        Self::Temperature,
        Self::Humidity,
        Self::Battery,
        Self::TemperatureLog,
        Self::HumidityLog,
    ];

    /// Classify a characteristic UUID.
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        match *uuid {
            TEMPERATURE_CHARACTERISTIC_UUID => Some(Self::Temperature),
            HUMIDITY_CHARACTERISTIC_UUID => Some(Self::Humidity),
            BATTERY_LEVEL_CHARACTERISTIC_UUID => Some(Self::Battery),
            TEMPERATURE_LOG_CHARACTERISTIC_UUID => Some(Self::TemperatureLog),
            HUMIDITY_LOG_CHARACTERISTIC_UUID => Some(Self::HumidityLog),
            _ => None,
        }
    }

    /// The characteristic's UUID.
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Temperature => TEMPERATURE_CHARACTERISTIC_UUID,
            Self::Humidity => HUMIDITY_CHARACTERISTIC_UUID,
            Self::Battery => BATTERY_LEVEL_CHARACTERISTIC_UUID,
            Self::TemperatureLog => TEMPERATURE_LOG_CHARACTERISTIC_UUID,
            Self::HumidityLog => HUMIDITY_LOG_CHARACTERISTIC_UUID,
        }
    }

    /// Whether the sensor pushes this value by notification.
    ///
    /// The log characteristics are read on demand only.
    pub fn is_streamed(&self) -> bool {
        matches!(self, Self::Temperature | Self::Humidity | Self::Battery)
    }
}
