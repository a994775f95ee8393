//! Events delivered from the session manager to its listener.

use crate::data::{DiscoveredDevice, LogSnapshot};
use crate::session::state::SensorState;

/// Everything a UI needs to follow the sensor session.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// A scan window ended.
    ScanComplete {
        /// Why the scan ended early, if it did.
        error: Option<String>,
    },
    /// An advertisement from a sensor was observed.
    DeviceDiscovered(DiscoveredDevice),
    /// One of the inputs of [`SensorState`] changed.
    StateChanged(SensorState),
    /// Live temperature in degrees Celsius.
    TemperatureUpdated(f64),
    /// Live relative humidity in percent.
    HumidityUpdated(i32),
    /// Battery level in percent.
    BatteryUpdated(i32),
    /// The temperature log advanced.
    TemperatureLogUpdated(LogSnapshot),
    /// The humidity log advanced.
    HumidityLogUpdated(LogSnapshot),
    /// The stack reported that a connect attempt failed.
    ConnectFailed {
        /// Stack-reported reason.
        reason: String,
    },
    /// Service or characteristic discovery failed; the connection was dropped.
    DiscoveryFailed {
        /// Stack-reported reason.
        reason: String,
    },
    /// Every handle on the sensor has been discovered.
    Ready {
        /// The connected sensor.
        device: DiscoveredDevice,
    },
}

impl SensorEvent {
    /// Short event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ScanComplete { .. } => "scan_complete",
            Self::DeviceDiscovered(_) => "device_discovered",
            Self::StateChanged(_) => "state_changed",
            Self::TemperatureUpdated(_) => "temperature_updated",
            Self::HumidityUpdated(_) => "humidity_updated",
            Self::BatteryUpdated(_) => "battery_updated",
            Self::TemperatureLogUpdated(_) => "temperature_log_updated",
            Self::HumidityLogUpdated(_) => "humidity_log_updated",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::DiscoveryFailed { .. } => "discovery_failed",
            Self::Ready { .. } => "ready",
        }
    }
}
