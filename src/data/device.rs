//! Discovered and remembered sensors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ble::PeripheralId;

/// Name used for sensors that do not advertise one.
pub const UNNAMED_DEVICE: &str = "Unnamed device";

/// A sensor seen during a scan, or resolved from a remembered identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Advertised name.
    pub display_name: Option<String>,
    /// Handle used to connect; `None` makes the device unconnectable.
    pub handle: Option<PeripheralId>,
}

impl DiscoveredDevice {
    /// Create a device from an advertisement, substituting the placeholder
    /// name when none was advertised.
    pub fn from_advertisement(handle: PeripheralId, local_name: Option<String>) -> Self {
        Self {
            display_name: Some(local_name.unwrap_or_else(|| UNNAMED_DEVICE.to_string())),
            handle: Some(handle),
        }
    }

    /// Name to show for this device.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(UNNAMED_DEVICE)
    }
}

/// The persisted record of the last connected sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastDeviceRecord {
    /// Platform identifier of the peripheral.
    pub identifier: String,
    /// Name at the time of connection.
    #[serde(default)]
    pub name: Option<String>,
    /// When the connection was established.
    pub connected_at: DateTime<Utc>,
}

impl LastDeviceRecord {
    /// Create a record stamped with the current time.
    pub fn new(identifier: impl Into<String>, name: Option<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name,
            connected_at: Utc::now(),
        }
    }
}
