//! Boundary between the session manager and the radio stack.
//!
//! The session manager never talks to a Bluetooth library directly. It issues
//! fire-and-forget requests through [`BleStack`] and receives the outcome of
//! each request later as a [`StackEvent`].

use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

/// Power/authorization state of the local Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum AdapterState {
    /// State not yet known, or the adapter is resetting.
    #[default]
    Unknown,
    /// The platform has no BLE support.
    Unsupported,
    /// The application is not allowed to use Bluetooth.
    Unauthorized,
    /// Bluetooth is switched off.
    PoweredOff,
    /// Bluetooth is on and usable.
    PoweredOn,
}

impl AdapterState {
    /// Check if the adapter can scan and connect.
    pub fn is_powered_on(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Unsupported => write!(f, "Unsupported"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::PoweredOff => write!(f, "PoweredOff"),
            Self::PoweredOn => write!(f, "PoweredOn"),
        }
    }
}

/// Opaque, stable identifier of a remote peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Wrap a platform identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string, suitable for persisting.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Handle to a discovered GATT service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattService {
    /// Service UUID.
    pub uuid: Uuid,
}

/// Handle to a discovered GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the service that exposes the characteristic.
    pub service_uuid: Uuid,
}

/// Failure reported by the stack for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackError(pub String);

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for StackError {}

impl From<btleplug::Error> for StackError {
    fn from(err: btleplug::Error) -> Self {
        Self(err.to_string())
    }
}

/// Callback from the radio stack into the session manager.
#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent {
    /// The adapter changed power/authorization state.
    AdapterStateChanged(AdapterState),
    /// An advertisement matching the scan filter was received.
    AdvertisementObserved {
        /// The advertising peripheral.
        peripheral: PeripheralId,
        /// Advertised local name, if any.
        local_name: Option<String>,
    },
    /// A connect request succeeded.
    Connected(PeripheralId),
    /// A connect request failed.
    ConnectFailed {
        /// The peripheral that could not be reached.
        peripheral: PeripheralId,
        /// Stack-reported reason.
        error: StackError,
    },
    /// A link went down.
    Disconnected(PeripheralId),
    /// Service discovery finished.
    ServicesDiscovered {
        /// The peripheral that was queried.
        peripheral: PeripheralId,
        /// Discovered services, or the discovery failure.
        result: Result<Vec<GattService>, StackError>,
    },
    /// Characteristic discovery finished for one service.
    CharacteristicsDiscovered {
        /// The peripheral that was queried.
        peripheral: PeripheralId,
        /// The service whose characteristics were discovered.
        service: GattService,
        /// Discovered characteristics, or the discovery failure.
        result: Result<Vec<GattCharacteristic>, StackError>,
    },
    /// A read completed or a notification arrived.
    ValueUpdated {
        /// The peripheral that produced the value.
        peripheral: PeripheralId,
        /// The characteristic the value belongs to.
        characteristic: GattCharacteristic,
        /// The raw value, or the read failure.
        result: Result<Bytes, StackError>,
    },
}

/// Requests the session manager makes of the radio stack.
///
/// Every request completes asynchronously by producing a [`StackEvent`];
/// implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait BleStack {
    /// Current adapter state.
    fn adapter_state(&self) -> AdapterState;

    /// Start scanning for peripherals advertising any of `services`.
    fn start_scan(&self, services: Vec<Uuid>);

    /// Stop a running scan.
    fn stop_scan(&self);

    /// Open a link to `peripheral`.
    fn connect(&self, peripheral: &PeripheralId);

    /// Abort a pending connect or drop an established link.
    fn cancel_connect(&self, peripheral: &PeripheralId);

    /// Discover all services of a connected peripheral.
    fn discover_services(&self, peripheral: &PeripheralId);

    /// Discover all characteristics of one service.
    fn discover_characteristics(&self, peripheral: &PeripheralId, service: GattService);

    /// Read a characteristic value.
    fn read(&self, peripheral: &PeripheralId, characteristic: GattCharacteristic);

    /// Enable or disable notifications for a characteristic.
    fn set_notify(&self, peripheral: &PeripheralId, characteristic: GattCharacteristic, enabled: bool);

    /// Resolve a previously persisted identifier into a connectable
    /// peripheral, returning its last known name.
    fn retrieve_peripheral(&self, identifier: &str) -> Option<(PeripheralId, Option<String>)>;
}
