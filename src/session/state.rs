//! Derived sensor availability state.

use crate::ble::AdapterState;

/// Overall state of the sensor session as presented to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum SensorState {
    /// Idle, no sensor connected.
    #[default]
    NotConnected,
    /// A connect attempt or discovery is in flight.
    Connecting,
    /// A sensor is connected.
    Connected,
    /// A scan is running.
    Scanning,
    /// Bluetooth is unusable for a reason other than being switched off.
    ErrorGeneric,
    /// Bluetooth is switched off.
    ErrorAdapterOff,
}

impl SensorState {
    /// Derive the state from the adapter state and the session flags.
    ///
    /// Adapter problems win over everything; otherwise scanning beats
    /// connecting, which beats connected.
    pub fn derive(adapter: AdapterState, flags: SessionFlags) -> Self {
        match adapter {
            AdapterState::PoweredOff => Self::ErrorAdapterOff,
            AdapterState::PoweredOn => {
                if flags.scan_in_progress {
                    Self::Scanning
                } else if flags.device_connecting {
                    Self::Connecting
                } else if flags.device_connected {
                    Self::Connected
                } else {
                    Self::NotConnected
                }
            }
            _ => Self::ErrorGeneric,
        }
    }

    /// Check if the state reports an adapter problem.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::ErrorGeneric | Self::ErrorAdapterOff)
    }
}

impl std::fmt::Display for SensorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Not connected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::ErrorGeneric => write!(f, "Bluetooth unavailable"),
            Self::ErrorAdapterOff => write!(f, "Bluetooth off"),
        }
    }
}

/// The three session booleans the state is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionFlags {
    /// A scan is running.
    pub scan_in_progress: bool,
    /// A connect attempt or discovery is in flight.
    pub device_connecting: bool,
    /// A sensor is connected.
    pub device_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADAPTER_STATES: [AdapterState; 5] = [
        AdapterState::Unknown,
        AdapterState::Unsupported,
        AdapterState::Unauthorized,
        AdapterState::PoweredOff,
        AdapterState::PoweredOn,
    ];

    fn all_flags() -> impl Iterator<Item = SessionFlags> {
        (0u8..8).map(|bits| SessionFlags {
            scan_in_progress: bits & 0b001 != 0,
            device_connecting: bits & 0b010 != 0,
            device_connected: bits & 0b100 != 0,
        })
    }

    #[test]
    fn test_adapter_errors_override_flags() {
        for flags in all_flags() {
            assert_eq!(
                SensorState::derive(AdapterState::PoweredOff, flags),
                SensorState::ErrorAdapterOff
            );
            for adapter in [
                AdapterState::Unknown,
                AdapterState::Unsupported,
                AdapterState::Unauthorized,
            ] {
                assert_eq!(SensorState::derive(adapter, flags), SensorState::ErrorGeneric);
            }
        }
    }

    #[test]
    fn test_flag_priority() {
        for flags in all_flags() {
            let expected = if flags.scan_in_progress {
                SensorState::Scanning
            } else if flags.device_connecting {
                SensorState::Connecting
            } else if flags.device_connected {
                SensorState::Connected
            } else {
                SensorState::NotConnected
            };
            assert_eq!(SensorState::derive(AdapterState::PoweredOn, flags), expected);
        }
    }

    #[test]
    fn test_derive_is_deterministic() {
        for adapter in ADAPTER_STATES {
            for flags in all_flags() {
                assert_eq!(
                    SensorState::derive(adapter, flags),
                    SensorState::derive(adapter, flags)
                );
            }
        }
    }

    #[test]
    fn test_is_error() {
        assert!(SensorState::ErrorAdapterOff.is_error());
        assert!(SensorState::ErrorGeneric.is_error());
        assert!(!SensorState::Scanning.is_error());
        assert_eq!(SensorState::default(), SensorState::NotConnected);
    }
}
