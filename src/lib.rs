// Allow derivable impls for clarity
#![allow(clippy::derivable_impls)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # rtemp-ble
//!
//! A cross-platform Rust library for monitoring RTemp temperature and
//! humidity sensors over Bluetooth Low Energy.
//!
//! ## Features
//!
//! - **Sensor Discovery**: Timed scans filtered on the RTemp sensor service
//! - **Single Connection**: Connect timeout, cancellation and full teardown
//! - **Live Values**: Temperature, humidity and battery level
//! - **Sensor Logs**: Decoded temperature and humidity ring buffers,
//!   reported only when they advance
//! - **Reconnect**: The last connected sensor is remembered and can be
//!   reconnected silently
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtemp_ble::{MemoryStore, Result, SensorEvent, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = Session::start(SessionConfig::default(), Box::new(MemoryStore::new())).await?;
//!     let mut events = session.subscribe();
//!
//!     session.begin_scan().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             SensorEvent::DeviceDiscovered(device) => {
//!                 println!("Found sensor: {}", device.name());
//!                 session.connect(device).await?;
//!             }
//!             SensorEvent::TemperatureUpdated(celsius) => {
//!                 println!("Temperature: {:.1}°C", celsius);
//!             }
//!             _ => {}
//!         }
//!     }
//!
//!     session.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! [`SessionManager`] is a synchronous state machine over the [`BleStack`]
//! and [`Scheduler`] traits, so it can be driven directly in tests.
//! [`Session`] runs it on a tokio task over [`BtleplugStack`] and
//! [`TokioScheduler`].
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use error::{Error, Result};
pub use session::{Session, SessionManager};

// Re-export commonly used types from submodules
pub use ble::{AdapterState, BleStack, BtleplugStack, PeripheralId, StackEvent};
pub use config::SessionConfig;
pub use data::{DiscoveredDevice, LastDeviceRecord, LogSnapshot};
pub use protocol::LogKind;
pub use session::{
    DiscoveryPhase, Scheduler, SensorEvent, SensorState, TimerKind, TokioScheduler,
};
pub use storage::{DeviceStore, JsonFileStore, MemoryStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<Session>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<SensorEvent>();
        let _ = std::any::TypeId::of::<SensorState>();
        let _ = std::any::TypeId::of::<LogSnapshot>();
        let _ = std::any::TypeId::of::<SessionConfig>();
        let _ = std::any::TypeId::of::<JsonFileStore>();
    }
}
