//! BLE communication module.
//!
//! This module provides the radio-stack boundary the session manager talks
//! through, the GATT layout of RTemp sensors and the btleplug backend.

pub mod platform;
pub mod stack;
pub mod uuids;

pub use platform::BtleplugStack;
#[cfg(test)]
pub use stack::MockBleStack;
pub use stack::{
    AdapterState, BleStack, GattCharacteristic, GattService, PeripheralId, StackError, StackEvent,
};
pub use uuids::*;
