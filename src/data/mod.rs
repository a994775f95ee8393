//! Data structures for sensor data.
//!
//! This module contains the types handed to listeners and persisted
//! between runs.

pub mod device;
pub mod log;

pub use device::{DiscoveredDevice, LastDeviceRecord, UNNAMED_DEVICE};
pub use log::LogSnapshot;
