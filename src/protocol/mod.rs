//! Sensor payload decoding.
//!
//! This module handles decoding of the raw characteristic values
//! the RTemp sensor exposes.

pub mod log;
pub mod reading;

pub use log::{LogCursor, LogFrame, LogKind, LOG_SENTINEL};
pub use reading::{decode_battery, decode_humidity, decode_temperature};
