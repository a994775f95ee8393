//! Sensor session management.
//!
//! This module contains the state machine that scans for RTemp sensors,
//! keeps a single connection alive and turns characteristic values into
//! [`SensorEvent`]s, plus the tokio service that drives it.

pub mod connection;
pub mod events;
pub mod manager;
pub mod runtime;
pub mod state;
pub mod timer;

pub use connection::{ActiveConnection, DiscoveryPhase};
pub use events::SensorEvent;
pub use manager::SessionManager;
pub use runtime::Session;
pub use state::{SensorState, SessionFlags};
pub use timer::{Scheduler, TimerFired, TimerId, TimerKind, TokioScheduler};
