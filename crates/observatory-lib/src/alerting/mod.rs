//! Availability alerting
//!
//! Tracks UP/DOWN state per target with consecutive-failure hysteresis and
//! produces one `AlertEvent` per transition.

mod state_machine;

pub use state_machine::{
    AlertEvent, AlertKind, AlertState, AlertStateMachine, ProbeDetail, DEFAULT_FAILURE_THRESHOLD,
};
