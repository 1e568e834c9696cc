//! Observatory checker daemon
//!
//! Wires configuration, the check loop and the HTTP API together.

pub mod api;
pub mod config;
