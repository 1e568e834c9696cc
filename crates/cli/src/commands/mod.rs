//! Subcommand implementations

pub mod anomalies;
pub mod coverage;
pub mod status;
