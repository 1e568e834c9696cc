//! Persistent state owned by the pipeline
//!
//! - `SampleStore`: append-only probe history per target
//! - `snapshot`: atomic JSON snapshots for alert state and status pages

mod samples;
mod snapshot;

pub use samples::SampleStore;
pub use snapshot::{load_json, write_json_atomic};
