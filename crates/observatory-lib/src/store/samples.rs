//! Append-only sample history
//!
//! Samples are partitioned by target and kept in timestamp order. When a
//! persistence path is configured every append is written as a single JSON
//! line so that a restarted checker resumes with its full history.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::Sample;

/// Reporting horizon used by `last_day`
const DAY_SECS: i64 = 24 * 60 * 60;

/// Append-only store of probe samples
pub struct SampleStore {
    /// target slug -> samples in ascending timestamp order
    partitions: DashMap<String, Vec<Sample>>,
    /// Open journal file, if persistence is enabled
    journal: Option<Mutex<File>>,
    journal_path: Option<PathBuf>,
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SampleStore {
    /// Create a store that keeps history in memory only
    pub fn in_memory() -> Self {
        Self {
            partitions: DashMap::new(),
            journal: None,
            journal_path: None,
        }
    }

    /// Open (or create) a JSON-lines journal and replay it
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let io_err = |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let store = Self {
            partitions: DashMap::new(),
            journal: None,
            journal_path: Some(path.clone()),
        };

        if path.exists() {
            store.replay(&path)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        // Terminate a torn trailing record so the next append starts clean
        if !ends_with_newline(&mut file).map_err(io_err)? {
            file.write_all(b"\n").map_err(io_err)?;
        }

        Ok(Self {
            journal: Some(Mutex::new(file)),
            ..store
        })
    }

    fn replay(&self, path: &Path) -> Result<(), StoreError> {
        let file = File::open(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut loaded = 0usize;
        let mut skipped = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Sample>(&line) {
                Ok(sample) => {
                    self.insert(sample);
                    loaded += 1;
                }
                Err(e) => {
                    // A torn final line after a crash is expected; keep going
                    skipped += 1;
                    warn!(error = %e, "Skipping unreadable sample record");
                }
            }
        }

        info!(path = %path.display(), samples = loaded, skipped, "Replayed sample journal");
        Ok(())
    }

    /// Append a fully formed sample
    pub fn append(&self, sample: Sample) -> Result<(), StoreError> {
        if let Some(journal) = &self.journal {
            let mut line = serde_json::to_vec(&sample)?;
            line.push(b'\n');

            let mut file = journal.lock().map_err(|_| StoreError::Poisoned)?;
            file.write_all(&line).map_err(|source| StoreError::Io {
                path: self.journal_display(),
                source,
            })?;
        }

        debug!(slug = %sample.target, timestamp = sample.timestamp, "Sample appended");
        self.insert(sample);
        Ok(())
    }

    fn insert(&self, sample: Sample) {
        let mut partition = self.partitions.entry(sample.target.clone()).or_default();
        // Keep ascending order; ties stay in insertion order
        let pos = partition.partition_point(|s| s.timestamp <= sample.timestamp);
        partition.insert(pos, sample);
    }

    fn journal_display(&self) -> String {
        self.journal_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    /// All samples for `target` with `since <= timestamp < until`
    pub fn range(&self, target: &str, since: i64, until: i64) -> Vec<Sample> {
        self.partitions
            .get(target)
            .map(|partition| {
                partition
                    .iter()
                    .filter(|s| s.timestamp >= since && s.timestamp < until)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Response times of qualifying samples in `[now - window, now)`
    pub fn trailing_window(&self, target: &str, now: i64, window: Duration) -> Vec<f64> {
        let since = now - window.as_secs() as i64;
        self.partitions
            .get(target)
            .map(|partition| {
                partition
                    .iter()
                    .filter(|s| s.timestamp >= since && s.timestamp < now)
                    .filter(|s| s.is_qualifying())
                    .filter_map(|s| s.response_time_ms)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All samples for `target` in the 24 hours up to and including `now`
    pub fn last_day(&self, target: &str, now: i64) -> Vec<Sample> {
        self.range(target, now - DAY_SECS, now + 1)
    }

    /// Most recent sample for `target`
    pub fn latest(&self, target: &str) -> Option<Sample> {
        self.partitions
            .get(target)
            .and_then(|partition| partition.last().cloned())
    }

    /// Samples across all targets with `timestamp >= since`, ascending
    pub fn since(&self, since: i64) -> Vec<Sample> {
        let mut samples: Vec<Sample> = self
            .partitions
            .iter()
            .flat_map(|partition| {
                partition
                    .value()
                    .iter()
                    .filter(|s| s.timestamp >= since)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        samples
    }

    /// Number of samples held for `target`
    pub fn len(&self, target: &str) -> usize {
        self.partitions.get(target).map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(|p| p.value().is_empty())
    }
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
