//! Checker configuration

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use observatory_lib::anomaly::{AnomalyConfig, AnomalyOverrides};
use observatory_lib::notify::ChannelsConfig;
use observatory_lib::pipeline::TargetSpec;
use observatory_lib::Target;
use serde::Deserialize;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "OBSERVATORY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "observatory.toml";

/// Checker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CheckerConfig {
    /// API server port for reports, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between check passes
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_probes: usize,

    /// Directory holding samples and alert state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Status page payloads rewritten after each pass
    #[serde(default)]
    pub status_json_paths: Vec<PathBuf>,

    #[serde(default)]
    pub anomaly: AnomalyConfig,

    #[serde(default)]
    pub alerting: AlertingConfig,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertingConfig {
    /// Deliver notifications; state is tracked either way
    #[serde(default)]
    pub enabled: bool,

    /// Consecutive failures before a target is declared DOWN
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    #[serde(default = "default_channel_timeout")]
    pub channel_timeout_secs: u64,

    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_threshold(),
            channel_timeout_secs: default_channel_timeout(),
            channels: ChannelsConfig::default(),
        }
    }
}

/// A target entry with optional detector overrides
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    #[serde(flatten)]
    pub target: Target,
    #[serde(default)]
    pub anomaly: Option<AnomalyOverrides>,
}

fn default_api_port() -> u16 {
    3003
}

fn default_interval() -> u64 {
    300
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_max_concurrent() -> usize {
    4
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./observatory-data")
}

fn default_threshold() -> u32 {
    observatory_lib::alerting::DEFAULT_FAILURE_THRESHOLD
}

fn default_channel_timeout() -> u64 {
    10
}

impl CheckerConfig {
    /// Load from the configuration file and `OBSERVATORY__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| {
            std::env::var(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
        });

        let config = config::Config::builder()
            .add_source(config::File::from(path.as_path()).required(false))
            .add_source(
                config::Environment::with_prefix("OBSERVATORY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        let parsed: Self = config
            .try_deserialize()
            .context("Invalid checker configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse a TOML document, used by tests and tooling
    pub fn from_toml(text: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        let parsed: Self = config
            .try_deserialize()
            .context("Invalid checker configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            bail!("At least one target must be configured");
        }

        let mut seen = HashSet::new();
        for entry in &self.targets {
            let target = &entry.target;
            if target.slug.is_empty() {
                bail!("Target slug must not be empty");
            }
            if !seen.insert(target.slug.as_str()) {
                bail!("Duplicate target slug: {}", target.slug);
            }
            url::Url::parse(&target.url).with_context(|| {
                format!("Invalid URL for target {}: {}", target.slug, target.url)
            })?;
        }

        if self.interval_secs == 0 {
            bail!("interval_secs must be positive");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn samples_path(&self) -> PathBuf {
        self.data_dir.join("samples.jsonl")
    }

    pub fn alert_state_path(&self) -> PathBuf {
        self.data_dir.join("alert_state.json")
    }

    pub fn target_specs(&self) -> Vec<TargetSpec> {
        self.targets
            .iter()
            .map(|entry| TargetSpec {
                target: entry.target.clone(),
                anomaly: entry.anomaly.clone(),
            })
            .collect()
    }
}
