use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Top-level daemon configuration. Loaded from `collector.toml` (or another
/// basename) layered with `COLLECTOR_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Trading holidays as `YYYY-MM-DD` strings in business time.
    #[serde(default)]
    pub holidays: Vec<String>,
    /// Slack subtracted from the interval when the run gate checks spacing.
    #[serde(default = "default_gate_tolerance_s")]
    pub gate_tolerance_s: u64,
    /// Enables the in-process metadata side-cache; off means no-op cache.
    #[serde(default)]
    pub cache_enabled: bool,
    #[serde(default)]
    pub jobs: HashMap<String, JobConfig>,
}

fn default_gate_tolerance_s() -> u64 {
    10
}

/// One collector job. A single `[jobs.<name>]` table replaces what used to
/// be a dedicated per-symbol script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Logical collection the job writes into.
    pub collection: String,
    /// URL template; `{target}` and `{date}` are substituted at run time.
    pub endpoint: String,
    /// Fan-out sub-targets. Empty means a single run keyed by the job name.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Upstream field carrying the natural key. Omit to key each run on its
    /// own collection timestamp instead of deduplicating upstream snapshots.
    #[serde(default)]
    pub key_field: Option<String>,
    pub interval_s: u64,
    /// Window bounds as `HH:MM` or `HH:MM:SS`, business time, inclusive.
    pub window_start: String,
    pub window_end: String,
    #[serde(default = "default_weekdays")]
    pub weekdays: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_weekdays() -> Vec<String> {
    ["mon", "tue", "wed", "thu", "fri"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

fn default_enabled() -> bool {
    true
}

fn default_max_attempts() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("collector")
    }

    pub fn load_from(basename: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(basename).required(false))
            .add_source(Environment::with_prefix("COLLECTOR").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

/// Shared view of the live configuration. `reload` re-runs the same loader
/// and swaps the snapshot, so running jobs pick up edits on their next tick
/// without a restart.
#[derive(Clone)]
pub struct ConfigHandle {
    basename: String,
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    pub fn new(initial: AppConfig) -> Self {
        Self {
            basename: "collector".to_string(),
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn load(basename: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            basename: basename.to_string(),
            inner: Arc::new(RwLock::new(AppConfig::load_from(basename)?)),
        })
    }

    pub fn reload(&self) -> Result<(), ConfigError> {
        let fresh = AppConfig::load_from(&self.basename)?;
        *self.inner.write().expect("config poisoned") = fresh;
        Ok(())
    }

    /// Swaps in a snapshot directly; used by tests and admin triggers.
    pub fn replace(&self, config: AppConfig) {
        *self.inner.write().expect("config poisoned") = config;
    }

    pub fn snapshot(&self) -> AppConfig {
        self.inner.read().expect("config poisoned").clone()
    }

    pub fn job(&self, job_id: &str) -> Option<JobConfig> {
        self.inner
            .read()
            .expect("config poisoned")
            .jobs
            .get(job_id)
            .cloned()
    }
}
