use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};

pub const DEFAULT_START_INTERVAL_MS: u64 = 1_000; // delay before the first tick
pub const DEFAULT_EXECUTE_INTERVAL_MS: u64 = 5_000; // steady-state tick cadence
// Units run on the blocking pool and may sit on I/O, so the default pool is
// never narrower than this, whatever the core count.
pub const MIN_DEFAULT_PARALLELISM: usize = 8;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// What the timer does when a tick comes due while an earlier one is still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Start the new tick anyway; ticks may run concurrently.
    #[default]
    Allow,
    /// Drop the new tick.
    Skip,
    /// Run ticks strictly one after another, delaying late ones.
    Queue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Delay between `start()` and the first tick.
    #[serde(default = "default_start_interval_ms")]
    pub start_interval_ms: u64,
    /// Interval between ticks once the timer is running.
    #[serde(default = "default_execute_interval_ms")]
    pub execute_interval_ms: u64,
    #[serde(default)]
    pub overlap: OverlapPolicy,
    /// Upper bound on job units executing at once, across all ticks.
    /// Defaults to the available parallelism, but at least
    /// `MIN_DEFAULT_PARALLELISM`.
    #[serde(default)]
    pub max_parallel_jobs: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            start_interval_ms: DEFAULT_START_INTERVAL_MS,
            execute_interval_ms: DEFAULT_EXECUTE_INTERVAL_MS,
            overlap: OverlapPolicy::default(),
            max_parallel_jobs: None,
        }
    }
}

impl SchedulerConfig {
    pub fn start_interval(&self) -> Duration {
        Duration::from_millis(self.start_interval_ms)
    }

    pub fn execute_interval(&self) -> Duration {
        Duration::from_millis(self.execute_interval_ms)
    }

    pub fn parallelism(&self) -> usize {
        self.max_parallel_jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .max(MIN_DEFAULT_PARALLELISM)
        })
    }

    /// Reject values the timer cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.execute_interval_ms == 0 {
            return Err(CoreError::Config(
                "scheduler.execute_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_parallel_jobs == Some(0) {
            return Err(CoreError::Config(
                "scheduler.max_parallel_jobs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whole milliseconds for `duration`, rounded up and saturating at `u64::MAX`.
pub fn millis_ceil(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

fn default_start_interval_ms() -> u64 {
    DEFAULT_START_INTERVAL_MS
}
fn default_execute_interval_ms() -> u64 {
    DEFAULT_EXECUTE_INTERVAL_MS
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. CADENCE_CONFIG env var
    ///   3. ~/.cadence/cadence.toml
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CADENCE_CONFIG").ok())
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading configuration");

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                // Double underscore so keys like execute_interval_ms survive.
                .merge(Env::prefixed("CADENCE_").ignore(&["CONFIG"]).split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: CadenceConfig = figment
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        config.scheduler.validate()?;
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_intervals() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.start_interval(), Duration::from_secs(1));
        assert_eq!(cfg.execute_interval(), Duration::from_secs(5));
        assert_eq!(cfg.overlap, OverlapPolicy::Allow);
        assert!(cfg.parallelism() >= MIN_DEFAULT_PARALLELISM);
    }

    #[test]
    fn default_parallelism_ignores_small_core_counts() {
        let cfg = SchedulerConfig::default();
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert_eq!(cfg.parallelism(), cores.max(MIN_DEFAULT_PARALLELISM));
    }

    #[test]
    fn millis_round_up_and_saturate() {
        assert_eq!(millis_ceil(Duration::ZERO), 0);
        assert_eq!(millis_ceil(Duration::from_micros(500)), 1);
        assert_eq!(millis_ceil(Duration::from_micros(1_500)), 2);
        assert_eq!(millis_ceil(Duration::from_secs(3)), 3_000);
        assert_eq!(millis_ceil(Duration::MAX), u64::MAX);
    }

    #[test]
    fn toml_overrides_scheduler_section() {
        let toml = r#"
            [scheduler]
            start_interval_ms = 10
            execute_interval_ms = 250
            overlap = "skip"
            max_parallel_jobs = 2
        "#;
        let cfg = CadenceConfig::from_figment(Figment::new().merge(Toml::string(toml))).unwrap();
        assert_eq!(cfg.scheduler.start_interval(), Duration::from_millis(10));
        assert_eq!(cfg.scheduler.execute_interval(), Duration::from_millis(250));
        assert_eq!(cfg.scheduler.overlap, OverlapPolicy::Skip);
        assert_eq!(cfg.scheduler.parallelism(), 2);
    }

    #[test]
    fn empty_source_yields_defaults() {
        let cfg = CadenceConfig::from_figment(Figment::new()).unwrap();
        assert_eq!(cfg.scheduler.execute_interval_ms, DEFAULT_EXECUTE_INTERVAL_MS);
        assert!(cfg.scheduler.max_parallel_jobs.is_none());
    }

    #[test]
    fn zero_execute_interval_is_rejected() {
        let toml = "[scheduler]\nexecute_interval_ms = 0\n";
        let err = CadenceConfig::from_figment(Figment::new().merge(Toml::string(toml)))
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let cfg = SchedulerConfig {
            max_parallel_jobs: Some(0),
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
