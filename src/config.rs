use chrono::NaiveDate;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub snapshots: SnapshotSettings,
    #[serde(default)]
    pub points: PointsSettings,
    #[serde(default)]
    pub leveling: LevelingSettings,
    /// Academic term calendar, used for TERM period bucketing
    #[serde(default)]
    pub terms: Vec<TermSettings>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// HTTP port for the read-only query API and health probes (default: 8080)
    #[serde(default)]
    pub http_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Seconds between poll cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Maximum completions discovered and claimed per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Concurrent unit processors
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts before a unit is moved to DEAD
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Base delay for exponential backoff
    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,
    /// Maximum backoff delay
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    /// Per-unit pipeline timeout
    #[serde(default = "default_unit_timeout")]
    pub unit_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_batch_size() -> i64 {
    50
}

fn default_concurrency() -> usize {
    8
}

fn default_max_attempts() -> i32 {
    5
}

fn default_base_backoff() -> u64 {
    2
}

fn default_max_backoff() -> u64 {
    3600
}

fn default_unit_timeout() -> u64 {
    30
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
            unit_timeout_secs: default_unit_timeout(),
        }
    }
}

/// Snapshot generation cadence, one interval per granularity.
///
/// Each granularity runs as its own scheduled task and fails independently.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSettings {
    #[serde(default = "default_day_interval")]
    pub day_interval_secs: u64,
    #[serde(default = "default_week_interval")]
    pub week_interval_secs: u64,
    #[serde(default = "default_month_interval")]
    pub month_interval_secs: u64,
    #[serde(default = "default_term_interval")]
    pub term_interval_secs: u64,
    #[serde(default = "default_all_time_interval")]
    pub all_time_interval_secs: u64,
    /// Timeout for one generation cycle; a timed-out cycle is skipped
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,
}

fn default_day_interval() -> u64 {
    86_400
}

fn default_week_interval() -> u64 {
    604_800
}

fn default_month_interval() -> u64 {
    86_400
}

fn default_term_interval() -> u64 {
    86_400
}

fn default_all_time_interval() -> u64 {
    86_400
}

fn default_cycle_timeout() -> u64 {
    300
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            day_interval_secs: default_day_interval(),
            week_interval_secs: default_week_interval(),
            month_interval_secs: default_month_interval(),
            term_interval_secs: default_term_interval(),
            all_time_interval_secs: default_all_time_interval(),
            cycle_timeout_secs: default_cycle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointsSettings {
    /// Base point values keyed by activity type (e.g. QUIZ = 15)
    #[serde(default = "default_base_values")]
    pub base_values: HashMap<String, i64>,
    /// Awarded when an activity type has no mapping; a missing mapping
    /// must never block grading
    #[serde(default = "default_points")]
    pub default_points: i64,
}

fn default_base_values() -> HashMap<String, i64> {
    HashMap::from([
        ("QUIZ".to_string(), 15),
        ("EXERCISE".to_string(), 10),
        ("ASSESSMENT".to_string(), 25),
        ("PROJECT".to_string(), 40),
    ])
}

fn default_points() -> i64 {
    5
}

impl Default for PointsSettings {
    fn default() -> Self {
        Self {
            base_values: default_base_values(),
            default_points: default_points(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelingSettings {
    /// Base of the leveling curve: threshold(n) = base * (n-1)^exponent
    #[serde(default = "default_level_base")]
    pub base: f64,
    #[serde(default = "default_level_exponent")]
    pub exponent: f64,
}

fn default_level_base() -> f64 {
    100.0
}

fn default_level_exponent() -> f64 {
    1.5
}

impl Default for LevelingSettings {
    fn default() -> Self {
        Self {
            base: default_level_base(),
            exponent: default_level_exponent(),
        }
    }
}

/// One academic term, inclusive of both end dates
#[derive(Debug, Clone, Deserialize)]
pub struct TermSettings {
    /// Period key recorded on TERM aggregates (e.g. "2026-T1")
    pub key: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("REWARDS_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (REWARDS_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("REWARDS")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.worker.batch_size <= 0 {
            errors.push("worker.batch_size must be positive".to_string());
        }

        if self.worker.concurrency == 0 {
            errors.push("worker.concurrency must be at least 1".to_string());
        }

        if self.worker.max_attempts <= 0 {
            errors.push("worker.max_attempts must be positive".to_string());
        }

        if self.worker.base_backoff_secs > self.worker.max_backoff_secs {
            errors.push("worker.base_backoff_secs exceeds worker.max_backoff_secs".to_string());
        }

        if self.points.default_points < 0 {
            errors.push("points.default_points must be non-negative".to_string());
        }

        if let Some((ty, v)) = self.points.base_values.iter().find(|(_, v)| **v < 0) {
            errors.push(format!("points.base_values.{ty} is negative: {v}"));
        }

        if self.leveling.base <= 0.0 {
            errors.push("leveling.base must be positive".to_string());
        }

        if self.leveling.exponent < 1.0 {
            errors.push("leveling.exponent must be at least 1 for a monotonic curve".to_string());
        }

        for term in &self.terms {
            if term.starts_on > term.ends_on {
                errors.push(format!("term {} starts after it ends", term.key));
            }
        }

        // Overlapping terms would make the TERM period key ambiguous
        let mut sorted: Vec<&TermSettings> = self.terms.iter().collect();
        sorted.sort_by_key(|t| t.starts_on);
        for pair in sorted.windows(2) {
            if pair[0].ends_on >= pair[1].starts_on {
                errors.push(format!("terms {} and {} overlap", pair[0].key, pair[1].key));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                url: "postgres://localhost/rewards".to_string(),
                max_connections: 5,
            },
            worker: WorkerSettings::default(),
            snapshots: SnapshotSettings::default(),
            points: PointsSettings::default(),
            leveling: LevelingSettings::default(),
            terms: vec![],
            logging: LoggingConfig::default(),
            http_port: Some(8080),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_overlapping_terms_rejected() {
        let mut config = base_config();
        config.terms = vec![
            TermSettings {
                key: "2026-T1".to_string(),
                starts_on: NaiveDate::from_ymd_opt(2026, 1, 7).unwrap(),
                ends_on: NaiveDate::from_ymd_opt(2026, 4, 10).unwrap(),
            },
            TermSettings {
                key: "2026-T2".to_string(),
                starts_on: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
                ends_on: NaiveDate::from_ymd_opt(2026, 7, 3).unwrap(),
            },
        ];

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("overlap")));
    }

    #[test]
    fn test_backoff_bounds_checked() {
        let mut config = base_config();
        config.worker.base_backoff_secs = 7200;
        config.worker.max_backoff_secs = 3600;

        assert!(config.validate().is_err());
    }
}
