//! Run configuration.
//!
//! `SyncConfig` is the immutable value handed to the planner. `FileConfig` is
//! the TOML surface the CLI loads it from; CLI flags override file values.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::asset::AssetClass;

/// Configuration errors. Any of these aborts a run before a unit is attempted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("empty date range: start {start} must be before end {end} (end is exclusive)")]
    EmptyRange { start: NaiveDate, end: NaiveDate },

    #[error("no asset classes selected")]
    NoAssetClasses,

    #[error("unknown asset class '{0}' (expected stocks, options, crypto or forex)")]
    UnknownAssetClass(String),

    #[error("invalid date '{0}' (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("missing setting: {0}")]
    Missing(&'static str),

    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// What to synchronize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub asset_classes: Vec<AssetClass>,

    /// First day of the range (inclusive).
    pub start: NaiveDate,

    /// Day after the range (exclusive).
    pub end: NaiveDate,

    /// Restricts extraction to these symbols. `None` extracts every ticker.
    pub tickers: Option<Vec<String>>,

    /// Re-check confirmed-absent days against the remote.
    pub recheck_absent: bool,

    /// Worker threads for one asset class sweep. 1 runs inline.
    pub jobs: usize,
}

impl SyncConfig {
    pub fn new(asset_classes: Vec<AssetClass>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            asset_classes,
            start,
            end,
            tickers: None,
            recheck_absent: false,
            jobs: 1,
        }
    }

    pub fn with_tickers<I, S>(mut self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tickers: Vec<String> = tickers
            .into_iter()
            .map(|t| t.as_ref().trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        self.tickers = (!tickers.is_empty()).then_some(tickers);
        self
    }

    /// Fail fast on an unusable configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start >= self.end {
            return Err(ConfigError::EmptyRange {
                start: self.start,
                end: self.end,
            });
        }
        if self.asset_classes.is_empty() {
            return Err(ConfigError::NoAssetClasses);
        }
        for class in &self.asset_classes {
            if self.start < class.available_from() {
                tracing::warn!(
                    asset = %class,
                    available_from = %class.available_from(),
                    "start date predates remote availability, early days will resolve as absent"
                );
            }
        }
        Ok(())
    }

    /// Asset classes in a stable order with duplicates removed.
    pub fn classes(&self) -> Vec<AssetClass> {
        let mut classes = self.asset_classes.clone();
        classes.sort();
        classes.dedup();
        classes
    }

    /// Number of days in `[start, end)`.
    pub fn day_count(&self) -> usize {
        (self.end - self.start).num_days().max(0) as usize
    }
}

/// Retry policy for transient remote errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 600_000,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Remote object store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
    #[serde(skip_serializing)]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://files.massive.com".into(),
            bucket: "flatfiles".into(),
            region: "us-east-1".into(),
            timeout_secs: 600,
            retry: RetryConfig::default(),
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl RemoteConfig {
    /// Fill missing credentials from `MASSIVE_AWS_ACCESS_KEY_ID` / `MASSIVE_API_KEY`.
    pub fn with_env_credentials(mut self) -> Self {
        if self.access_key_id.is_none() {
            self.access_key_id = std::env::var("MASSIVE_AWS_ACCESS_KEY_ID").ok();
        }
        if self.secret_access_key.is_none() {
            self.secret_access_key = std::env::var("MASSIVE_API_KEY").ok();
        }
        self
    }
}

/// Asset selection as written in a config file: a list of names or a table of flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetSelection {
    List(Vec<String>),
    Flags(BTreeMap<String, bool>),
}

impl AssetSelection {
    pub fn resolve(&self) -> Result<Vec<AssetClass>, ConfigError> {
        let names: Vec<&str> = match self {
            AssetSelection::List(names) => names.iter().map(String::as_str).collect(),
            AssetSelection::Flags(flags) => flags
                .iter()
                .filter(|(_, enabled)| **enabled)
                .map(|(name, _)| name.as_str())
                .collect(),
        };
        names.into_iter().map(str::parse).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeSection {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data/files"),
            output_dir: PathBuf::from("data/prices"),
        }
    }
}

/// TOML config file.
///
/// ```toml
/// tickers = ["SPY", "BTC-USD"]
///
/// [assets]
/// stocks = true
/// crypto = true
///
/// [range]
/// start = "2025-01-01"
/// end = "2025-01-04"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub assets: Option<AssetSelection>,
    pub range: RangeSection,
    pub tickers: Option<Vec<String>>,
    pub paths: PathsSection,
    pub remote: RemoteConfig,
    pub jobs: Option<usize>,
    pub recheck_absent: bool,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Build the sync configuration. Does not validate; the engine does that.
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let start = parse_date(
            self.range
                .start
                .as_deref()
                .ok_or(ConfigError::Missing("range.start"))?,
        )?;
        let end = parse_date(
            self.range
                .end
                .as_deref()
                .ok_or(ConfigError::Missing("range.end"))?,
        )?;
        let classes = match &self.assets {
            Some(selection) => selection.resolve()?,
            None => AssetClass::ALL.to_vec(),
        };

        let mut config = SyncConfig::new(classes, start, end);
        if let Some(tickers) = &self.tickers {
            config = config.with_tickers(tickers);
        }
        config.recheck_absent = self.recheck_absent;
        config.jobs = self.jobs.unwrap_or(1).max(1);
        Ok(config)
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ConfigError::InvalidDate(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn validate_rejects_empty_range() {
        let config = SyncConfig::new(vec![AssetClass::Stocks], d(2025, 1, 4), d(2025, 1, 4));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyRange { .. })
        ));

        let inverted = SyncConfig::new(vec![AssetClass::Stocks], d(2025, 1, 5), d(2025, 1, 4));
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn validate_rejects_no_assets() {
        let config = SyncConfig::new(vec![], d(2025, 1, 1), d(2025, 1, 4));
        assert!(matches!(config.validate(), Err(ConfigError::NoAssetClasses)));
    }

    #[test]
    fn tickers_are_uppercased_and_blank_filtered() {
        let config = SyncConfig::new(vec![AssetClass::Crypto], d(2025, 1, 1), d(2025, 1, 2))
            .with_tickers(["btc-usd", " ", "eth-usd"]);
        assert_eq!(
            config.tickers,
            Some(vec!["BTC-USD".to_string(), "ETH-USD".to_string()])
        );

        let none = SyncConfig::new(vec![AssetClass::Crypto], d(2025, 1, 1), d(2025, 1, 2))
            .with_tickers(Vec::<String>::new());
        assert_eq!(none.tickers, None);
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(350));
        assert_eq!(retry.delay_for(30), Duration::from_millis(350));
    }

    #[test]
    fn file_config_with_flag_table() {
        let toml = r#"
            tickers = ["spy"]
            jobs = 4

            [assets]
            stocks = true
            options = false
            crypto = true

            [range]
            start = "2025-01-01"
            end = "2025-01-04"
        "#;
        let file = FileConfig::from_toml(toml).unwrap();
        let config = file.sync_config().unwrap();

        assert_eq!(config.asset_classes, vec![AssetClass::Crypto, AssetClass::Stocks]);
        assert_eq!(config.start, d(2025, 1, 1));
        assert_eq!(config.end, d(2025, 1, 4));
        assert_eq!(config.tickers, Some(vec!["SPY".to_string()]));
        assert_eq!(config.jobs, 4);
        assert_eq!(file.paths.cache_dir, PathBuf::from("data/files"));
        assert_eq!(file.remote.bucket, "flatfiles");
    }

    #[test]
    fn file_config_with_asset_list() {
        let toml = r#"
            assets = ["forex", "options"]

            [range]
            start = "2024-06-01"
            end = "2024-07-01"

            [remote.retry]
            max_retries = 7
        "#;
        let file = FileConfig::from_toml(toml).unwrap();
        let config = file.sync_config().unwrap();

        assert_eq!(config.asset_classes, vec![AssetClass::Forex, AssetClass::Options]);
        assert_eq!(config.day_count(), 30);
        assert_eq!(file.remote.retry.max_retries, 7);
        assert_eq!(file.remote.retry.base_delay_ms, 1_000);
    }

    #[test]
    fn file_config_unknown_asset() {
        let file = FileConfig::from_toml(
            "assets = [\"bonds\"]\n[range]\nstart = \"2025-01-01\"\nend = \"2025-01-02\"\n",
        )
        .unwrap();
        assert!(matches!(
            file.sync_config(),
            Err(ConfigError::UnknownAssetClass(name)) if name == "bonds"
        ));
    }

    #[test]
    fn file_config_missing_range() {
        let file = FileConfig::from_toml("assets = [\"stocks\"]").unwrap();
        assert!(matches!(
            file.sync_config(),
            Err(ConfigError::Missing("range.start"))
        ));
    }

    #[test]
    fn bad_date_is_reported() {
        assert!(matches!(
            parse_date("2025/01/01"),
            Err(ConfigError::InvalidDate(_))
        ));
    }
}
