//! Asset class catalogue.
//!
//! Each asset class maps to one remote prefix holding one flat file per day,
//! and carries the rule used to match raw ticker values against a configured
//! symbol when extracting partitions.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// One family of flat files on the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stocks,
    Options,
    Crypto,
    Forex,
}

impl AssetClass {
    pub const ALL: [AssetClass; 4] = [
        AssetClass::Stocks,
        AssetClass::Options,
        AssetClass::Crypto,
        AssetClass::Forex,
    ];

    /// Lowercase name, used in paths and config files.
    pub fn name(self) -> &'static str {
        match self {
            AssetClass::Stocks => "stocks",
            AssetClass::Options => "options",
            AssetClass::Crypto => "crypto",
            AssetClass::Forex => "forex",
        }
    }

    /// Top-level prefix of this asset class in the flat-file bucket.
    pub fn remote_prefix(self) -> &'static str {
        match self {
            AssetClass::Stocks => "us_stocks_sip",
            AssetClass::Options => "us_options_opra",
            AssetClass::Crypto => "global_crypto",
            AssetClass::Forex => "global_forex",
        }
    }

    /// First day the remote store publishes files for this asset class.
    pub fn available_from(self) -> NaiveDate {
        let (y, m) = match self {
            AssetClass::Stocks => (2003, 10),
            AssetClass::Options => (2014, 6),
            AssetClass::Crypto => (2013, 11),
            AssetClass::Forex => (2009, 10),
        };
        NaiveDate::from_ymd_opt(y, m, 1).expect("catalogue dates are valid")
    }

    /// Object key of the minute-aggregate file for `date`:
    /// `{prefix}/minute_aggs_v1/{YYYY}/{MM}/{YYYY-MM-DD}.csv.gz`
    pub fn object_key(self, date: NaiveDate) -> String {
        format!(
            "{}/minute_aggs_v1/{:04}/{:02}/{}.csv.gz",
            self.remote_prefix(),
            date.year(),
            date.month(),
            date.format("%Y-%m-%d")
        )
    }

    /// Prefix the remote store puts in front of raw ticker values.
    fn ticker_prefix(self) -> &'static str {
        match self {
            AssetClass::Stocks => "",
            AssetClass::Options => "O:",
            AssetClass::Crypto => "X:",
            AssetClass::Forex => "C:",
        }
    }

    /// Does a raw ticker value belong to the configured `symbol`?
    ///
    /// Stocks match exactly, crypto and forex match their prefixed pair, and
    /// options match every contract on the underlying.
    pub fn ticker_matches(self, raw: &str, symbol: &str) -> bool {
        match self {
            AssetClass::Stocks => raw == symbol,
            AssetClass::Options => raw
                .strip_prefix(self.ticker_prefix())
                .is_some_and(|contract| contract.starts_with(symbol)),
            AssetClass::Crypto | AssetClass::Forex => raw
                .strip_prefix(self.ticker_prefix())
                .is_some_and(|pair| pair == symbol),
        }
    }

    /// Whether a configured symbol can name an instrument of this class.
    /// Crypto and forex symbols are `BASE-QUOTE` pairs; stock tickers and
    /// option underlyings are not.
    pub fn accepts_symbol(self, symbol: &str) -> bool {
        match self {
            AssetClass::Stocks | AssetClass::Options => !symbol.contains('-'),
            AssetClass::Crypto | AssetClass::Forex => symbol.contains('-'),
        }
    }

    /// Partition directory name for a raw ticker value when no ticker filter is set.
    pub fn partition_name(self, raw: &str) -> String {
        let bare = raw.strip_prefix(self.ticker_prefix()).unwrap_or(raw);
        bare.replace(['/', '\\'], "_")
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AssetClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stocks" | "stock" => Ok(AssetClass::Stocks),
            "options" | "option" => Ok(AssetClass::Options),
            "crypto" => Ok(AssetClass::Crypto),
            "forex" | "fx" => Ok(AssetClass::Forex),
            other => Err(ConfigError::UnknownAssetClass(other.to_string())),
        }
    }
}
