//! Per-ticker extraction of cached flat files.
//!
//! Layout under the output root:
//! - `{class}/{ticker}/{date}.parquet`        rows of one ticker for one day
//! - `{class}/{ticker}/{date}.parquet.empty`  configured ticker had no rows that day
//! - `{class}/{date}.parquet.empty`           the day itself has no flat file
//!
//! Existing partitions are never rewritten, so extraction can be re-run after
//! a partial failure and only the missing partitions are produced.

use crate::asset::AssetClass;
use crate::config::SyncConfig;
use crate::data::cache::{self, CacheError, FlatFileCache, SlotState};
use crate::sync::UnitFailure;
use crate::unit::{self, WorkUnit};
use chrono::NaiveDate;
use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const TICKER_COLUMN: &str = "ticker";
/// Unix nanoseconds, UTC.
pub const SOURCE_TIME_COLUMN: &str = "window_start";
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const TARGET_TIME_ZONE: &str = "America/New_York";
pub const PARTITION_EXTENSION: &str = "parquet";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("flat file is missing column '{0}'")]
    MissingColumn(&'static str),

    #[error("polars error: {0}")]
    Polars(String),

    #[error("extract I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Identifies one output partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PartitionKey {
    pub asset_class: AssetClass,
    pub ticker: String,
    pub date: NaiveDate,
}

/// Totals for an extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractReport {
    /// Days read from a Present cache slot.
    pub days: usize,
    /// Days with no remote data.
    pub absent_days: usize,
    /// Days not in the cache yet.
    pub uncached_days: usize,
    pub partitions_written: usize,
    pub failures: Vec<UnitFailure>,
}

pub struct Extractor<'a> {
    cache: &'a FlatFileCache,
    output_dir: PathBuf,
    tickers: Option<Vec<String>>,
}

impl<'a> Extractor<'a> {
    pub fn new(cache: &'a FlatFileCache, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            output_dir: output_dir.into(),
            tickers: None,
        }
    }

    /// Only extract these symbols (already upper-cased), using each asset
    /// class's ticker matching rule.
    pub fn with_tickers(mut self, tickers: Option<Vec<String>>) -> Self {
        self.tickers = tickers;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `{output}/{class}/{ticker}/{date}.parquet`
    pub fn partition_path(&self, key: &PartitionKey) -> PathBuf {
        self.output_dir
            .join(key.asset_class.name())
            .join(&key.ticker)
            .join(format!(
                "{}.{PARTITION_EXTENSION}",
                key.date.format("%Y-%m-%d")
            ))
    }

    /// `{output}/{class}/{date}.parquet.empty`
    pub fn day_marker_path(&self, class: AssetClass, date: NaiveDate) -> PathBuf {
        self.output_dir.join(class.name()).join(format!(
            "{}.{PARTITION_EXTENSION}{}",
            date.format("%Y-%m-%d"),
            cache::EMPTY_SUFFIX
        ))
    }

    fn ticker_marker_path(&self, key: &PartitionKey) -> PathBuf {
        cache::with_suffix(&self.partition_path(key), cache::EMPTY_SUFFIX)
    }

    /// Configured symbols that can name an instrument of `class`.
    fn symbols_for(&self, class: AssetClass) -> impl Iterator<Item = &String> + '_ {
        self.tickers
            .iter()
            .flatten()
            .filter(move |symbol| class.accepts_symbol(symbol))
    }

    fn is_done(&self, key: &PartitionKey) -> bool {
        self.partition_path(key).exists() || self.ticker_marker_path(key).exists()
    }

    /// Split one cached day into per-ticker partitions.
    ///
    /// Returns the partitions written by this call. A ConfirmedAbsent day
    /// gets a day marker and yields nothing; an Unchecked day is an error.
    pub fn extract(
        &self,
        class: AssetClass,
        date: NaiveDate,
    ) -> Result<BTreeSet<PartitionKey>, ExtractError> {
        let unit = WorkUnit::new(class, date);
        let mut written = BTreeSet::new();

        match self.cache.probe(&unit)? {
            SlotState::Unchecked => return Err(CacheError::NotFound { unit }.into()),
            SlotState::ConfirmedAbsent => {
                let marker = self.day_marker_path(class, date);
                if !marker.exists() {
                    write_marker(&marker)?;
                    debug!(%unit, "wrote day marker");
                }
                return Ok(written);
            }
            SlotState::Present(_) => {}
        }

        // The day was absent when last extracted and has been published since.
        let stale = self.day_marker_path(class, date);
        if stale.exists() {
            fs::remove_file(&stale).map_err(|source| ExtractError::Io {
                path: stale.clone(),
                source,
            })?;
            debug!(%unit, "removed stale day marker");
        }

        // With a fixed ticker list we can tell up front whether anything is left to do.
        if self.tickers.is_some() {
            let pending = self
                .symbols_for(class)
                .any(|t| !self.is_done(&partition_key(class, t, date)));
            if !pending {
                debug!(%unit, "all partitions present");
                return Ok(written);
            }
        }

        let bytes = self.cache.read_present(&unit)?;
        let df = prepare(read_flat_file(bytes)?)?;
        let groups = self.group_rows(class, &df)?;

        for (ticker, rows) in &groups {
            let key = partition_key(class, ticker, date);
            if self.is_done(&key) {
                continue;
            }
            let idx = IdxCa::from_vec(PlSmallStr::EMPTY, rows.clone());
            let mut part = df
                .take(&idx)
                .map_err(|e| ExtractError::Polars(format!("select rows for {ticker}: {e}")))?;
            let path = self.partition_path(&key);
            write_parquet(&mut part, &path)?;
            debug!(%unit, ticker = %ticker, rows = rows.len(), "wrote partition");
            written.insert(key);
        }

        if self.tickers.is_some() {
            for symbol in self.symbols_for(class).filter(|s| !groups.contains_key(*s)) {
                let key = partition_key(class, symbol, date);
                if !self.is_done(&key) {
                    write_marker(&self.ticker_marker_path(&key))?;
                    debug!(%unit, ticker = %symbol, "no rows for ticker, wrote marker");
                }
            }
        }

        Ok(written)
    }

    /// Row indices per partition name.
    fn group_rows(
        &self,
        class: AssetClass,
        df: &DataFrame,
    ) -> Result<BTreeMap<String, Vec<IdxSize>>, ExtractError> {
        let column = df
            .column(TICKER_COLUMN)
            .and_then(|c| c.cast(&DataType::String))
            .map_err(|_| ExtractError::MissingColumn(TICKER_COLUMN))?;
        let tickers = column
            .str()
            .map_err(|e| ExtractError::Polars(format!("ticker column type: {e}")))?;

        let mut groups: BTreeMap<String, Vec<IdxSize>> = BTreeMap::new();
        for (row, raw) in tickers.into_iter().enumerate() {
            let Some(raw) = raw else { continue };
            match &self.tickers {
                Some(symbols) => {
                    for symbol in symbols.iter().filter(|s| class.ticker_matches(raw, s)) {
                        groups.entry(symbol.clone()).or_default().push(row as IdxSize);
                    }
                }
                None => groups
                    .entry(class.partition_name(raw))
                    .or_default()
                    .push(row as IdxSize),
            }
        }
        Ok(groups)
    }

    /// Extract every day of `config`. Days are independent; a failed day is
    /// recorded and the pass continues.
    pub fn extract_range(&self, config: &SyncConfig) -> ExtractReport {
        let units: Vec<WorkUnit> = unit::units(&config.classes(), config.start, config.end).collect();

        let run = |unit: &WorkUnit| -> (WorkUnit, Result<Option<usize>, ExtractError>) {
            let result = match self.cache.probe(unit) {
                Ok(SlotState::Unchecked) => Ok(None),
                Ok(_) => self.extract(unit.asset_class, unit.date).map(|w| Some(w.len())),
                Err(e) => Err(e.into()),
            };
            (*unit, result)
        };

        let results: Vec<_> = if config.jobs > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(config.jobs).build() {
                Ok(pool) => pool.install(|| units.par_iter().map(run).collect()),
                Err(e) => {
                    warn!(error = %e, "failed to build worker pool, extracting sequentially");
                    units.iter().map(run).collect()
                }
            }
        } else {
            units.iter().map(run).collect()
        };

        let mut report = ExtractReport::default();
        for (unit, result) in results {
            match result {
                Ok(None) => report.uncached_days += 1,
                Ok(Some(count)) => {
                    if self.day_marker_path(unit.asset_class, unit.date).exists() {
                        report.absent_days += 1;
                    } else {
                        report.days += 1;
                    }
                    report.partitions_written += count;
                }
                Err(e) => {
                    warn!(%unit, error = %e, "extraction failed");
                    report.failures.push(UnitFailure {
                        unit,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            days = report.days,
            absent_days = report.absent_days,
            uncached_days = report.uncached_days,
            partitions = report.partitions_written,
            failed = report.failures.len(),
            "extraction summary"
        );
        report
    }
}

fn partition_key(class: AssetClass, ticker: &str, date: NaiveDate) -> PartitionKey {
    PartitionKey {
        asset_class: class,
        ticker: ticker.to_string(),
        date,
    }
}

// ── Tabular I/O helpers ─────────────────────────────────────────────

/// Column types of the minute-aggregate files, applied to whichever of them
/// a file has so every partition of a column carries the same type.
const COLUMN_TYPES: [(&str, DataType); 6] = [
    ("volume", DataType::Float64),
    ("open", DataType::Float64),
    ("close", DataType::Float64),
    ("high", DataType::Float64),
    ("low", DataType::Float64),
    ("transactions", DataType::Int64),
];

/// Parse gzip-compressed CSV bytes.
fn read_flat_file(bytes: Vec<u8>) -> Result<DataFrame, ExtractError> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .map_err(|e| ExtractError::Polars(format!("read flat file: {e}")))
}

/// Replace `window_start` with a zoned `timestamp` column, put it first and
/// sort rows by it. Known numeric columns get their fixed type; values pass
/// through unchanged.
fn prepare(df: DataFrame) -> Result<DataFrame, ExtractError> {
    let map_err = |e: PolarsError| ExtractError::Polars(format!("timestamp conversion: {e}"));

    let timestamp = df
        .column(SOURCE_TIME_COLUMN)
        .map_err(|_| ExtractError::MissingColumn(SOURCE_TIME_COLUMN))?
        .cast(&DataType::Int64)
        .and_then(|c| {
            c.cast(&DataType::Datetime(
                TimeUnit::Nanoseconds,
                Some(TARGET_TIME_ZONE.into()),
            ))
        })
        .map_err(map_err)?
        .with_name(TIMESTAMP_COLUMN.into());

    let mut df = df.drop(SOURCE_TIME_COLUMN).map_err(map_err)?;
    df.with_column(timestamp).map_err(map_err)?;

    for (name, dtype) in COLUMN_TYPES.iter() {
        let Ok(column) = df.column(name) else { continue };
        if column.dtype() != dtype {
            let cast = column
                .cast(dtype)
                .map_err(|e| ExtractError::Polars(format!("column {name}: {e}")))?;
            df.with_column(cast)
                .map_err(|e| ExtractError::Polars(format!("column {name}: {e}")))?;
        }
    }

    let mut order = vec![TIMESTAMP_COLUMN.to_string()];
    order.extend(
        df.get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .filter(|name| name != TIMESTAMP_COLUMN),
    );

    df.select(order)
        .and_then(|df| {
            df.sort(
                vec![TIMESTAMP_COLUMN],
                SortMultipleOptions::default().with_maintain_order(true),
            )
        })
        .map_err(map_err)
}

/// Write a DataFrame to Parquet through a temp file and rename.
fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), ExtractError> {
    cache::create_parent(path)?;
    let tmp = cache::with_suffix(path, ".tmp");

    let file = fs::File::create(&tmp).map_err(|source| ExtractError::Io {
        path: tmp.clone(),
        source,
    })?;
    if let Err(e) = ParquetWriter::new(file).finish(df) {
        let _ = fs::remove_file(&tmp);
        return Err(ExtractError::Polars(format!("write parquet: {e}")));
    }

    cache::commit(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ExtractError::from(e)
    })
}

fn write_marker(path: &Path) -> Result<(), ExtractError> {
    cache::create_parent(path)?;
    let tmp = cache::stage(path, &[])?;
    cache::commit(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two tickers, rows deliberately out of time order.
    const CSV: &str = "ticker,volume,open,close,high,low,window_start,transactions\n\
        SPY,200,101.0,101.5,102.0,100.5,1735828260000000000,12\n\
        AAPL,50,250.0,250.5,251.0,249.5,1735828200000000000,3\n\
        SPY,100,100.0,101.0,101.2,99.8,1735828200000000000,9\n";

    fn prepared() -> DataFrame {
        prepare(read_flat_file(CSV.as_bytes().to_vec()).unwrap()).unwrap()
    }

    #[test]
    fn timestamp_is_first_zoned_and_sorted() {
        let df = prepared();
        let names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|n| n.to_string())
            .collect();

        assert_eq!(names[0], TIMESTAMP_COLUMN);
        assert!(!names.iter().any(|n| n == SOURCE_TIME_COLUMN));
        assert!(names.iter().any(|n| n == "transactions"));

        let ts = df.column(TIMESTAMP_COLUMN).unwrap();
        assert_eq!(
            ts.dtype(),
            &DataType::Datetime(TimeUnit::Nanoseconds, Some(TARGET_TIME_ZONE.into()))
        );

        let raw: Vec<Option<i64>> = ts
            .cast(&DataType::Int64)
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(
            raw,
            vec![
                Some(1735828200000000000),
                Some(1735828200000000000),
                Some(1735828260000000000)
            ]
        );
    }

    #[test]
    fn missing_time_column_is_reported() {
        let df = read_flat_file(b"ticker,open\nSPY,1.0\n".to_vec()).unwrap();
        assert!(matches!(
            prepare(df),
            Err(ExtractError::MissingColumn(SOURCE_TIME_COLUMN))
        ));
    }

    #[test]
    fn rows_grouped_by_partition_name() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FlatFileCache::new(dir.path().join("files"));
        let df = prepared();

        let all = Extractor::new(&cache, dir.path().join("prices"));
        let groups = all.group_rows(AssetClass::Stocks, &df).unwrap();
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["AAPL", "SPY"]);
        assert_eq!(groups["SPY"].len(), 2);

        let filtered = Extractor::new(&cache, dir.path().join("prices"))
            .with_tickers(Some(vec!["SPY".into(), "QQQ".into()]));
        let groups = filtered.group_rows(AssetClass::Stocks, &df).unwrap();
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["SPY"]);
    }

    #[test]
    fn partition_paths() {
        let cache = FlatFileCache::new("files");
        let extractor = Extractor::new(&cache, "prices");
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();

        assert_eq!(
            extractor.partition_path(&partition_key(AssetClass::Crypto, "BTC-USD", date)),
            PathBuf::from("prices/crypto/BTC-USD/2025-01-02.parquet")
        );
        assert_eq!(
            extractor.day_marker_path(AssetClass::Crypto, date),
            PathBuf::from("prices/crypto/2025-01-02.parquet.empty")
        );
    }
}
