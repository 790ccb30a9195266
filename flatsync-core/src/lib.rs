//! Flatsync Core: incremental download and extraction of daily market-data flat files.
//!
//! This crate contains:
//! - Asset classes and their remote layout
//! - Work units: one (asset class, calendar day) pair each
//! - A local cache whose slots are Unchecked, ConfirmedAbsent or Present
//! - The remote store contract, an S3 client and an in-memory store
//! - Sync planning and execution with a per-run report
//! - Per-ticker Parquet extraction of cached days

pub mod asset;
pub mod config;
pub mod data;
pub mod extract;
pub mod sync;
pub mod unit;

pub use asset::AssetClass;
pub use config::{ConfigError, FileConfig, SyncConfig};
pub use unit::WorkUnit;
