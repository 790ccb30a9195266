//! Local flat-file cache.
//!
//! Layout per slot, under `{root}/{asset_class}/`:
//! - `{date}.csv.gz`       raw bytes exactly as served by the remote
//! - `{date}.meta.json`    sidecar: content identifier, length, blake3 hash
//! - `{date}.csv.gz.empty` zero-byte marker: checked, remote has no file
//!
//! The sidecar is the commit record of a Present slot. Every file is written
//! to `.tmp` and renamed into place. A replacement renames the data over the
//! old bytes, then the sidecar over the old sidecar, and drops an absent
//! marker last. Until the sidecar lands the old record still describes the
//! slot, so the old bytes stay readable if the data rename fails. If only the
//! sidecar rename fails, the new bytes no longer match the old hash:
//! `read_present` reports Corrupt and the next sweep sees a changed remote
//! identifier and refreshes the slot.

use crate::asset::AssetClass;
use crate::unit::{self, WorkUnit};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const RAW_EXTENSION: &str = "csv.gz";
pub const EMPTY_SUFFIX: &str = ".empty";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cached file for {unit}")]
    NotFound { unit: WorkUnit },

    #[error("corrupt cache entry {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("cache I/O on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("cache metadata: {0}")]
    Metadata(String),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What the cache knows about one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// Never checked.
    Unchecked,
    /// Checked; the remote had no file for this day.
    ConfirmedAbsent,
    /// Raw bytes cached with this content identifier.
    Present(String),
}

/// Metadata sidecar for a Present slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub asset_class: AssetClass,
    pub date: NaiveDate,
    pub content_id: String,
    pub byte_len: u64,
    pub data_hash: String,
    pub cached_at: chrono::NaiveDateTime,
}

pub struct FlatFileCache {
    root: PathBuf,
}

impl FlatFileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn class_dir(&self, class: AssetClass) -> PathBuf {
        self.root.join(class.name())
    }

    /// `{root}/{class}/{date}.csv.gz`
    pub fn data_path(&self, unit: &WorkUnit) -> PathBuf {
        self.class_dir(unit.asset_class)
            .join(format!("{}.{RAW_EXTENSION}", unit.date.format("%Y-%m-%d")))
    }

    /// `{root}/{class}/{date}.csv.gz.empty`
    pub fn marker_path(&self, unit: &WorkUnit) -> PathBuf {
        with_suffix(&self.data_path(unit), EMPTY_SUFFIX)
    }

    fn meta_path(&self, unit: &WorkUnit) -> PathBuf {
        self.class_dir(unit.asset_class)
            .join(format!("{}.meta.json", unit.date.format("%Y-%m-%d")))
    }

    /// Read the sidecar. A sidecar that cannot be parsed, or whose data file
    /// is gone, is quarantined and the slot reads as Unchecked.
    pub fn meta(&self, unit: &WorkUnit) -> Result<Option<CacheMeta>, CacheError> {
        let meta_path = self.meta_path(unit);
        let content = match fs::read_to_string(&meta_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&meta_path)(e)),
        };

        let meta = match serde_json::from_str::<CacheMeta>(&content) {
            Ok(meta) => meta,
            Err(e) => {
                quarantine(&meta_path, &format!("unreadable sidecar: {e}"));
                return Ok(None);
            }
        };

        if !self.data_path(unit).exists() {
            quarantine(&meta_path, "data file missing");
            return Ok(None);
        }

        Ok(Some(meta))
    }

    /// Current state of a slot.
    pub fn probe(&self, unit: &WorkUnit) -> Result<SlotState, CacheError> {
        if self.marker_path(unit).exists() {
            return Ok(SlotState::ConfirmedAbsent);
        }
        Ok(match self.meta(unit)? {
            Some(meta) => SlotState::Present(meta.content_id),
            None => SlotState::Unchecked,
        })
    }

    /// Record that the remote has no file for this slot, replacing any cached bytes.
    pub fn write_absent(&self, unit: &WorkUnit) -> Result<(), CacheError> {
        let marker = self.marker_path(unit);
        create_parent(&marker)?;
        let tmp = stage(&marker, &[])?;

        let result = remove_if_exists(&self.meta_path(unit))
            .and_then(|()| remove_if_exists(&self.data_path(unit)))
            .and_then(|()| commit(&tmp, &marker));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        debug!(%unit, path = %marker.display(), "wrote empty marker");
        Ok(())
    }

    /// Store raw bytes for a slot, replacing any prior entry.
    pub fn write_present(
        &self,
        unit: &WorkUnit,
        bytes: &[u8],
        content_id: &str,
    ) -> Result<CacheMeta, CacheError> {
        let data_path = self.data_path(unit);
        let meta_path = self.meta_path(unit);
        create_parent(&data_path)?;

        let meta = CacheMeta {
            asset_class: unit.asset_class,
            date: unit.date,
            content_id: content_id.to_string(),
            byte_len: bytes.len() as u64,
            data_hash: blake3::hash(bytes).to_hex().to_string(),
            cached_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| CacheError::Metadata(format!("serialize sidecar: {e}")))?;

        // Stage both files first; running out of disk here leaves the slot untouched.
        let data_tmp = stage(&data_path, bytes)?;
        let meta_tmp = match stage(&meta_path, &meta_json) {
            Ok(tmp) => tmp,
            Err(e) => {
                let _ = fs::remove_file(&data_tmp);
                return Err(e);
            }
        };

        let result = self.install_present(unit, &data_tmp, &meta_tmp);
        if result.is_err() {
            let _ = fs::remove_file(&data_tmp);
            let _ = fs::remove_file(&meta_tmp);
        }
        result?;

        debug!(%unit, bytes = bytes.len(), content_id, "cached flat file");
        Ok(meta)
    }

    /// Move staged data and sidecar into place. The marker goes last so an
    /// interrupted Absent to Present switch still reads ConfirmedAbsent.
    fn install_present(
        &self,
        unit: &WorkUnit,
        data_tmp: &Path,
        meta_tmp: &Path,
    ) -> Result<(), CacheError> {
        commit(data_tmp, &self.data_path(unit))?;
        commit(meta_tmp, &self.meta_path(unit))?;
        remove_if_exists(&self.marker_path(unit))
    }

    /// Bytes of a Present slot, verified against the sidecar.
    pub fn read_present(&self, unit: &WorkUnit) -> Result<Vec<u8>, CacheError> {
        if self.marker_path(unit).exists() {
            return Err(CacheError::NotFound { unit: *unit });
        }
        let meta = self
            .meta(unit)?
            .ok_or(CacheError::NotFound { unit: *unit })?;

        let data_path = self.data_path(unit);
        let bytes = match fs::read(&data_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound { unit: *unit })
            }
            Err(e) => return Err(io_err(&data_path)(e)),
        };

        if bytes.len() as u64 != meta.byte_len {
            return Err(CacheError::Corrupt {
                path: data_path,
                reason: format!("expected {} bytes, found {}", meta.byte_len, bytes.len()),
            });
        }
        if blake3::hash(&bytes).to_hex().as_str() != meta.data_hash {
            return Err(CacheError::Corrupt {
                path: data_path,
                reason: "content hash mismatch".into(),
            });
        }

        Ok(bytes)
    }

    /// Tally slot states per asset class over `[start, end)`.
    pub fn status(
        &self,
        classes: &[AssetClass],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CacheStatus>, CacheError> {
        classes
            .iter()
            .map(|&class| {
                let mut status = CacheStatus::new(class);
                for date in unit::days(start, end) {
                    let unit = WorkUnit::new(class, date);
                    if self.marker_path(&unit).exists() {
                        status.absent += 1;
                        continue;
                    }
                    match self.meta(&unit)? {
                        Some(meta) => {
                            status.present += 1;
                            status.bytes += meta.byte_len;
                        }
                        None => status.unchecked += 1,
                    }
                }
                Ok(status)
            })
            .collect()
    }
}

/// Slot counts for one asset class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub asset_class: AssetClass,
    pub unchecked: usize,
    pub absent: usize,
    pub present: usize,
    pub bytes: u64,
}

impl CacheStatus {
    fn new(asset_class: AssetClass) -> Self {
        Self {
            asset_class,
            unchecked: 0,
            absent: 0,
            present: 0,
            bytes: 0,
        }
    }
}

// ── File helpers ────────────────────────────────────────────────────

pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

pub(crate) fn create_parent(path: &Path) -> Result<(), CacheError> {
    match path.parent() {
        Some(dir) => fs::create_dir_all(dir).map_err(io_err(dir)),
        None => Ok(()),
    }
}

/// Write `bytes` to `{path}.tmp` and flush it to disk.
pub(crate) fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf, CacheError> {
    let tmp = with_suffix(path, ".tmp");
    let write = || -> io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_err(&tmp)(e)
    })?;
    Ok(tmp)
}

/// Atomically move a staged file into place.
pub(crate) fn commit(tmp: &Path, path: &Path) -> Result<(), CacheError> {
    fs::rename(tmp, path).map_err(io_err(path))
}

fn remove_if_exists(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path)(e)),
    }
}

fn quarantine(path: &Path, reason: &str) {
    let target = with_suffix(path, ".quarantined");
    warn!(path = %path.display(), reason, "quarantining cache sidecar");
    let _ = fs::rename(path, target);
}
