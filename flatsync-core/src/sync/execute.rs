//! Sync execution: carry out one unit's planned action.
//!
//! Everything a unit does touches only its own cache slot. Errors are turned
//! into `Outcome::Failed` here, so nothing raised inside a unit reaches the
//! sweep. A failed unit leaves its slot as it was: the remote GET happens
//! before any write, and cache writes are staged then renamed.

use std::fmt;

use tracing::{debug, warn};

use crate::data::cache::FlatFileCache;
use crate::data::remote::RemoteStore;
use crate::unit::WorkUnit;

use super::plan::{Action, SkipReason};
use super::UnitError;

/// What ended up in the slot after a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stored {
    Present,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// First check of the unit; bytes or an absent marker were stored.
    Downloaded(Stored),
    /// A known entry was replaced.
    Updated(Stored),
    Skipped(SkipReason),
    Failed(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Downloaded(Stored::Present) => f.write_str("downloaded"),
            Outcome::Downloaded(Stored::Absent) => f.write_str("downloaded (no data)"),
            Outcome::Updated(Stored::Present) => f.write_str("updated"),
            Outcome::Updated(Stored::Absent) => f.write_str("updated (removed upstream)"),
            Outcome::Skipped(SkipReason::ConfirmedAbsent) => f.write_str("skipped (no data)"),
            Outcome::Skipped(SkipReason::UpToDate) => f.write_str("skipped"),
            Outcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

pub struct Executor<'a> {
    cache: &'a FlatFileCache,
    remote: &'a dyn RemoteStore,
}

impl<'a> Executor<'a> {
    pub fn new(cache: &'a FlatFileCache, remote: &'a dyn RemoteStore) -> Self {
        Self { cache, remote }
    }

    pub fn execute(&self, unit: &WorkUnit, action: &Action) -> Outcome {
        match self.try_execute(unit, action) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%unit, %action, error = %e, "unit failed");
                Outcome::Failed(e.to_string())
            }
        }
    }

    fn try_execute(&self, unit: &WorkUnit, action: &Action) -> Result<Outcome, UnitError> {
        match action {
            Action::Skip(reason) => Ok(Outcome::Skipped(*reason)),
            Action::Fetch => Ok(Outcome::Downloaded(self.fetch(unit)?)),
            Action::Refresh => Ok(Outcome::Updated(self.fetch(unit)?)),
        }
    }

    /// GET the object and store it, or an absent marker if there is none.
    ///
    /// The stored identifier is the one served with the bytes, so a change
    /// between planning and download is picked up by the next pass.
    fn fetch(&self, unit: &WorkUnit) -> Result<Stored, UnitError> {
        match self.remote.get(unit.asset_class, unit.date)? {
            Some(object) => {
                self.cache
                    .write_present(unit, &object.bytes, &object.content_id)?;
                debug!(%unit, bytes = object.bytes.len(), "stored flat file");
                Ok(Stored::Present)
            }
            None => {
                self.cache.write_absent(unit)?;
                debug!(%unit, "remote has no file, stored absent marker");
                Ok(Stored::Absent)
            }
        }
    }
}
