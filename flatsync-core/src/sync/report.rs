//! Run summary.

use serde::Serialize;
use std::fmt;

use crate::unit::WorkUnit;

use super::execute::Outcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub unit: WorkUnit,
    pub reason: String,
}

/// Counts for one sweep. Built fresh for every run, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub downloaded: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failures: Vec<UnitFailure>,
}

impl SyncReport {
    pub fn record(&mut self, unit: WorkUnit, outcome: &Outcome) {
        match outcome {
            Outcome::Downloaded(_) => self.downloaded += 1,
            Outcome::Updated(_) => self.updated += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Failed(reason) => self.failures.push(UnitFailure {
                unit,
                reason: reason.clone(),
            }),
        }
    }

    pub fn merge(&mut self, other: SyncReport) {
        self.downloaded += other.downloaded;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn total(&self) -> usize {
        self.downloaded + self.updated + self.skipped + self.failed()
    }

    /// No unit failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "downloaded={} updated={} skipped={} failed={}",
            self.downloaded,
            self.updated,
            self.skipped,
            self.failed()
        )
    }
}
