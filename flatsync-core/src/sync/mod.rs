//! Incremental synchronization of remote flat files into the local cache.
//!
//! A sweep plans and executes every (asset class, day) unit of a
//! `SyncConfig`. Units own independent cache slots, so a failure in one is
//! recorded and the sweep moves on; with `jobs > 1` the units of one asset
//! class run on a rayon pool and their outcomes are tallied after the join.

pub mod execute;
pub mod plan;
pub mod report;

pub use execute::{Executor, Outcome, Stored};
pub use plan::{decide, needs_remote_check, Action, PlannedUnit, Planner, RemoteView, SkipReason};
pub use report::{SyncReport, UnitFailure};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::asset::AssetClass;
use crate::config::{ConfigError, SyncConfig};
use crate::data::cache::{CacheError, FlatFileCache};
use crate::data::remote::{RemoteError, RemoteStore};
use crate::unit::{self, WorkUnit};

/// Anything that can fail inside one unit of work.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Progress callback for sweeps.
pub trait SyncProgress: Send + Sync {
    fn on_class_start(&self, class: AssetClass, days: usize);

    /// Called once per unit, possibly from worker threads.
    fn on_unit(&self, unit: &WorkUnit, outcome: &Outcome);

    fn on_class_complete(&self, class: AssetClass, report: &SyncReport);
}

/// Reports progress through `tracing`.
pub struct LogProgress;

impl SyncProgress for LogProgress {
    fn on_class_start(&self, class: AssetClass, days: usize) {
        info!(asset = %class, days, "retrieving {class} files");
    }

    fn on_unit(&self, unit: &WorkUnit, outcome: &Outcome) {
        match outcome {
            Outcome::Failed(_) => warn!(%unit, %outcome, "unit finished"),
            _ => debug!(%unit, %outcome, "unit finished"),
        }
    }

    fn on_class_complete(&self, class: AssetClass, report: &SyncReport) {
        info!(
            asset = %class,
            downloaded = report.downloaded,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed(),
            "{class} files summary"
        );
    }
}

/// Discards progress.
pub struct NoProgress;

impl SyncProgress for NoProgress {
    fn on_class_start(&self, _class: AssetClass, _days: usize) {}
    fn on_unit(&self, _unit: &WorkUnit, _outcome: &Outcome) {}
    fn on_class_complete(&self, _class: AssetClass, _report: &SyncReport) {}
}

pub struct Synchronizer<'a> {
    cache: &'a FlatFileCache,
    remote: &'a dyn RemoteStore,
    progress: &'a dyn SyncProgress,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        cache: &'a FlatFileCache,
        remote: &'a dyn RemoteStore,
        progress: &'a dyn SyncProgress,
    ) -> Self {
        Self {
            cache,
            remote,
            progress,
        }
    }

    pub fn planner(&self) -> Planner<'a> {
        Planner::new(self.cache, self.remote)
    }

    pub fn executor(&self) -> Executor<'a> {
        Executor::new(self.cache, self.remote)
    }

    /// Plan and execute one unit. Never fails; errors become `Outcome::Failed`.
    pub fn sync_unit(&self, unit: WorkUnit, config: &SyncConfig) -> Outcome {
        let outcome = match self.planner().plan_unit(unit, config) {
            Ok(action) => self.executor().execute(&unit, &action),
            Err(e) => {
                warn!(%unit, error = %e, "planning failed");
                Outcome::Failed(e.to_string())
            }
        };
        self.progress.on_unit(&unit, &outcome);
        outcome
    }

    /// Run a full sweep. Only an invalid configuration is an error; unit
    /// failures are listed in the report.
    pub fn run(&self, config: &SyncConfig) -> Result<SyncReport, ConfigError> {
        config.validate()?;

        let pool = if config.jobs > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(config.jobs)
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!(error = %e, "failed to build worker pool, running sequentially");
                    None
                }
            }
        } else {
            None
        };

        let mut report = SyncReport::default();

        for class in config.classes() {
            self.progress.on_class_start(class, config.day_count());

            let units: Vec<WorkUnit> = unit::days(config.start, config.end)
                .map(|date| WorkUnit::new(class, date))
                .collect();

            let outcomes: Vec<Outcome> = match &pool {
                Some(pool) => pool.install(|| {
                    units
                        .par_iter()
                        .map(|unit| self.sync_unit(*unit, config))
                        .collect()
                }),
                None => units
                    .iter()
                    .map(|unit| self.sync_unit(*unit, config))
                    .collect(),
            };

            let mut class_report = SyncReport::default();
            for (unit, outcome) in units.into_iter().zip(&outcomes) {
                class_report.record(unit, outcome);
            }

            self.progress.on_class_complete(class, &class_report);
            report.merge(class_report);
        }

        Ok(report)
    }
}
