//! Sync planning: decide per unit whether to skip, fetch or refresh.
//!
//! The decision itself is a pure function of the local slot state and what
//! the remote reported (if it was asked). The planner only asks the remote
//! when the decision depends on it: Unchecked slots are fetched without a
//! metadata request, ConfirmedAbsent slots are skipped without one unless
//! `recheck_absent` is set.

use std::fmt;

use crate::config::{ConfigError, SyncConfig};
use crate::data::cache::{FlatFileCache, SlotState};
use crate::data::remote::RemoteStore;
use crate::unit::{self, WorkUnit};

use super::UnitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ConfirmedAbsent,
    UpToDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Skip(SkipReason),
    /// Slot never checked: GET and store bytes or marker.
    Fetch,
    /// Slot known but stale: GET and replace the entry.
    Refresh,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Skip(SkipReason::ConfirmedAbsent) => f.write_str("skip (confirmed absent)"),
            Action::Skip(SkipReason::UpToDate) => f.write_str("skip (up to date)"),
            Action::Fetch => f.write_str("fetch"),
            Action::Refresh => f.write_str("refresh"),
        }
    }
}

/// What the remote said about a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteView<'a> {
    NotQueried,
    Missing,
    Available(&'a str),
}

/// Whether deciding a slot requires a metadata request.
pub fn needs_remote_check(local: &SlotState, recheck_absent: bool) -> bool {
    match local {
        SlotState::Unchecked => false,
        SlotState::ConfirmedAbsent => recheck_absent,
        SlotState::Present(_) => true,
    }
}

/// Decide what to do with one slot.
///
/// A Present slot the remote no longer has is refreshed; the executor then
/// replaces it with an absent marker. A Present slot that was not checked
/// cannot be shown current and is refreshed too.
pub fn decide(local: &SlotState, remote: RemoteView<'_>) -> Action {
    match (local, remote) {
        (SlotState::Unchecked, _) => Action::Fetch,
        (SlotState::ConfirmedAbsent, RemoteView::Available(_)) => Action::Refresh,
        (SlotState::ConfirmedAbsent, _) => Action::Skip(SkipReason::ConfirmedAbsent),
        (SlotState::Present(stored), RemoteView::Available(current)) if stored == current => {
            Action::Skip(SkipReason::UpToDate)
        }
        (SlotState::Present(_), _) => Action::Refresh,
    }
}

/// One planned unit. Planning a unit can fail (cache unreadable, remote down);
/// the failure is carried to the sweep, which reports it for that unit only.
#[derive(Debug)]
pub struct PlannedUnit {
    pub unit: WorkUnit,
    pub action: Result<Action, UnitError>,
}

pub struct Planner<'a> {
    cache: &'a FlatFileCache,
    remote: &'a dyn RemoteStore,
}

impl<'a> Planner<'a> {
    pub fn new(cache: &'a FlatFileCache, remote: &'a dyn RemoteStore) -> Self {
        Self { cache, remote }
    }

    /// Plan a single unit.
    pub fn plan_unit(&self, unit: WorkUnit, config: &SyncConfig) -> Result<Action, UnitError> {
        let local = self.cache.probe(&unit)?;

        let action = if needs_remote_check(&local, config.recheck_absent) {
            let head = self.remote.head(unit.asset_class, unit.date)?;
            let view = match &head {
                Some(head) => RemoteView::Available(&head.content_id),
                None => RemoteView::Missing,
            };
            decide(&local, view)
        } else {
            decide(&local, RemoteView::NotQueried)
        };

        tracing::debug!(%unit, ?local, %action, "planned unit");
        Ok(action)
    }

    /// Lazily plan every unit of `config`, class-major, dates ascending.
    ///
    /// Each call starts a fresh pass; nothing is planned until the iterator
    /// is advanced.
    pub fn plan<'c>(
        &'c self,
        config: &'c SyncConfig,
    ) -> Result<impl Iterator<Item = PlannedUnit> + 'c, ConfigError> {
        config.validate()?;
        let cache: &'c FlatFileCache = self.cache;
        let remote: &'c dyn RemoteStore = self.remote;
        let (start, end) = (config.start, config.end);
        Ok(config
            .classes()
            .into_iter()
            .flat_map(move |class| unit::days(start, end).map(move |d| WorkUnit::new(class, d)))
            .map(move |unit| PlannedUnit {
                unit,
                action: Planner::new(cache, remote).plan_unit(unit, config),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchecked_always_fetches() {
        assert_eq!(decide(&SlotState::Unchecked, RemoteView::NotQueried), Action::Fetch);
        assert_eq!(decide(&SlotState::Unchecked, RemoteView::Missing), Action::Fetch);
        assert_eq!(
            decide(&SlotState::Unchecked, RemoteView::Available("x")),
            Action::Fetch
        );
    }

    #[test]
    fn confirmed_absent_skips_unless_remote_has_data() {
        assert_eq!(
            decide(&SlotState::ConfirmedAbsent, RemoteView::NotQueried),
            Action::Skip(SkipReason::ConfirmedAbsent)
        );
        assert_eq!(
            decide(&SlotState::ConfirmedAbsent, RemoteView::Missing),
            Action::Skip(SkipReason::ConfirmedAbsent)
        );
        assert_eq!(
            decide(&SlotState::ConfirmedAbsent, RemoteView::Available("new")),
            Action::Refresh
        );
    }

    #[test]
    fn present_compares_identifiers() {
        let local = SlotState::Present("etag-1".into());
        assert_eq!(
            decide(&local, RemoteView::Available("etag-1")),
            Action::Skip(SkipReason::UpToDate)
        );
        assert_eq!(decide(&local, RemoteView::Available("etag-2")), Action::Refresh);
        assert_eq!(decide(&local, RemoteView::Missing), Action::Refresh);
        assert_eq!(decide(&local, RemoteView::NotQueried), Action::Refresh);
    }

    #[test]
    fn remote_check_only_when_it_matters() {
        assert!(!needs_remote_check(&SlotState::Unchecked, true));
        assert!(!needs_remote_check(&SlotState::ConfirmedAbsent, false));
        assert!(needs_remote_check(&SlotState::ConfirmedAbsent, true));
        assert!(needs_remote_check(&SlotState::Present("e".into()), false));
    }

    #[test]
    fn action_display() {
        assert_eq!(Action::Fetch.to_string(), "fetch");
        assert_eq!(
            Action::Skip(SkipReason::UpToDate).to_string(),
            "skip (up to date)"
        );
    }
}
