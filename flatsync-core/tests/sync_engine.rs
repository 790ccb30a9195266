//! Integration tests for sync sweeps against an in-memory remote.

use chrono::NaiveDate;
use flatsync_core::asset::AssetClass;
use flatsync_core::config::{ConfigError, SyncConfig};
use flatsync_core::data::{FlatFileCache, MemoryRemote, SlotState};
use flatsync_core::sync::{
    Action, NoProgress, Outcome, SkipReason, Stored, SyncReport, Synchronizer,
};
use flatsync_core::unit::WorkUnit;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn stocks_config() -> SyncConfig {
    SyncConfig::new(vec![AssetClass::Stocks], d(2025, 1, 1), d(2025, 1, 4))
}

/// Remote with stocks data on 2025-01-02 and 2025-01-03; 2025-01-01 is a holiday.
fn holiday_remote() -> MemoryRemote {
    let remote = MemoryRemote::new();
    remote.put(AssetClass::Stocks, d(2025, 1, 2), b"day two".to_vec());
    remote.put(AssetClass::Stocks, d(2025, 1, 3), b"day three".to_vec());
    remote
}

fn run(cache: &FlatFileCache, remote: &MemoryRemote, config: &SyncConfig) -> SyncReport {
    Synchronizer::new(cache, remote, &NoProgress)
        .run(config)
        .unwrap()
}

fn counts(report: &SyncReport) -> (usize, usize, usize, usize) {
    (
        report.downloaded,
        report.updated,
        report.skipped,
        report.failed(),
    )
}

#[test]
fn first_run_downloads_every_unit_then_skips() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FlatFileCache::new(dir.path());
    let remote = holiday_remote();
    let config = stocks_config();

    let first = run(&cache, &remote, &config);
    assert_eq!(counts(&first), (3, 0, 0, 0));
    assert_eq!(first.to_string(), "downloaded=3 updated=0 skipped=0 failed=0");

    let holiday = WorkUnit::new(AssetClass::Stocks, d(2025, 1, 1));
    assert_eq!(cache.probe(&holiday).unwrap(), SlotState::ConfirmedAbsent);
    let day_two = WorkUnit::new(AssetClass::Stocks, d(2025, 1, 2));
    assert_eq!(cache.read_present(&day_two).unwrap(), b"day two");

    let second = run(&cache, &remote, &config);
    assert_eq!(counts(&second), (0, 0, 3, 0));
}

#[test]
fn converged_cache_makes_no_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FlatFileCache::new(dir.path());
    let remote = holiday_remote();
    let config = stocks_config();

    run(&cache, &remote, &config);
    run(&cache, &remote, &config);
    let gets = remote.get_count();
    let heads = remote.head_count();

    let third = run(&cache, &remote, &config);

    assert_eq!(counts(&third), (0, 0, 3, 0));
    assert_eq!(remote.get_count(), gets);
    // Only the two Present days are checked; the holiday is not asked about.
    assert_eq!(remote.head_count(), heads + 2);
}

#[test]
fn changed_identifier_is_updated() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FlatFileCache::new(dir.path());
    let remote = holiday_remote();
    let config = stocks_config();
    run(&cache, &remote, &config);

    remote.put(AssetClass::Stocks, d(2025, 1, 3), b"day three, corrected".to_vec());
    let report = run(&cache, &remote, &config);

    assert_eq!(counts(&report), (0, 1, 2, 0));
    let unit = WorkUnit::new(AssetClass::Stocks, d(2025, 1, 3));
    assert_eq!(
        cache.probe(&unit).unwrap(),
        SlotState::Present(remote.content_id(AssetClass::Stocks, d(2025, 1, 3)).unwrap())
    );
    assert_eq!(cache.read_present(&unit).unwrap(), b"day three, corrected");
}

#[test]
fn partial_failure_is_reported_and_retried() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FlatFileCache::new(dir.path());
    let remote = holiday_remote();
    let config = stocks_config();
    remote.fail(AssetClass::Stocks, d(2025, 1, 3));

    let first = run(&cache, &remote, &config);

    assert_eq!(counts(&first), (2, 0, 0, 1));
    let failed = WorkUnit::new(AssetClass::Stocks, d(2025, 1, 3));
    assert_eq!(first.failures[0].unit, failed);
    assert_eq!(cache.probe(&failed).unwrap(), SlotState::Unchecked);

    remote.heal(AssetClass::Stocks, d(2025, 1, 3));
    let gets = remote.get_count();
    let second = run(&cache, &remote, &config);

    assert_eq!(counts(&second), (1, 0, 2, 0));
    assert_eq!(remote.get_count(), gets + 1);
    assert!(matches!(cache.probe(&failed).unwrap(), SlotState::Present(_)));
}

#[test]
fn removed_upstream_becomes_absent() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FlatFileCache::new(dir.path());
    let remote = holiday_remote();
    let config = stocks_config();
    run(&cache, &remote, &config);

    remote.remove(AssetClass::Stocks, d(2025, 1, 2));
    let synchronizer = Synchronizer::new(&cache, &remote, &NoProgress);
    let unit = WorkUnit::new(AssetClass::Stocks, d(2025, 1, 2));
    assert_eq!(
        synchronizer.planner().plan_unit(unit, &config).unwrap(),
        Action::Refresh
    );

    assert_eq!(
        synchronizer.sync_unit(unit, &config),
        Outcome::Updated(Stored::Absent)
    );
    assert_eq!(cache.probe(&unit).unwrap(), SlotState::ConfirmedAbsent);
}

#[test]
fn absent_days_are_not_rechecked_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FlatFileCache::new(dir.path());
    let remote = holiday_remote();
    let mut config = stocks_config();
    run(&cache, &remote, &config);

    // Late publication for the holiday.
    remote.put(AssetClass::Stocks, d(2025, 1, 1), b"late".to_vec());
    let holiday = WorkUnit::new(AssetClass::Stocks, d(2025, 1, 1));

    let report = run(&cache, &remote, &config);
    assert_eq!(counts(&report), (0, 0, 3, 0));
    assert_eq!(cache.probe(&holiday).unwrap(), SlotState::ConfirmedAbsent);

    config.recheck_absent = true;
    let report = run(&cache, &remote, &config);
    assert_eq!(counts(&report), (0, 1, 2, 0));
    assert_eq!(cache.read_present(&holiday).unwrap(), b"late");
}

#[test]
fn recheck_of_still_absent_day_skips() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FlatFileCache::new(dir.path());
    let remote = holiday_remote();
    let mut config = stocks_config();
    run(&cache, &remote, &config);

    config.recheck_absent = true;
    let synchronizer = Synchronizer::new(&cache, &remote, &NoProgress);
    let holiday = WorkUnit::new(AssetClass::Stocks, d(2025, 1, 1));

    assert_eq!(
        synchronizer.sync_unit(holiday, &config),
        Outcome::Skipped(SkipReason::ConfirmedAbsent)
    );
}

#[test]
fn parallel_sweep_matches_sequential() {
    let remote = MemoryRemote::new();
    let classes = vec![AssetClass::Stocks, AssetClass::Crypto];
    let start = d(2025, 1, 1);
    let end = d(2025, 2, 1);
    for date in flatsync_core::unit::days(start, end).step_by(2) {
        remote.put(AssetClass::Stocks, date, date.to_string().into_bytes());
        remote.put(AssetClass::Crypto, date, format!("crypto {date}").into_bytes());
    }
    remote.fail(AssetClass::Crypto, d(2025, 1, 9));

    let sequential_dir = tempfile::tempdir().unwrap();
    let sequential_cache = FlatFileCache::new(sequential_dir.path());
    let sequential = run(
        &sequential_cache,
        &remote,
        &SyncConfig::new(classes.clone(), start, end),
    );

    let parallel_dir = tempfile::tempdir().unwrap();
    let parallel_cache = FlatFileCache::new(parallel_dir.path());
    let mut parallel_config = SyncConfig::new(classes, start, end);
    parallel_config.jobs = 4;
    let parallel = run(&parallel_cache, &remote, &parallel_config);

    assert_eq!(counts(&sequential), (61, 0, 0, 1));
    assert_eq!(counts(&parallel), counts(&sequential));
    assert_eq!(parallel.failures, sequential.failures);
}

#[test]
fn lazy_plan_covers_every_unit_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FlatFileCache::new(dir.path());
    let remote = holiday_remote();
    let config = SyncConfig::new(
        vec![AssetClass::Stocks, AssetClass::Crypto],
        d(2025, 1, 1),
        d(2025, 1, 4),
    );
    let synchronizer = Synchronizer::new(&cache, &remote, &NoProgress);
    let planner = synchronizer.planner();

    let planned: Vec<_> = planner.plan(&config).unwrap().collect();

    assert_eq!(planned.len(), 6);
    assert_eq!(planned[0].unit, WorkUnit::new(AssetClass::Stocks, d(2025, 1, 1)));
    assert_eq!(planned[5].unit, WorkUnit::new(AssetClass::Crypto, d(2025, 1, 3)));
    assert!(planned
        .iter()
        .all(|p| matches!(p.action, Ok(Action::Fetch))));
    // Unchecked slots are decided without asking the remote.
    assert_eq!(remote.head_count(), 0);
}

#[test]
fn invalid_configuration_fails_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FlatFileCache::new(dir.path());
    let remote = holiday_remote();
    let synchronizer = Synchronizer::new(&cache, &remote, &NoProgress);

    let empty = SyncConfig::new(vec![AssetClass::Stocks], d(2025, 1, 4), d(2025, 1, 4));
    assert!(matches!(
        synchronizer.run(&empty),
        Err(ConfigError::EmptyRange { .. })
    ));

    let none = SyncConfig::new(vec![], d(2025, 1, 1), d(2025, 1, 4));
    assert!(matches!(
        synchronizer.run(&none),
        Err(ConfigError::NoAssetClasses)
    ));

    assert_eq!(remote.head_count() + remote.get_count(), 0);
}
