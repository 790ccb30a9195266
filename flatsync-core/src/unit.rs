//! Work units: one (asset class, day) pair per remote file and cache slot.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::asset::AssetClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkUnit {
    pub asset_class: AssetClass,
    pub date: NaiveDate,
}

impl WorkUnit {
    pub fn new(asset_class: AssetClass, date: NaiveDate) -> Self {
        Self { asset_class, date }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.asset_class, self.date.format("%Y-%m-%d"))
    }
}

/// Days in `[start, end)`.
pub fn days(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d < end)
}

/// Units for every class over `[start, end)`, class-major, dates ascending.
pub fn units(
    classes: &[AssetClass],
    start: NaiveDate,
    end: NaiveDate,
) -> impl Iterator<Item = WorkUnit> + '_ {
    classes
        .iter()
        .flat_map(move |&class| days(start, end).map(move |date| WorkUnit::new(class, date)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn end_is_exclusive() {
        let all: Vec<_> = days(d(2025, 1, 1), d(2025, 1, 4)).collect();
        assert_eq!(all, vec![d(2025, 1, 1), d(2025, 1, 2), d(2025, 1, 3)]);
        assert_eq!(days(d(2025, 1, 4), d(2025, 1, 4)).count(), 0);
    }

    #[test]
    fn units_are_class_major() {
        let classes = [AssetClass::Stocks, AssetClass::Crypto];
        let all: Vec<_> = units(&classes, d(2024, 12, 31), d(2025, 1, 2)).collect();
        assert_eq!(
            all,
            vec![
                WorkUnit::new(AssetClass::Stocks, d(2024, 12, 31)),
                WorkUnit::new(AssetClass::Stocks, d(2025, 1, 1)),
                WorkUnit::new(AssetClass::Crypto, d(2024, 12, 31)),
                WorkUnit::new(AssetClass::Crypto, d(2025, 1, 1)),
            ]
        );
    }

    #[test]
    fn display() {
        assert_eq!(
            WorkUnit::new(AssetClass::Forex, d(2025, 3, 7)).to_string(),
            "forex 2025-03-07"
        );
    }
}
