//! Time bucketing for incremental aggregation.
//!
//! Every point event lands in one bucket per period type. Period keys are
//! plain strings so aggregate rows stay keyable and human-readable:
//! `2026-08-06`, `2026-W32`, `2026-08`, a configured term key, or `all`.

use crate::config::TermSettings;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Time granularity of an aggregate row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodType {
    Day,
    Week,
    Month,
    Term,
    AllTime,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Day => "DAY",
            PeriodType::Week => "WEEK",
            PeriodType::Month => "MONTH",
            PeriodType::Term => "TERM",
            PeriodType::AllTime => "ALL_TIME",
        }
    }

    /// All period types, in fan-out order
    pub fn all() -> [PeriodType; 5] {
        [
            PeriodType::Day,
            PeriodType::Week,
            PeriodType::Month,
            PeriodType::Term,
            PeriodType::AllTime,
        ]
    }

    /// The bucket key a timestamp falls into for this period type
    pub fn key_for(&self, ts: DateTime<Utc>, terms: &TermCalendar) -> String {
        match self {
            PeriodType::Day => ts.format("%Y-%m-%d").to_string(),
            // ISO week, keyed by the week-year so year boundaries bucket
            // consistently
            PeriodType::Week => {
                let week = ts.iso_week();
                format!("{:04}-W{:02}", week.year(), week.week())
            }
            PeriodType::Month => ts.format("%Y-%m").to_string(),
            PeriodType::Term => terms.key_for(ts.date_naive()),
            PeriodType::AllTime => "all".to_string(),
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PeriodType {
    type Error = crate::error::RewardsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_uppercase().as_str() {
            "DAY" => Ok(PeriodType::Day),
            "WEEK" => Ok(PeriodType::Week),
            "MONTH" => Ok(PeriodType::Month),
            "TERM" => Ok(PeriodType::Term),
            "ALL_TIME" | "ALLTIME" => Ok(PeriodType::AllTime),
            other => Err(crate::error::RewardsError::UnknownPeriodType(
                other.to_string(),
            )),
        }
    }
}

/// Academic term calendar resolved from configuration.
///
/// Dates falling outside every configured term still need a deterministic
/// TERM bucket, so they get a per-year fallback key instead of failing the
/// pipeline.
#[derive(Debug, Clone, Default)]
pub struct TermCalendar {
    terms: Vec<TermSettings>,
}

impl TermCalendar {
    pub fn new(mut terms: Vec<TermSettings>) -> Self {
        terms.sort_by_key(|t| t.starts_on);
        Self { terms }
    }

    pub fn key_for(&self, date: NaiveDate) -> String {
        self.terms
            .iter()
            .find(|t| t.starts_on <= date && date <= t.ends_on)
            .map(|t| t.key.clone())
            .unwrap_or_else(|| format!("{}-unscheduled", date.year()))
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn calendar() -> TermCalendar {
        TermCalendar::new(vec![
            TermSettings {
                key: "2026-T1".to_string(),
                starts_on: NaiveDate::from_ymd_opt(2026, 1, 7).unwrap(),
                ends_on: NaiveDate::from_ymd_opt(2026, 4, 10).unwrap(),
            },
            TermSettings {
                key: "2026-T2".to_string(),
                starts_on: NaiveDate::from_ymd_opt(2026, 4, 27).unwrap(),
                ends_on: NaiveDate::from_ymd_opt(2026, 7, 3).unwrap(),
            },
        ])
    }

    #[test]
    fn test_period_keys() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 6, 14, 30, 0).unwrap();
        let terms = calendar();

        assert_eq!(PeriodType::Day.key_for(ts, &terms), "2026-08-06");
        assert_eq!(PeriodType::Week.key_for(ts, &terms), "2026-W32");
        assert_eq!(PeriodType::Month.key_for(ts, &terms), "2026-08");
        assert_eq!(PeriodType::AllTime.key_for(ts, &terms), "all");
    }

    #[test]
    fn test_iso_week_year_boundary() {
        // 2027-01-01 is a Friday, ISO week 53 of 2026
        let ts = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            PeriodType::Week.key_for(ts, &TermCalendar::default()),
            "2026-W53"
        );
    }

    #[test]
    fn test_term_lookup_and_fallback() {
        let terms = calendar();

        let in_t1 = Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap();
        assert_eq!(PeriodType::Term.key_for(in_t1, &terms), "2026-T1");

        // Between terms: deterministic fallback, never an error
        let in_break = Utc.with_ymd_and_hms(2026, 4, 15, 9, 0, 0).unwrap();
        assert_eq!(
            PeriodType::Term.key_for(in_break, &terms),
            "2026-unscheduled"
        );
    }

    #[test]
    fn test_keys_are_stable() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 6, 23, 59, 59).unwrap();
        let terms = calendar();

        for period in PeriodType::all() {
            assert_eq!(period.key_for(ts, &terms), period.key_for(ts, &terms));
        }
    }
}
