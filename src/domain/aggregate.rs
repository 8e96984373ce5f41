use super::period::PeriodType;
use super::scope::Scope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one aggregate row: the unit of atomic increment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    pub student_id: String,
    pub scope: Scope,
    pub period_type: PeriodType,
    pub period_key: String,
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.student_id, self.scope, self.period_type, self.period_key
        )
    }
}

/// One pending increment produced by the fan-out of a point event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateDelta {
    pub key: AggregateKey,
    pub amount: i64,
}

/// A running per-period, per-scope total.
///
/// Invariant: `total` equals the sum of all point events whose timestamp
/// falls in the period and whose scopes match. Mutated only through atomic
/// increments; full recomputation is the repair operation, not the hot path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsAggregate {
    pub key: AggregateKey,
    pub total: i64,
    pub updated_at: DateTime<Utc>,
}
