//! Derived board health metrics.
//!
//! Everything here is a pure function of rows already loaded; the store
//! stays the single source of truth and nothing is cached. Reordering a
//! deal inside its stage changes none of these values.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use entity::{deal, stage};

/// Staleness threshold applied when a stage has no `rotten_days` override.
pub const DEFAULT_ROTTEN_DAYS: i64 = 30;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StageMetrics {
    /// Live deals in the stage, regardless of status.
    pub count: i64,
    /// Sum of deal values over open and won deals. Lost deals are excluded.
    pub total_value_cents: i64,
    /// Sum of value x effective probability over open and won deals.
    pub weighted_value_cents: i64,
}

/// A deal's own probability override, or its stage's default.
pub fn effective_probability(deal: &deal::Model, stage: &stage::Model) -> i16 {
    deal.probability.unwrap_or(stage.probability)
}

fn weighted_cents(value_cents: i64, probability: i16) -> i64 {
    value_cents * i64::from(probability) / 100
}

/// Aggregate metrics for one stage. `deals` must be the stage's members;
/// soft-deleted rows are skipped defensively.
pub fn stage_metrics(stage: &stage::Model, deals: &[deal::Model]) -> StageMetrics {
    let mut metrics = StageMetrics::default();
    for deal in deals.iter().filter(|d| !d.is_deleted) {
        metrics.count += 1;
        if deal.status == deal::Status::Lost {
            continue;
        }
        let value = deal.value_cents.unwrap_or(0);
        metrics.total_value_cents += value;
        metrics.weighted_value_cents += weighted_cents(value, effective_probability(deal, stage));
    }
    metrics
}

/// Open past its expected close date.
pub fn is_overdue(deal: &deal::Model, today: NaiveDate) -> bool {
    match deal.expected_close_date {
        Some(expected) => expected < today && deal.actual_close_date.is_none(),
        None => false,
    }
}

pub fn rotten_threshold(stage: &stage::Model, default_days: i64) -> Duration {
    Duration::days(stage.rotten_days.map(i64::from).unwrap_or(default_days))
}

pub fn days_in_stage(deal: &deal::Model, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(deal.stage_entered_at.with_timezone(&Utc))
        .num_days()
}

/// An open deal that has sat in its current stage past the threshold.
/// `stage_entered_at` resets on every stage change, so any move to another
/// stage clears this immediately.
pub fn is_rotten(
    deal: &deal::Model,
    stage: &stage::Model,
    now: DateTime<Utc>,
    default_days: i64,
) -> bool {
    deal.status == deal::Status::Open
        && now.signed_duration_since(deal.stage_entered_at.with_timezone(&Utc))
            > rotten_threshold(stage, default_days)
}
