//! Overstay phase and accrual. Pure functions: the charge is derived from
//! the grace end and the caller's clock reading on every evaluation, never
//! kept as a running counter that could drift under retries.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverstayPhase {
    /// The booked window has not ended.
    None,
    /// Past the end of the window but no monitor has recorded detection yet.
    AwaitingDetection,
    /// Detected; no remediation action may be taken until the grace window
    /// elapses.
    Grace,
    /// Grace elapsed; the host may choose a remediation action.
    Actionable,
}

pub fn phase(
    end_at: DateTime<Utc>,
    grace_end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> OverstayPhase {
    if now <= end_at {
        return OverstayPhase::None;
    }
    match grace_end {
        None => OverstayPhase::AwaitingDetection,
        Some(grace_end) if now < grace_end => OverstayPhase::Grace,
        Some(_) => OverstayPhase::Actionable,
    }
}

/// Charging-mode accrual since the grace end, rounded up to the next cent.
/// Zero at or before the grace end; monotonically non-decreasing in `now`.
pub fn accrual_cents(
    rate_cents_per_hour: i64,
    grace_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> i64 {
    if now <= grace_end {
        return 0;
    }
    let elapsed_seconds = (now - grace_end).num_seconds();
    // Integer ceiling of rate * elapsed / 3600, avoiding float drift.
    (rate_cents_per_hour * elapsed_seconds + 3599) / 3600
}
