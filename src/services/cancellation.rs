//! Refund decision for a cancellation request. Pure and total: given the
//! booking's timestamps and the caller's clock reading it always produces a
//! decision, never an error.

use chrono::{DateTime, Duration, Utc};

use crate::config::PricingConfig;

pub const REASON_WITHIN_GRACE: &str = "within grace period";
pub const REASON_BEFORE_CUTOFF: &str = "more than 1 hour before start";
pub const REASON_PAST_CUTOFF: &str = "less than 1 hour before start";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundDecision {
    pub refundable: bool,
    pub reason: &'static str,
}

/// The grace-period check runs first and is sufficient on its own: a
/// cancellation 5 minutes after creation is fully refunded even when that
/// moment is already inside the 1-hour-before-start window.
pub fn decide(
    pricing: &PricingConfig,
    created_at: DateTime<Utc>,
    start_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> RefundDecision {
    if now <= created_at + Duration::minutes(pricing.cancellation_grace_minutes) {
        return RefundDecision {
            refundable: true,
            reason: REASON_WITHIN_GRACE,
        };
    }
    if now <= start_at - Duration::hours(1) {
        return RefundDecision {
            refundable: true,
            reason: REASON_BEFORE_CUTOFF,
        };
    }
    RefundDecision {
        refundable: false,
        reason: REASON_PAST_CUTOFF,
    }
}
