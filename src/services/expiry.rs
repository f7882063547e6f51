use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::clock::Clock;
use crate::error::AppError;
use crate::model::BookingStatus;
use crate::repository::BookingStore;
use crate::services::booking_engine::BookingEngine;
use crate::state::AppState;

/// Background loop that sweeps held bookings past their approval window
/// into `canceled`. Runs in every process; `expire` is first-writer-wins
/// through the store's conditional update, so overlapping sweeps (and any
/// number of polling clients hitting the expire endpoint) are harmless.
pub async fn run_expiry_scheduler(state: AppState) {
    let interval = Duration::from_secs(state.config.expiry_scan_interval_seconds.max(5));
    tracing::info!(interval_seconds = interval.as_secs(), "expiry scheduler started");

    loop {
        sleep(interval).await;

        let summary = sweep_once(
            &state.store,
            &state.engine,
            state.clock.as_ref(),
            state.config.pricing.approval_window_minutes,
        )
        .await;
        if summary.expired > 0 || summary.failed > 0 {
            tracing::info!(
                due = summary.due,
                expired = summary.expired,
                already_settled = summary.already_settled,
                failed = summary.failed,
                "expiry sweep completed"
            );
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub due: usize,
    pub expired: usize,
    pub already_settled: usize,
    pub failed: usize,
}

pub async fn sweep_once(
    store: &Arc<dyn BookingStore>,
    engine: &BookingEngine,
    clock: &dyn Clock,
    approval_window_minutes: i64,
) -> SweepSummary {
    let cutoff = clock.now() - chrono::Duration::minutes(approval_window_minutes);

    let due_ids = match store.list_held_created_before(cutoff).await {
        Ok(ids) => ids,
        Err(error) => {
            tracing::warn!(error = %error, "expiry sweep could not list due bookings");
            return SweepSummary::default();
        }
    };

    let mut summary = SweepSummary {
        due: due_ids.len(),
        ..SweepSummary::default()
    };

    for booking_id in due_ids {
        match engine.expire(&booking_id).await {
            Ok(booking) if booking.status == BookingStatus::Canceled => {
                summary.expired += 1;
            }
            Ok(_) => summary.already_settled += 1,
            // Lost the race to another sweeper between list and expire.
            Err(AppError::Conflict(_)) => summary.already_settled += 1,
            Err(error) => {
                summary.failed += 1;
                tracing::warn!(booking_id = %booking_id, error = %error, "expire failed");
            }
        }
    }

    summary
}
