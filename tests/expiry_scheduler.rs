mod support;

use std::sync::Arc;

use chrono::Duration;

use curbside_backend_rs::model::BookingStatus;
use curbside_backend_rs::repository::BookingStore;
use curbside_backend_rs::services::expiry::sweep_once;

use support::{harness, request, t0};

#[tokio::test]
async fn sweep_expires_only_bookings_past_their_window() {
    let h = harness();
    let store: Arc<dyn BookingStore> = h.store.clone();

    let stale_a = h.engine.create(request(false)).await.unwrap().booking;
    let stale_b = h.engine.create(request(false)).await.unwrap().booking;
    let active = h.engine.create(request(true)).await.unwrap().booking;

    // A held booking created half an hour later is not yet due.
    h.clock.set(t0() + Duration::minutes(30));
    let fresh = h.engine.create(request(false)).await.unwrap().booking;

    h.clock.set(t0() + Duration::minutes(61));
    let summary = sweep_once(&store, &h.engine, h.clock.as_ref(), 60).await;
    assert_eq!(summary.due, 2);
    assert_eq!(summary.expired, 2);
    assert_eq!(summary.failed, 0);

    for id in [&stale_a.id, &stale_b.id] {
        let booking = h.engine.get(id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Canceled);
        assert_eq!(
            booking.cancellation_reason.as_deref(),
            Some("expired_no_response")
        );
    }
    assert_eq!(
        h.engine.get(&fresh.id).await.unwrap().status,
        BookingStatus::Held
    );
    assert_eq!(
        h.engine.get(&active.id).await.unwrap().status,
        BookingStatus::Active
    );
    assert_eq!(h.gateway.release_count(), 2);

    // A second sweep finds nothing left to do.
    let summary = sweep_once(&store, &h.engine, h.clock.as_ref(), 60).await;
    assert_eq!(summary.due, 0);

    // The fresh booking becomes due once its own window elapses.
    h.clock.set(t0() + Duration::minutes(91));
    let summary = sweep_once(&store, &h.engine, h.clock.as_ref(), 60).await;
    assert_eq!(summary.expired, 1);
    assert_eq!(
        h.engine.get(&fresh.id).await.unwrap().status,
        BookingStatus::Canceled
    );
}
