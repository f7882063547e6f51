mod support;

use chrono::Duration;

use curbside_backend_rs::error::AppError;
use curbside_backend_rs::model::{BookingStatus, GuestContact, OverstayAction, Party};
use curbside_backend_rs::services::booking_engine::{CancelActor, ExtendOutcome};

use support::{harness, request, t0, GatewayCall};

#[tokio::test]
async fn instant_book_captures_and_prices_correctly() {
    let h = harness();
    let created = h.engine.create(request(true)).await.unwrap();
    let booking = created.booking;

    assert_eq!(booking.status, BookingStatus::Active);
    assert_eq!(booking.subtotal_cents, 4600);
    assert_eq!(booking.platform_fee_cents, 690);
    assert_eq!(booking.total_amount_cents, 5290);
    assert_eq!(booking.original_total_amount_cents, 5290);
    assert_eq!(
        booking.total_amount_cents,
        booking.subtotal_cents + booking.platform_fee_cents + booking.ev_charging_fee_cents
    );

    assert_eq!(
        h.gateway.calls(),
        vec![
            GatewayCall::Authorize { amount_cents: 5290 },
            GatewayCall::Capture {
                intent_ref: booking.payment_intent.clone()
            },
        ]
    );
}

#[tokio::test]
async fn ev_fee_is_added_at_creation_only() {
    let h = harness();
    let mut req = request(true);
    req.ev_rate_cents_per_hour = Some(200);
    let booking = h.engine.create(req).await.unwrap().booking;

    assert_eq!(booking.ev_charging_fee_cents, 800); // $2.00/h over 4 h
    assert_eq!(booking.total_amount_cents, 5290 + 800);

    // Extending adds only the base extension cost, never a second EV fee.
    h.clock.set(t0() + Duration::hours(3));
    let outcome = h
        .engine
        .extend(&booking.id, booking.end_at + Duration::hours(2))
        .await
        .unwrap();
    let ExtendOutcome::Completed { booking, charged_cents } = outcome else {
        panic!("expected a settled extension");
    };
    assert_eq!(charged_cents, 2645);
    assert_eq!(booking.ev_charging_fee_cents, 800);
}

#[tokio::test]
async fn create_rejects_inverted_window() {
    let h = harness();
    let mut req = request(true);
    req.end_at = req.start_at - Duration::hours(1);
    let result = h.engine.create(req).await;
    assert!(matches!(result, Err(AppError::InvalidWindow(_))));
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn create_surfaces_authorization_decline() {
    let h = harness();
    h.gateway
        .decline_authorize
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let result = h.engine.create(request(true)).await;
    assert!(matches!(
        result,
        Err(AppError::PaymentAuthorizationFailed(_))
    ));
}

#[tokio::test]
async fn approve_within_window_captures_once() {
    let h = harness();
    let booking = h.engine.create(request(false)).await.unwrap().booking;
    assert_eq!(booking.status, BookingStatus::Held);

    h.clock.set(t0() + Duration::minutes(59));
    let approved = h.engine.approve(&booking.id).await.unwrap();
    assert_eq!(approved.status, BookingStatus::Active);

    let captures = h
        .gateway
        .calls()
        .iter()
        .filter(|c| matches!(c, GatewayCall::Capture { .. }))
        .count();
    assert_eq!(captures, 1);
}

#[tokio::test]
async fn approve_past_window_is_rejected() {
    let h = harness();
    let booking = h.engine.create(request(false)).await.unwrap().booking;

    h.clock.set(t0() + Duration::minutes(61));
    let result = h.engine.approve(&booking.id).await;
    assert!(matches!(result, Err(AppError::ApprovalWindowExpired(_))));
}

#[tokio::test]
async fn capture_failure_leaves_booking_held() {
    let h = harness();
    let booking = h.engine.create(request(false)).await.unwrap().booking;

    h.gateway
        .fail_capture
        .store(true, std::sync::atomic::Ordering::SeqCst);
    h.clock.set(t0() + Duration::minutes(30));
    let result = h.engine.approve(&booking.id).await;
    assert!(matches!(result, Err(AppError::PaymentCaptureFailed(_))));

    // The claimed transition was reverted; a retry can still succeed.
    let current = h.engine.get(&booking.id).await.unwrap();
    assert_eq!(current.status, BookingStatus::Held);

    h.gateway
        .fail_capture
        .store(false, std::sync::atomic::Ordering::SeqCst);
    let approved = h.engine.approve(&booking.id).await.unwrap();
    assert_eq!(approved.status, BookingStatus::Active);
}

#[tokio::test]
async fn decline_releases_the_hold() {
    let h = harness();
    let booking = h.engine.create(request(false)).await.unwrap().booking;

    let declined = h.engine.decline(&booking.id).await.unwrap();
    assert_eq!(declined.status, BookingStatus::Declined);
    assert_eq!(
        declined.cancellation_reason.as_deref(),
        Some("declined_by_host")
    );
    assert_eq!(h.gateway.release_count(), 1);
}

#[tokio::test]
async fn expire_transitions_once_and_late_approve_fails() {
    let h = harness();
    let booking = h.engine.create(request(false)).await.unwrap().booking;

    // Too early: the window is still open.
    h.clock.set(t0() + Duration::minutes(59));
    assert!(h.engine.expire(&booking.id).await.is_err());

    h.clock.set(t0() + Duration::minutes(61));
    let expired = h.engine.expire(&booking.id).await.unwrap();
    assert_eq!(expired.status, BookingStatus::Canceled);
    assert_eq!(
        expired.cancellation_reason.as_deref(),
        Some("expired_no_response")
    );
    assert_eq!(h.gateway.release_count(), 1);

    // Expire again: success, no second release.
    let again = h.engine.expire(&booking.id).await.unwrap();
    assert_eq!(again.status, BookingStatus::Canceled);
    assert_eq!(h.gateway.release_count(), 1);

    // A late approve on the now-canceled booking is an illegal transition.
    let result = h.engine.approve(&booking.id).await;
    assert!(matches!(result, Err(AppError::IllegalTransition { .. })));
}

#[tokio::test]
async fn concurrent_expires_release_exactly_once() {
    let h = harness();
    let booking = h.engine.create(request(false)).await.unwrap().booking;
    h.clock.set(t0() + Duration::minutes(75));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        let id = booking.id.clone();
        handles.push(tokio::spawn(async move { engine.expire(&id).await }));
    }
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, BookingStatus::Canceled);
    }

    assert_eq!(h.gateway.release_count(), 1);
    let current = h.engine.get(&booking.id).await.unwrap();
    assert_eq!(
        current.cancellation_reason.as_deref(),
        Some("expired_no_response")
    );
}

#[tokio::test]
async fn cancel_within_grace_refunds_in_full() {
    let h = harness();
    let booking = h.engine.create(request(true)).await.unwrap().booking;

    h.clock.set(t0() + Duration::minutes(5));
    let outcome = h
        .engine
        .cancel(&booking.id, CancelActor::Renter)
        .await
        .unwrap();

    assert_eq!(outcome.booking.status, BookingStatus::Canceled);
    assert!(outcome.decision.refundable);
    assert_eq!(outcome.refund_amount_cents, 5290);
    assert_eq!(outcome.booking.refund_amount_cents, 5290);
    assert_eq!(h.gateway.refund_total_cents(), 5290);
    assert_eq!(
        outcome.booking.cancellation_reason.as_deref(),
        Some("canceled_by_renter")
    );
}

#[tokio::test]
async fn cancel_inside_final_hour_refunds_nothing() {
    let h = harness();
    let booking = h.engine.create(request(true)).await.unwrap().booking;

    // Past the grace period and inside the last hour before start.
    h.clock.set(t0() + Duration::minutes(90));
    let outcome = h
        .engine
        .cancel(&booking.id, CancelActor::Renter)
        .await
        .unwrap();

    assert!(!outcome.decision.refundable);
    assert_eq!(outcome.refund_amount_cents, 0);
    assert_eq!(h.gateway.refund_total_cents(), 0);
    assert_eq!(outcome.booking.status, BookingStatus::Canceled);
}

#[tokio::test]
async fn cancel_on_held_booking_releases_the_hold() {
    let h = harness();
    let booking = h.engine.create(request(false)).await.unwrap().booking;

    h.clock.set(t0() + Duration::minutes(5));
    let outcome = h
        .engine
        .cancel(&booking.id, CancelActor::Renter)
        .await
        .unwrap();

    assert_eq!(outcome.booking.status, BookingStatus::Canceled);
    assert_eq!(h.gateway.release_count(), 1);
    assert_eq!(h.gateway.refund_total_cents(), 0);
}

#[tokio::test]
async fn cancel_after_window_end_is_rejected() {
    let h = harness();
    let booking = h.engine.create(request(true)).await.unwrap().booking;

    h.clock.set(t0() + Duration::hours(7));
    let result = h.engine.cancel(&booking.id, CancelActor::Renter).await;
    assert!(matches!(result, Err(AppError::NotCancelable(_))));
}

#[tokio::test]
async fn extension_arithmetic_and_bounds() {
    let h = harness();
    let booking = h.engine.create(request(true)).await.unwrap().booking;
    let before = h.engine.get(&booking.id).await.unwrap();

    h.clock.set(t0() + Duration::hours(3));

    // Below the quarter-hour minimum: rejected, booking untouched.
    let result = h
        .engine
        .extend(&booking.id, booking.end_at + Duration::minutes(10))
        .await;
    assert!(matches!(result, Err(AppError::InvalidExtension(_))));
    assert_eq!(h.engine.get(&booking.id).await.unwrap(), before);

    // Above the 24-hour maximum: rejected, booking untouched.
    let result = h
        .engine
        .extend(&booking.id, booking.end_at + Duration::hours(25))
        .await;
    assert!(matches!(result, Err(AppError::InvalidExtension(_))));
    assert_eq!(h.engine.get(&booking.id).await.unwrap(), before);

    // Two hours: $10/h marked up 15% = $23.00, plus 15% fee = $26.45.
    let outcome = h
        .engine
        .extend(&booking.id, booking.end_at + Duration::hours(2))
        .await
        .unwrap();
    let ExtendOutcome::Completed {
        booking: extended,
        charged_cents,
    } = outcome
    else {
        panic!("expected a settled extension");
    };
    assert_eq!(charged_cents, 2645);
    assert_eq!(extended.end_at, booking.end_at + Duration::hours(2));
    assert_eq!(extended.extension_charges_cents, 2645);
    assert_eq!(extended.total_amount_cents, before.total_amount_cents + 2645);
    assert!((extended.total_hours - 6.0).abs() < 1e-9);
}

#[tokio::test]
async fn extension_step_up_keeps_booking_unchanged_until_finalized() {
    let h = harness();
    let booking = h.engine.create(request(true)).await.unwrap().booking;
    h.clock.set(t0() + Duration::hours(3));

    h.gateway
        .require_authentication
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let outcome = h
        .engine
        .extend(&booking.id, booking.end_at + Duration::hours(2))
        .await
        .unwrap();
    let ExtendOutcome::RequiresAuthentication {
        authorization_ref,
        amount_cents,
        ..
    } = outcome
    else {
        panic!("expected a step-up challenge");
    };
    assert_eq!(amount_cents, 2645);

    // The window and totals are untouched during the gap.
    let pending = h.engine.get(&booking.id).await.unwrap();
    assert_eq!(pending.end_at, booking.end_at);
    assert_eq!(pending.total_amount_cents, booking.total_amount_cents);
    assert!(pending.pending_extension.is_some());

    // A second extension cannot start while one is pending.
    let result = h
        .engine
        .extend(&booking.id, booking.end_at + Duration::hours(3))
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    // Finalize with the wrong authorization fails without mutation.
    let result = h.engine.finalize_extension(&booking.id, "pi_bogus").await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let finalized = h
        .engine
        .finalize_extension(&booking.id, &authorization_ref)
        .await
        .unwrap();
    assert_eq!(finalized.end_at, booking.end_at + Duration::hours(2));
    assert_eq!(finalized.extension_charges_cents, 2645);
    assert_eq!(finalized.total_amount_cents, booking.total_amount_cents + 2645);
    assert!(finalized.pending_extension.is_none());

    // The pending record is consumed; finalizing again fails.
    let result = h
        .engine
        .finalize_extension(&booking.id, &authorization_ref)
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn finalize_without_prior_authorize_fails() {
    let h = harness();
    let booking = h.engine.create(request(true)).await.unwrap().booking;
    let result = h.engine.finalize_extension(&booking.id, "pi_auth_0").await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn modify_round_trip_restores_the_original_total() {
    let h = harness();
    let booking = h.engine.create(request(true)).await.unwrap().booking;
    h.clock.set(t0() + Duration::minutes(30));

    let grown = h
        .engine
        .modify(&booking.id, booking.start_at, booking.start_at + Duration::hours(6))
        .await
        .unwrap();
    assert_eq!(grown.delta_cents, 2645);
    assert_eq!(grown.booking.total_amount_cents, 7935);

    let restored = h
        .engine
        .modify(&booking.id, booking.start_at, booking.start_at + Duration::hours(4))
        .await
        .unwrap();
    assert_eq!(restored.delta_cents, -2645);
    assert_eq!(restored.booking.total_amount_cents, booking.total_amount_cents);
    assert_eq!(restored.booking.subtotal_cents, booking.subtotal_cents);
    assert_eq!(
        restored.booking.platform_fee_cents,
        booking.platform_fee_cents
    );
    assert_eq!(h.gateway.refund_total_cents(), 2645);
}

#[tokio::test]
async fn modify_is_rejected_once_the_booking_started() {
    let h = harness();
    let booking = h.engine.create(request(true)).await.unwrap().booking;

    h.clock.set(t0() + Duration::hours(3));
    let result = h
        .engine
        .modify(
            &booking.id,
            booking.start_at,
            booking.start_at + Duration::hours(6),
        )
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn modify_rejects_inverted_window() {
    let h = harness();
    let booking = h.engine.create(request(true)).await.unwrap().booking;
    h.clock.set(t0() + Duration::minutes(30));

    let result = h
        .engine
        .modify(
            &booking.id,
            booking.start_at + Duration::hours(2),
            booking.start_at + Duration::hours(1),
        )
        .await;
    assert!(matches!(result, Err(AppError::InvalidWindow(_))));
}

#[tokio::test]
async fn overstay_grace_gates_the_action_and_charging_accrues() {
    let h = harness();
    let booking = h.engine.create(request(true)).await.unwrap().booking;

    // 20 minutes past the end of the window, nobody confirmed departure.
    let detection_time = booking.end_at + Duration::minutes(20);
    h.clock.set(detection_time);
    let detected = h.engine.detect_overstay(&booking.id).await.unwrap();
    assert_eq!(detected.overstay_detected_at, Some(detection_time));
    assert_eq!(
        detected.overstay_grace_end,
        Some(detection_time + Duration::minutes(10))
    );

    // Detection is idempotent.
    h.clock.set(detection_time + Duration::minutes(2));
    let redetected = h.engine.detect_overstay(&booking.id).await.unwrap();
    assert_eq!(redetected.overstay_detected_at, Some(detection_time));

    // Before the grace end the action is rejected.
    let result = h
        .engine
        .set_overstay_action(&booking.id, OverstayAction::Charging)
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    // At the grace end it succeeds.
    h.clock.set(detection_time + Duration::minutes(10));
    let charging = h
        .engine
        .set_overstay_action(&booking.id, OverstayAction::Charging)
        .await
        .unwrap();
    assert_eq!(charging.overstay_action, Some(OverstayAction::Charging));
    assert_eq!(h.engine.overstay_charge_now(&charging), 0);

    // One hour past the grace end: $25.00 accrued, derived on read.
    h.clock.set(detection_time + Duration::minutes(70));
    let current = h.engine.get(&booking.id).await.unwrap();
    assert_eq!(h.engine.overstay_charge_now(&current), 2500);
    // The stored settled amount is still zero until departure.
    assert_eq!(current.overstay_charge_amount_cents, 0);

    // Departure settles the accrual as a final charge and clears the
    // episode.
    let completed = h.engine.confirm_departure(&booking.id).await.unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);
    assert_eq!(completed.overstay_charge_amount_cents, 2500);
    assert_eq!(
        completed.total_amount_cents,
        booking.total_amount_cents + 2500
    );
    assert!(completed.overstay_detected_at.is_none());
    assert!(completed.overstay_grace_end.is_none());
    assert!(completed.overstay_action.is_none());
    assert!(h
        .gateway
        .calls()
        .contains(&GatewayCall::Charge { amount_cents: 2500 }));
}

#[tokio::test]
async fn tow_request_can_be_canceled_and_replaced() {
    let h = harness();
    let booking = h.engine.create(request(true)).await.unwrap().booking;

    let detection_time = booking.end_at + Duration::minutes(5);
    h.clock.set(detection_time);
    h.engine.detect_overstay(&booking.id).await.unwrap();

    h.clock.set(detection_time + Duration::minutes(10));
    let towing = h
        .engine
        .set_overstay_action(&booking.id, OverstayAction::Towing)
        .await
        .unwrap();
    assert_eq!(towing.overstay_action, Some(OverstayAction::Towing));
    // Towing never accrues charges.
    h.clock.set(detection_time + Duration::hours(2));
    assert_eq!(h.engine.overstay_charge_now(&towing), 0);

    // A second action while one is in progress is rejected.
    let result = h
        .engine
        .set_overstay_action(&booking.id, OverstayAction::Charging)
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let cleared = h.engine.cancel_tow_request(&booking.id).await.unwrap();
    assert!(cleared.overstay_action.is_none());

    // The episode is still open; a new action may be chosen.
    let charging = h
        .engine
        .set_overstay_action(&booking.id, OverstayAction::Charging)
        .await
        .unwrap();
    assert_eq!(charging.overstay_action, Some(OverstayAction::Charging));
}

#[tokio::test]
async fn guest_bookings_resolve_by_access_token() {
    let h = harness();
    let mut req = request(false);
    req.party = Party::Guest {
        contact: GuestContact {
            name: "Jordan Blake".to_string(),
            email: "jordan@example.com".to_string(),
            phone: "+15550001111".to_string(),
            vehicle: "Blue sedan, ABC-123".to_string(),
        },
    };

    let created = h.engine.create(req).await.unwrap();
    let token = created.guest_access_token.expect("guest token issued");
    assert!(created.booking.guest_token_hash.is_some());

    let found = h.engine.get_by_guest_token(&token).await.unwrap();
    assert_eq!(found.id, created.booking.id);

    let result = h.engine.get_by_guest_token("not-the-token").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    // The same state machine serves the guest path: a guest cancel inside
    // the grace period refunds in full.
    h.clock.set(t0() + Duration::minutes(5));
    let outcome = h
        .engine
        .cancel(&created.booking.id, CancelActor::Renter)
        .await
        .unwrap();
    assert!(outcome.decision.refundable);
}

#[tokio::test]
async fn renter_bookings_issue_no_guest_token() {
    let h = harness();
    let created = h.engine.create(request(true)).await.unwrap();
    assert!(created.guest_access_token.is_none());
    assert!(created.booking.guest_token_hash.is_none());
}
