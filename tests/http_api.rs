mod support;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use curbside_backend_rs::clock::Clock;
use curbside_backend_rs::config::AppConfig;
use curbside_backend_rs::routes;
use curbside_backend_rs::state::AppState;

use support::harness;

fn test_state(h: &support::Harness) -> AppState {
    let mut config = AppConfig::from_env();
    config.environment = "test".to_string();
    config.dev_auth_overrides_enabled = true;

    AppState {
        config: Arc::new(config),
        store: h.store.clone(),
        clock: h.clock.clone() as Arc<dyn Clock>,
        engine: h.engine.clone(),
        http_client: reqwest::Client::new(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_answers() {
    let h = harness();
    let app = routes::v1_router().with_state(test_state(&h));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn guest_booking_flow_over_http() {
    let h = harness();
    let app = routes::v1_router().with_state(test_state(&h));

    // An unauthenticated guest creates an approval-required booking.
    let payload = json!({
        "spot_id": "spot-42",
        "instant_book": false,
        "hourly_rate_cents": 1000,
        "start_at": "2026-06-01T10:00:00Z",
        "end_at": "2026-06-01T14:00:00Z",
        "guest": {
            "name": "Jordan Blake",
            "email": "jordan@example.com",
            "phone": "+15550001111",
            "vehicle": "Blue sedan, ABC-123"
        },
        "payer_ref": "pm_card"
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/bookings")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;

    let booking_id = created["booking"]["id"].as_str().unwrap().to_string();
    let token = created["guest_access_token"].as_str().unwrap().to_string();
    assert_eq!(created["booking"]["status"], "held");
    assert_eq!(created["booking"]["total_amount_cents"], 5290);
    assert!(created["approval_deadline"].is_string());

    // Without the token (and without auth) the booking is not readable.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/bookings/{booking_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // With the token the guest sees their booking.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/bookings/{booking_id}?token={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A wrong token is rejected.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/bookings/{booking_id}?token=bogus"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The host (any authenticated non-renter via the dev override) approves.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/bookings/{booking_id}/approve"))
                .header("x-user-id", "host-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let approved = body_json(response).await;
    assert_eq!(approved["booking"]["status"], "active");

    // The guest cancels with their token; inside the grace period this
    // refunds in full.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/bookings/{booking_id}/cancel?token={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let canceled = body_json(response).await;
    assert_eq!(canceled["booking"]["status"], "canceled");
    assert_eq!(canceled["refund_cents"], 5290);
    assert_eq!(canceled["refund_reason"], "within grace period");
}

#[tokio::test]
async fn quote_matches_what_booking_charges() {
    let h = harness();
    let app = routes::v1_router().with_state(test_state(&h));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/pricing/quote?hourly_rate_cents=1000&hours=4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let quote = body_json(response).await;

    assert_eq!(quote["driver_hourly_rate_cents"], 1150);
    assert_eq!(quote["driver_subtotal_cents"], 4600);
    assert_eq!(quote["service_fee_cents"], 690);
    assert_eq!(quote["total_cents"], 5290);

    // The same stay booked instant-book charges exactly the quoted total.
    let created = h.engine.create(support::request(true)).await.unwrap();
    assert_eq!(created.booking.total_amount_cents, 5290);
}

#[tokio::test]
async fn illegal_transitions_map_to_unprocessable_entity() {
    let h = harness();
    let app = routes::v1_router().with_state(test_state(&h));

    let created = h.engine.create(support::request(true)).await.unwrap();

    // Approving an already-active booking is an illegal transition.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/bookings/{}/approve", created.booking.id))
                .header("x-user-id", "host-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "illegal_transition");
}
