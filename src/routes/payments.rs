use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    services::payment_gateway::verify_webhook_signature,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/payments/webhook",
        axum::routing::post(payment_webhook),
    )
}

/// Gateway webhook. Completes a pending extension once its step-up charge
/// settles out-of-band; every other event type is acknowledged and ignored.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Json<Value>> {
    let secret = state.config.stripe_webhook_secret.as_deref().ok_or_else(|| {
        AppError::Dependency("STRIPE_WEBHOOK_SECRET is not configured".to_string())
    })?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if !verify_webhook_signature(&body, signature, secret, state.clock.now()) {
        return Err(AppError::Unauthorized(
            "invalid webhook signature".to_string(),
        ));
    }

    let event: Value = serde_json::from_str(&body)
        .map_err(|_| AppError::BadRequest("invalid webhook payload".to_string()))?;

    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
    if event_type != "payment_intent.succeeded" {
        return Ok(Json(json!({ "received": true })));
    }

    let intent_ref = event
        .pointer("/data/object/id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if intent_ref.is_empty() {
        return Ok(Json(json!({ "received": true })));
    }

    match state.store.find_by_pending_authorization(intent_ref).await {
        Ok(booking) => {
            let updated = state
                .engine
                .finalize_extension(&booking.id, intent_ref)
                .await?;
            tracing::info!(
                booking_id = %updated.id,
                intent = %intent_ref,
                "pending extension finalized via webhook"
            );
            Ok(Json(json!({ "received": true, "booking_id": updated.id })))
        }
        // Intents that don't belong to a pending extension are not ours to
        // act on.
        Err(AppError::NotFound(_)) => Ok(Json(json!({ "received": true }))),
        Err(other) => Err(other),
    }
}
