use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    services::pricing,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/pricing/quote", axum::routing::get(quote))
}

#[derive(Debug, serde::Deserialize)]
struct QuoteQuery {
    hourly_rate_cents: i64,
    hours: f64,
    ev_rate_cents_per_hour: Option<i64>,
}

/// Driver-facing price breakdown for a prospective stay. Uses the same
/// policy functions the booking operations charge with, so a quoted price
/// always matches the charged one.
async fn quote(
    State(state): State<AppState>,
    Query(query): Query<QuoteQuery>,
) -> AppResult<Json<Value>> {
    if query.hourly_rate_cents <= 0 || query.hours <= 0.0 {
        return Err(AppError::BadRequest(
            "hourly_rate_cents and hours must be positive".to_string(),
        ));
    }

    let config = state.engine.pricing();
    let base = pricing::base_pricing(config, query.hourly_rate_cents, query.hours);
    let ev_fee_cents = query
        .ev_rate_cents_per_hour
        .map(|rate| pricing::ev_charging_fee_cents(rate, query.hours))
        .unwrap_or(0);

    Ok(Json(json!({
        "driver_hourly_rate_cents": pricing::driver_hourly_rate_cents(config, query.hourly_rate_cents),
        "driver_subtotal_cents": base.driver_subtotal_cents,
        "service_fee_cents": base.service_fee_cents,
        "ev_charging_fee_cents": ev_fee_cents,
        "total_cents": base.driver_total_cents + ev_fee_cents,
    })))
}
