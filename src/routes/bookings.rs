use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    auth::{hash_access_token, require_user_id},
    error::{AppError, AppResult},
    model::{Booking, BookingStatus, GuestContact, Party},
    schemas::{
        AccessQuery, BookingPath, CreateBookingInput, ExtendBookingInput, FinalizeExtensionInput,
        ModifyBookingInput, OverstayActionInput,
    },
    services::booking_engine::{CancelActor, CreateBookingRequest, ExtendOutcome},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/bookings",
            axum::routing::post(create_booking),
        )
        .route(
            "/bookings/{booking_id}",
            axum::routing::get(get_booking),
        )
        .route(
            "/bookings/{booking_id}/approve",
            axum::routing::post(approve_booking),
        )
        .route(
            "/bookings/{booking_id}/decline",
            axum::routing::post(decline_booking),
        )
        .route(
            "/bookings/{booking_id}/expire",
            axum::routing::post(expire_booking),
        )
        .route(
            "/bookings/{booking_id}/cancel",
            axum::routing::post(cancel_booking),
        )
        .route(
            "/bookings/{booking_id}/extend",
            axum::routing::post(extend_booking),
        )
        .route(
            "/bookings/{booking_id}/extend/finalize",
            axum::routing::post(finalize_extension),
        )
        .route(
            "/bookings/{booking_id}/modify",
            axum::routing::post(modify_booking),
        )
        .route(
            "/bookings/{booking_id}/confirm-departure",
            axum::routing::post(confirm_departure),
        )
        .route(
            "/bookings/{booking_id}/overstay/detect",
            axum::routing::post(detect_overstay),
        )
        .route(
            "/bookings/{booking_id}/overstay/action",
            axum::routing::post(set_overstay_action),
        )
        .route(
            "/bookings/{booking_id}/overstay/cancel-tow",
            axum::routing::post(cancel_tow_request),
        )
}

/// Which side of the booking the caller is on. Guest access tokens count as
/// the renter side; any other authenticated user is treated as host staff
/// (spot ownership lives outside this service).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallerRole {
    Renter,
    Host,
}

fn resolve_caller(
    state: &AppState,
    headers: &HeaderMap,
    token: Option<&str>,
    booking: &Booking,
) -> AppResult<CallerRole> {
    if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
        return if booking.guest_token_hash.as_deref() == Some(hash_access_token(token).as_str()) {
            Ok(CallerRole::Renter)
        } else {
            Err(AppError::Forbidden(
                "access token does not match this booking".to_string(),
            ))
        };
    }

    let user_id = require_user_id(state, headers)?;
    match &booking.party {
        Party::Renter { user_id: renter } if *renter == user_id => Ok(CallerRole::Renter),
        _ => Ok(CallerRole::Host),
    }
}

fn booking_view(state: &AppState, booking: &Booking) -> Value {
    let mut view = json!({
        "booking": booking,
        "overstay_charge_cents": state.engine.overstay_charge_now(booking),
    });
    if matches!(booking.status, BookingStatus::Pending | BookingStatus::Held) {
        view["approval_deadline"] = json!(state.engine.approval_deadline(booking));
    }
    view
}

async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBookingInput>,
) -> AppResult<impl IntoResponse> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let party = match payload.guest {
        Some(guest) => Party::Guest {
            contact: GuestContact {
                name: guest.name,
                email: guest.email,
                phone: guest.phone,
                vehicle: guest.vehicle,
            },
        },
        None => Party::Renter {
            user_id: require_user_id(&state, &headers)?,
        },
    };

    let created = state
        .engine
        .create(CreateBookingRequest {
            spot_id: payload.spot_id,
            instant_book: payload.instant_book,
            hourly_rate_cents: payload.hourly_rate_cents,
            ev_rate_cents_per_hour: payload.ev_rate_cents_per_hour,
            start_at: payload.start_at,
            end_at: payload.end_at,
            party,
            payer_ref: payload.payer_ref,
        })
        .await?;

    let mut body = booking_view(&state, &created.booking);
    if let Some(token) = created.guest_access_token {
        body["guest_access_token"] = json!(token);
    }
    Ok((axum::http::StatusCode::CREATED, Json(body)))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    Query(query): Query<AccessQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let booking = state.engine.get(&path.booking_id).await?;
    resolve_caller(&state, &headers, query.token.as_deref(), &booking)?;
    Ok(Json(booking_view(&state, &booking)))
}

async fn approve_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let booking = state.engine.get(&path.booking_id).await?;
    require_host(&state, &headers, &booking)?;

    let updated = state.engine.approve(&path.booking_id).await?;
    Ok(Json(booking_view(&state, &updated)))
}

async fn decline_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let booking = state.engine.get(&path.booking_id).await?;
    require_host(&state, &headers, &booking)?;

    let updated = state.engine.decline(&path.booking_id).await?;
    Ok(Json(booking_view(&state, &updated)))
}

/// Safe for page reloads and polling clients: converges on the terminal
/// state no matter how many callers race.
async fn expire_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    Query(query): Query<AccessQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let booking = state.engine.get(&path.booking_id).await?;
    resolve_caller(&state, &headers, query.token.as_deref(), &booking)?;

    let updated = state.engine.expire(&path.booking_id).await?;
    Ok(Json(booking_view(&state, &updated)))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    Query(query): Query<AccessQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let booking = state.engine.get(&path.booking_id).await?;
    let actor = match resolve_caller(&state, &headers, query.token.as_deref(), &booking)? {
        CallerRole::Renter => CancelActor::Renter,
        CallerRole::Host => CancelActor::Host,
    };

    let outcome = state.engine.cancel(&path.booking_id, actor).await?;
    let mut body = booking_view(&state, &outcome.booking);
    body["refund_cents"] = json!(outcome.refund_amount_cents);
    body["refund_reason"] = json!(outcome.decision.reason);
    Ok(Json(body))
}

async fn extend_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    Query(query): Query<AccessQuery>,
    headers: HeaderMap,
    Json(payload): Json<ExtendBookingInput>,
) -> AppResult<Json<Value>> {
    let booking = state.engine.get(&path.booking_id).await?;
    require_renter(&state, &headers, query.token.as_deref(), &booking)?;

    match state
        .engine
        .extend(&path.booking_id, payload.new_end_at)
        .await?
    {
        ExtendOutcome::Completed {
            booking,
            charged_cents,
        } => {
            let mut body = booking_view(&state, &booking);
            body["charged_cents"] = json!(charged_cents);
            Ok(Json(body))
        }
        ExtendOutcome::RequiresAuthentication {
            booking,
            authorization_ref,
            challenge_ref,
            amount_cents,
        } => {
            let mut body = booking_view(&state, &booking);
            body["requires_authentication"] = json!({
                "authorization_ref": authorization_ref,
                "challenge_ref": challenge_ref,
                "amount_cents": amount_cents,
            });
            Ok(Json(body))
        }
    }
}

async fn finalize_extension(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    Query(query): Query<AccessQuery>,
    headers: HeaderMap,
    Json(payload): Json<FinalizeExtensionInput>,
) -> AppResult<Json<Value>> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let booking = state.engine.get(&path.booking_id).await?;
    require_renter(&state, &headers, query.token.as_deref(), &booking)?;

    let updated = state
        .engine
        .finalize_extension(&path.booking_id, &payload.authorization_ref)
        .await?;
    Ok(Json(booking_view(&state, &updated)))
}

async fn modify_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    Query(query): Query<AccessQuery>,
    headers: HeaderMap,
    Json(payload): Json<ModifyBookingInput>,
) -> AppResult<Json<Value>> {
    let booking = state.engine.get(&path.booking_id).await?;
    require_renter(&state, &headers, query.token.as_deref(), &booking)?;

    let outcome = state
        .engine
        .modify(&path.booking_id, payload.new_start_at, payload.new_end_at)
        .await?;
    let mut body = booking_view(&state, &outcome.booking);
    body["delta_cents"] = json!(outcome.delta_cents);
    Ok(Json(body))
}

async fn confirm_departure(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    Query(query): Query<AccessQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let booking = state.engine.get(&path.booking_id).await?;
    resolve_caller(&state, &headers, query.token.as_deref(), &booking)?;

    let updated = state.engine.confirm_departure(&path.booking_id).await?;
    Ok(Json(booking_view(&state, &updated)))
}

async fn detect_overstay(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let booking = state.engine.get(&path.booking_id).await?;
    require_host(&state, &headers, &booking)?;

    let updated = state.engine.detect_overstay(&path.booking_id).await?;
    Ok(Json(booking_view(&state, &updated)))
}

async fn set_overstay_action(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
    Json(payload): Json<OverstayActionInput>,
) -> AppResult<Json<Value>> {
    let booking = state.engine.get(&path.booking_id).await?;
    require_host(&state, &headers, &booking)?;

    let updated = state
        .engine
        .set_overstay_action(&path.booking_id, payload.action)
        .await?;
    Ok(Json(booking_view(&state, &updated)))
}

async fn cancel_tow_request(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let booking = state.engine.get(&path.booking_id).await?;
    require_host(&state, &headers, &booking)?;

    let updated = state.engine.cancel_tow_request(&path.booking_id).await?;
    Ok(Json(booking_view(&state, &updated)))
}

fn require_host(state: &AppState, headers: &HeaderMap, booking: &Booking) -> AppResult<()> {
    match resolve_caller(state, headers, None, booking)? {
        CallerRole::Host => Ok(()),
        CallerRole::Renter => Err(AppError::Forbidden(
            "only the host side may perform this action".to_string(),
        )),
    }
}

fn require_renter(
    state: &AppState,
    headers: &HeaderMap,
    token: Option<&str>,
    booking: &Booking,
) -> AppResult<()> {
    match resolve_caller(state, headers, token, booking)? {
        CallerRole::Renter => Ok(()),
        CallerRole::Host => Err(AppError::Forbidden(
            "only the booking's renter may perform this action".to_string(),
        )),
    }
}
