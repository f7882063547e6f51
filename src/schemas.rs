use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

use crate::model::OverstayAction;

#[derive(Debug, Deserialize)]
pub struct BookingPath {
    pub booking_id: String,
}

/// Guest bookings authenticate with the access token issued at creation.
#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GuestContactInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    #[validate(length(min = 1, max = 200))]
    pub vehicle: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingInput {
    #[validate(length(min = 1))]
    pub spot_id: String,
    pub instant_book: bool,
    #[validate(range(min = 1))]
    pub hourly_rate_cents: i64,
    #[validate(range(min = 0))]
    pub ev_rate_cents_per_hour: Option<i64>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    /// Present for unauthenticated guest bookings; absent for renters.
    #[validate(nested)]
    pub guest: Option<GuestContactInput>,
    #[validate(length(min = 1))]
    pub payer_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendBookingInput {
    pub new_end_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FinalizeExtensionInput {
    #[validate(length(min = 1))]
    pub authorization_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct ModifyBookingInput {
    pub new_start_at: DateTime<Utc>,
    pub new_end_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct OverstayActionInput {
    pub action: OverstayAction,
}
