use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Transient creation state before payment authorization completes.
    /// Treated as `Held` in every legality check.
    Pending,
    /// Awaiting host approval; payment authorized, not captured.
    Held,
    /// Approved or instant-booked; payment captured.
    Active,
    Completed,
    Canceled,
    Declined,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Held => "held",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Canceled => "canceled",
            BookingStatus::Declined => "declined",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Canceled | BookingStatus::Declined
        )
    }
}

/// Who booked the spot: a registered renter, or an unauthenticated guest
/// identified by a contact bundle. The enum makes "exactly one of the two"
/// hold by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Party {
    Renter { user_id: String },
    Guest { contact: GuestContact },
}

impl Party {
    /// Identifier used for notifications: the renter's user id or the
    /// guest's email.
    pub fn notify_ref(&self) -> &str {
        match self {
            Party::Renter { user_id } => user_id,
            Party::Guest { contact } => &contact.email,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Party::Guest { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestContact {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub vehicle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverstayAction {
    Charging,
    Towing,
}

impl OverstayAction {
    pub fn as_str(self) -> &'static str {
        match self {
            OverstayAction::Charging => "charging",
            OverstayAction::Towing => "towing",
        }
    }
}

/// The authorize-then-finalize gap of an extension whose charge required a
/// step-up authentication. The booking window and totals stay untouched
/// until the matching finalize succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingExtension {
    pub new_end_at: DateTime<Utc>,
    pub amount_cents: i64,
    pub authorization_ref: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub spot_id: String,
    pub party: Party,

    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Commercial terms snapshotted at creation. All money is integer cents.
    pub hourly_rate_cents: i64,
    pub total_hours: f64,
    pub subtotal_cents: i64,
    pub platform_fee_cents: i64,
    pub ev_charging_fee_cents: i64,
    pub total_amount_cents: i64,
    pub extension_charges_cents: i64,
    pub original_total_amount_cents: i64,

    pub status: BookingStatus,
    pub instant_book: bool,

    pub overstay_detected_at: Option<DateTime<Utc>>,
    pub overstay_grace_end: Option<DateTime<Utc>>,
    pub overstay_action: Option<OverstayAction>,
    /// Settled accrual. While an episode is open in charging mode, the live
    /// value is derived from the grace end on each read; it is persisted
    /// here exactly once, at departure confirmation.
    pub overstay_charge_amount_cents: i64,

    pub refund_amount_cents: i64,
    pub cancellation_reason: Option<String>,

    /// Opaque handle to the authorized/captured intent at the gateway.
    pub payment_intent: String,
    /// Reference the gateway charges against for post-creation settlements.
    pub payer_ref: String,

    pub pending_extension: Option<PendingExtension>,

    /// SHA-1 hex of the guest access token; guest bookings only.
    pub guest_token_hash: Option<String>,
}

impl Booking {
    /// Fractional hours between the booked start and end.
    pub fn window_hours(&self) -> f64 {
        hours_between(self.start_at, self.end_at)
    }

    pub fn has_open_overstay(&self) -> bool {
        self.overstay_detected_at.is_some()
    }
}

pub fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_seconds() as f64 / 3600.0
}
