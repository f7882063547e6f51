use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::clock::Clock;
use crate::config::PricingConfig;
use crate::error::{AppError, AppResult};
use crate::model::{
    hours_between, Booking, BookingStatus, OverstayAction, Party, PendingExtension,
};
use crate::repository::BookingStore;
use crate::services::cancellation::{self, RefundDecision};
use crate::services::notifications::Notifier;
use crate::services::overstay;
use crate::services::payment_gateway::{ChargeOutcome, PaymentGateway};
use crate::services::pricing;

pub const REASON_DECLINED_BY_HOST: &str = "declined_by_host";
pub const REASON_EXPIRED_NO_RESPONSE: &str = "expired_no_response";

#[derive(Debug, Clone)]
pub struct CreateBookingRequest {
    pub spot_id: String,
    pub instant_book: bool,
    pub hourly_rate_cents: i64,
    pub ev_rate_cents_per_hour: Option<i64>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub party: Party,
    pub payer_ref: String,
}

#[derive(Debug, Clone)]
pub struct CreatedBooking {
    pub booking: Booking,
    /// Returned exactly once; only its SHA-1 hash is stored.
    pub guest_access_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelActor {
    Renter,
    Host,
}

impl CancelActor {
    pub fn as_str(self) -> &'static str {
        match self {
            CancelActor::Renter => "renter",
            CancelActor::Host => "host",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub booking: Booking,
    pub refund_amount_cents: i64,
    pub decision: RefundDecision,
}

#[derive(Debug, Clone)]
pub enum ExtendOutcome {
    Completed {
        booking: Booking,
        charged_cents: i64,
    },
    /// The gateway demanded a step-up authentication. Nothing about the
    /// booking window or totals has changed; the caller must complete the
    /// challenge and then finalize.
    RequiresAuthentication {
        booking: Booking,
        authorization_ref: String,
        challenge_ref: String,
        amount_cents: i64,
    },
}

#[derive(Debug, Clone)]
pub struct ModifyOutcome {
    pub booking: Booking,
    /// Positive: charged. Negative: refunded.
    pub delta_cents: i64,
}

/// The booking state machine. Stateless between calls: every operation
/// loads the current booking, decides through the policy modules, claims
/// the transition with a conditional status write, and only then moves
/// money, so a lost race can never double-charge or double-refund.
pub struct BookingEngine {
    store: Arc<dyn BookingStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    pricing: PricingConfig,
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn BookingStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            clock,
            pricing,
        }
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    /// The deadline by which a held booking must be approved.
    pub fn approval_deadline(&self, booking: &Booking) -> DateTime<Utc> {
        booking.created_at + Duration::minutes(self.pricing.approval_window_minutes)
    }

    /// Live overstay charge: the settled amount, or the derived accrual for
    /// an open charging-mode episode.
    pub fn overstay_charge_now(&self, booking: &Booking) -> i64 {
        match (booking.overstay_action, booking.overstay_grace_end) {
            (Some(OverstayAction::Charging), Some(grace_end)) => overstay::accrual_cents(
                self.pricing.overstay_rate_cents_per_hour,
                grace_end,
                self.clock.now(),
            ),
            _ => booking.overstay_charge_amount_cents,
        }
    }

    pub async fn get(&self, id: &str) -> AppResult<Booking> {
        self.store.get(id).await
    }

    pub async fn get_by_guest_token(&self, raw_token: &str) -> AppResult<Booking> {
        self.store
            .find_by_guest_token_hash(&hash_access_token(raw_token))
            .await
    }

    pub async fn create(&self, request: CreateBookingRequest) -> AppResult<CreatedBooking> {
        let now = self.clock.now();
        if request.end_at <= request.start_at {
            return Err(AppError::InvalidWindow(
                "end time must be after start time".to_string(),
            ));
        }

        let hours = hours_between(request.start_at, request.end_at);
        let quote = pricing::base_pricing(&self.pricing, request.hourly_rate_cents, hours);
        let ev_fee_cents = request
            .ev_rate_cents_per_hour
            .map(|rate| pricing::ev_charging_fee_cents(rate, hours))
            .unwrap_or(0);
        let total_amount_cents = quote.driver_total_cents + ev_fee_cents;

        let payment_intent = self
            .gateway
            .authorize(total_amount_cents, &request.payer_ref)
            .await?;

        let status = if request.instant_book {
            if let Err(capture_error) = self.gateway.capture(&payment_intent).await {
                // Don't leave an orphaned hold behind a failed instant-book.
                if let Err(release_error) = self.gateway.release(&payment_intent).await {
                    tracing::error!(
                        intent = %payment_intent,
                        error = %release_error,
                        "could not release authorization after capture failure"
                    );
                }
                return Err(capture_error);
            }
            BookingStatus::Active
        } else {
            BookingStatus::Held
        };

        let guest_access_token = request.party.is_guest().then(|| Uuid::new_v4().to_string());

        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            spot_id: request.spot_id,
            party: request.party,
            start_at: request.start_at,
            end_at: request.end_at,
            created_at: now,
            updated_at: now,
            hourly_rate_cents: request.hourly_rate_cents,
            total_hours: hours,
            subtotal_cents: quote.driver_subtotal_cents,
            platform_fee_cents: quote.service_fee_cents,
            ev_charging_fee_cents: ev_fee_cents,
            total_amount_cents,
            extension_charges_cents: 0,
            original_total_amount_cents: total_amount_cents,
            status,
            instant_book: request.instant_book,
            overstay_detected_at: None,
            overstay_grace_end: None,
            overstay_action: None,
            overstay_charge_amount_cents: 0,
            refund_amount_cents: 0,
            cancellation_reason: None,
            payment_intent,
            payer_ref: request.payer_ref,
            pending_extension: None,
            guest_token_hash: guest_access_token.as_deref().map(hash_access_token),
        };

        self.store.insert(&booking).await?;

        tracing::info!(
            booking_id = %booking.id,
            spot_id = %booking.spot_id,
            status = booking.status.as_str(),
            total_cents = booking.total_amount_cents,
            "booking created"
        );

        let event = if request.instant_book {
            "booking_confirmed"
        } else {
            "booking_requested"
        };
        self.notifier
            .notify(
                booking.party.notify_ref(),
                event,
                json!({ "booking_id": booking.id, "spot_id": booking.spot_id }),
            )
            .await;

        Ok(CreatedBooking {
            booking,
            guest_access_token,
        })
    }

    pub async fn approve(&self, id: &str) -> AppResult<Booking> {
        let now = self.clock.now();
        let current = self.store.get(id).await?;
        self.require_held(&current)?;
        if now > self.approval_deadline(&current) {
            return Err(AppError::ApprovalWindowExpired(
                "the approval window for this booking has elapsed".to_string(),
            ));
        }

        let claimed = self
            .store
            .conditional_update(id, current.status, &|b| {
                b.status = BookingStatus::Active;
                b.updated_at = now;
                Ok(())
            })
            .await?;

        if let Err(capture_error) = self.gateway.capture(&claimed.payment_intent).await {
            self.revert_claim(id, BookingStatus::Active, &current).await;
            return Err(capture_error);
        }

        tracing::info!(booking_id = %id, "booking approved");
        self.notifier
            .notify(
                claimed.party.notify_ref(),
                "booking_approved",
                json!({ "booking_id": id }),
            )
            .await;
        Ok(claimed)
    }

    pub async fn decline(&self, id: &str) -> AppResult<Booking> {
        let now = self.clock.now();
        let current = self.store.get(id).await?;
        self.require_held(&current)?;

        let claimed = self
            .store
            .conditional_update(id, current.status, &|b| {
                b.status = BookingStatus::Declined;
                b.cancellation_reason = Some(REASON_DECLINED_BY_HOST.to_string());
                b.updated_at = now;
                Ok(())
            })
            .await?;

        if let Err(release_error) = self.gateway.release(&claimed.payment_intent).await {
            self.revert_claim(id, BookingStatus::Declined, &current).await;
            return Err(release_error);
        }

        tracing::info!(booking_id = %id, "booking declined by host");
        self.notifier
            .notify(
                claimed.party.notify_ref(),
                "booking_declined",
                json!({ "booking_id": id }),
            )
            .await;
        Ok(claimed)
    }

    /// Idempotent: safe to call any number of times, concurrently. Exactly
    /// one caller performs the release and the status write; everyone else
    /// observes the already-terminal booking and gets it back as success.
    pub async fn expire(&self, id: &str) -> AppResult<Booking> {
        let now = self.clock.now();
        let current = self.store.get(id).await?;

        if !is_held(&current) {
            return Ok(current);
        }
        if now <= self.approval_deadline(&current) {
            return Err(AppError::BadRequest(
                "the approval window has not elapsed".to_string(),
            ));
        }

        let claimed = match self
            .store
            .conditional_update(id, current.status, &|b| {
                b.status = BookingStatus::Canceled;
                b.cancellation_reason = Some(REASON_EXPIRED_NO_RESPONSE.to_string());
                b.updated_at = now;
                Ok(())
            })
            .await
        {
            Ok(claimed) => claimed,
            // Lost the race: someone else already transitioned this
            // booking. Converge on whatever they wrote.
            Err(AppError::Conflict(_)) => return self.store.get(id).await,
            Err(other) => return Err(other),
        };

        // The claim is terminal either way; a failed release is surfaced so
        // the operator can retry it, but the expiry itself stands.
        self.gateway.release(&claimed.payment_intent).await?;

        tracing::info!(booking_id = %id, "held booking expired without host response");
        self.notifier
            .notify(
                claimed.party.notify_ref(),
                "booking_expired",
                json!({ "booking_id": id }),
            )
            .await;
        Ok(claimed)
    }

    pub async fn cancel(&self, id: &str, actor: CancelActor) -> AppResult<CancelOutcome> {
        let now = self.clock.now();
        let current = self.store.get(id).await?;

        if current.status.is_terminal() {
            return Err(AppError::NotCancelable(format!(
                "booking is already '{}'",
                current.status.as_str()
            )));
        }
        if !is_held(&current) && current.status != BookingStatus::Active {
            return Err(illegal(&current));
        }
        if now >= current.end_at {
            return Err(AppError::NotCancelable(
                "the booking window has already ended".to_string(),
            ));
        }

        let decision =
            cancellation::decide(&self.pricing, current.created_at, current.start_at, now);
        let was_captured = current.status == BookingStatus::Active;
        let refund_amount_cents = if decision.refundable {
            current.total_amount_cents
        } else {
            0
        };
        let reason = format!("canceled_by_{}", actor.as_str());

        let claimed = self
            .store
            .conditional_update(id, current.status, &|b| {
                b.status = BookingStatus::Canceled;
                b.refund_amount_cents = refund_amount_cents;
                b.cancellation_reason = Some(reason.clone());
                b.updated_at = now;
                Ok(())
            })
            .await?;

        let settlement = if !was_captured {
            // Funds were only authorized; dropping the hold settles it
            // whether or not the policy would have refunded a capture.
            self.gateway.release(&claimed.payment_intent).await
        } else if refund_amount_cents > 0 {
            self.gateway
                .refund(&claimed.payment_intent, refund_amount_cents)
                .await
        } else {
            Ok(())
        };
        if let Err(gateway_error) = settlement {
            self.revert_claim(id, BookingStatus::Canceled, &current).await;
            return Err(gateway_error);
        }

        tracing::info!(
            booking_id = %id,
            actor = actor.as_str(),
            refundable = decision.refundable,
            refund_cents = refund_amount_cents,
            "booking canceled"
        );
        self.notifier
            .notify(
                claimed.party.notify_ref(),
                "booking_canceled",
                json!({
                    "booking_id": id,
                    "refund_cents": refund_amount_cents,
                    "reason": decision.reason,
                }),
            )
            .await;

        Ok(CancelOutcome {
            booking: claimed,
            refund_amount_cents,
            decision,
        })
    }

    pub async fn extend(&self, id: &str, new_end_at: DateTime<Utc>) -> AppResult<ExtendOutcome> {
        let now = self.clock.now();
        let current = self.store.get(id).await?;

        if current.status != BookingStatus::Active {
            return Err(illegal(&current));
        }
        if now >= current.end_at {
            return Err(AppError::InvalidExtension(
                "the booking window has already ended".to_string(),
            ));
        }
        if current.pending_extension.is_some() {
            return Err(AppError::Conflict(
                "an extension is already awaiting authentication".to_string(),
            ));
        }

        let extension_hours = hours_between(current.end_at, new_end_at);
        if extension_hours < self.pricing.min_extension_hours
            || extension_hours > self.pricing.max_extension_hours
        {
            return Err(AppError::InvalidExtension(format!(
                "extension must be between {} and {} hours",
                self.pricing.min_extension_hours, self.pricing.max_extension_hours
            )));
        }

        let cost =
            pricing::extension_cost(&self.pricing, current.hourly_rate_cents, extension_hours);
        let amount_cents = cost.driver_total_cents;

        match self
            .gateway
            .charge_immediate(amount_cents, &current.payer_ref)
            .await?
        {
            ChargeOutcome::Charged { charge_ref } => {
                let booking = self
                    .apply_settled_extension(id, &current, new_end_at, amount_cents, &charge_ref)
                    .await?;
                Ok(ExtendOutcome::Completed {
                    booking,
                    charged_cents: amount_cents,
                })
            }
            ChargeOutcome::RequiresAuthentication {
                authorization_ref,
                challenge_ref,
            } => {
                let old_end = current.end_at;
                let authorization = authorization_ref.clone();
                let booking = self
                    .store
                    .conditional_update(id, BookingStatus::Active, &|b| {
                        if b.end_at != old_end || b.pending_extension.is_some() {
                            return Err(AppError::Conflict(
                                "booking changed while requesting the extension".to_string(),
                            ));
                        }
                        b.pending_extension = Some(PendingExtension {
                            new_end_at,
                            amount_cents,
                            authorization_ref: authorization.clone(),
                            requested_at: now,
                        });
                        b.updated_at = now;
                        Ok(())
                    })
                    .await?;

                tracing::info!(
                    booking_id = %id,
                    amount_cents,
                    "extension charge requires authentication"
                );
                Ok(ExtendOutcome::RequiresAuthentication {
                    booking,
                    authorization_ref,
                    challenge_ref,
                    amount_cents,
                })
            }
        }
    }

    /// Second half of the extension two-step. Fails without mutating when
    /// no matching authorize was recorded.
    pub async fn finalize_extension(
        &self,
        id: &str,
        authorization_ref: &str,
    ) -> AppResult<Booking> {
        let current = self.store.get(id).await?;

        let Some(pending) = current.pending_extension.clone() else {
            return Err(AppError::BadRequest(
                "no extension is awaiting finalization for this booking".to_string(),
            ));
        };
        if pending.authorization_ref != authorization_ref {
            return Err(AppError::BadRequest(
                "authorization does not match the pending extension".to_string(),
            ));
        }
        if current.status != BookingStatus::Active {
            return Err(illegal(&current));
        }

        self.gateway.confirm_pending(authorization_ref).await?;

        let booking = self
            .apply_settled_extension(
                id,
                &current,
                pending.new_end_at,
                pending.amount_cents,
                authorization_ref,
            )
            .await?;
        Ok(booking)
    }

    pub async fn modify(
        &self,
        id: &str,
        new_start_at: DateTime<Utc>,
        new_end_at: DateTime<Utc>,
    ) -> AppResult<ModifyOutcome> {
        let now = self.clock.now();
        let current = self.store.get(id).await?;

        if !is_held(&current) && current.status != BookingStatus::Active {
            return Err(illegal(&current));
        }
        if now >= current.start_at {
            return Err(AppError::BadRequest(
                "the booking has already started and can no longer be modified".to_string(),
            ));
        }
        if new_end_at <= new_start_at {
            return Err(AppError::InvalidWindow(
                "end time must be after start time".to_string(),
            ));
        }
        if current.pending_extension.is_some() {
            return Err(AppError::Conflict(
                "an extension is already awaiting authentication".to_string(),
            ));
        }

        let new_hours = hours_between(new_start_at, new_end_at);
        let quote = pricing::base_pricing(&self.pricing, current.hourly_rate_cents, new_hours);
        // The EV premium and settled extension charges carry over unchanged;
        // only the base window is repriced.
        let new_total_cents = quote.driver_total_cents
            + current.ev_charging_fee_cents
            + current.extension_charges_cents
            + current.overstay_charge_amount_cents;
        let delta_cents = new_total_cents - current.total_amount_cents;

        let mut charge_ref: Option<String> = None;
        if delta_cents > 0 {
            match self
                .gateway
                .charge_immediate(delta_cents, &current.payer_ref)
                .await?
            {
                ChargeOutcome::Charged { charge_ref: r } => charge_ref = Some(r),
                ChargeOutcome::RequiresAuthentication { .. } => {
                    return Err(AppError::PaymentCaptureFailed(
                        "the modification charge requires authentication; retry with a settled payment method".to_string(),
                    ));
                }
            }
        } else if delta_cents < 0 {
            self.gateway
                .refund(&current.payment_intent, -delta_cents)
                .await?;
        }

        let old_start = current.start_at;
        let old_end = current.end_at;
        let update = self
            .store
            .conditional_update(id, current.status, &|b| {
                if b.start_at != old_start || b.end_at != old_end {
                    return Err(AppError::Conflict(
                        "booking window changed while modifying".to_string(),
                    ));
                }
                b.start_at = new_start_at;
                b.end_at = new_end_at;
                b.total_hours = new_hours;
                b.subtotal_cents = quote.driver_subtotal_cents;
                b.platform_fee_cents = quote.service_fee_cents;
                b.total_amount_cents = new_total_cents;
                b.updated_at = now;
                Ok(())
            })
            .await;

        let booking = match update {
            Ok(booking) => booking,
            Err(store_error) => {
                self.compensate_settlement(&current, delta_cents, charge_ref.as_deref())
                    .await;
                return Err(store_error);
            }
        };

        tracing::info!(booking_id = %id, delta_cents, "booking window modified");
        self.notifier
            .notify(
                booking.party.notify_ref(),
                "booking_modified",
                json!({ "booking_id": id, "delta_cents": delta_cents }),
            )
            .await;

        Ok(ModifyOutcome {
            booking,
            delta_cents,
        })
    }

    pub async fn confirm_departure(&self, id: &str) -> AppResult<Booking> {
        let now = self.clock.now();
        let current = self.store.get(id).await?;

        if current.status != BookingStatus::Active {
            return Err(illegal(&current));
        }

        // Settle an open charging-mode episode exactly once, here.
        let final_overstay_cents = match (current.overstay_action, current.overstay_grace_end) {
            (Some(OverstayAction::Charging), Some(grace_end)) => overstay::accrual_cents(
                self.pricing.overstay_rate_cents_per_hour,
                grace_end,
                now,
            ),
            _ => current.overstay_charge_amount_cents,
        };

        let mut charge_ref: Option<String> = None;
        if final_overstay_cents > current.overstay_charge_amount_cents {
            let due = final_overstay_cents - current.overstay_charge_amount_cents;
            match self.gateway.charge_immediate(due, &current.payer_ref).await? {
                ChargeOutcome::Charged { charge_ref: r } => charge_ref = Some(r),
                ChargeOutcome::RequiresAuthentication { .. } => {
                    return Err(AppError::PaymentCaptureFailed(
                        "the overstay charge requires authentication".to_string(),
                    ));
                }
            }
        }

        let update = self
            .store
            .conditional_update(id, BookingStatus::Active, &|b| {
                let newly_settled = final_overstay_cents - b.overstay_charge_amount_cents;
                b.overstay_charge_amount_cents = final_overstay_cents;
                b.total_amount_cents += newly_settled;
                b.overstay_detected_at = None;
                b.overstay_grace_end = None;
                b.overstay_action = None;
                b.status = BookingStatus::Completed;
                b.updated_at = now;
                Ok(())
            })
            .await;

        let booking = match update {
            Ok(booking) => booking,
            Err(store_error) => {
                let charged = final_overstay_cents - current.overstay_charge_amount_cents;
                self.compensate_settlement(&current, charged, charge_ref.as_deref())
                    .await;
                return Err(store_error);
            }
        };

        tracing::info!(
            booking_id = %id,
            overstay_cents = final_overstay_cents,
            "departure confirmed"
        );
        self.notifier
            .notify(
                booking.party.notify_ref(),
                "booking_completed",
                json!({ "booking_id": id, "overstay_cents": final_overstay_cents }),
            )
            .await;
        Ok(booking)
    }

    /// Invoked by the external time-based monitor once the window has
    /// ended. Idempotent: re-detection of an open episode is a no-op.
    pub async fn detect_overstay(&self, id: &str) -> AppResult<Booking> {
        let now = self.clock.now();
        let current = self.store.get(id).await?;

        if current.status != BookingStatus::Active {
            return Err(illegal(&current));
        }
        if now <= current.end_at {
            return Err(AppError::BadRequest(
                "the booking window has not ended".to_string(),
            ));
        }
        if current.has_open_overstay() {
            return Ok(current);
        }

        let grace_end = now + Duration::minutes(self.pricing.overstay_grace_minutes);
        let booking = self
            .store
            .conditional_update(id, BookingStatus::Active, &|b| {
                if b.overstay_detected_at.is_none() {
                    b.overstay_detected_at = Some(now);
                    b.overstay_grace_end = Some(grace_end);
                    b.updated_at = now;
                }
                Ok(())
            })
            .await?;

        tracing::info!(booking_id = %id, grace_end = %grace_end, "overstay detected");
        self.notifier
            .notify(
                booking.party.notify_ref(),
                "overstay_detected",
                json!({ "booking_id": id, "grace_end": grace_end }),
            )
            .await;
        Ok(booking)
    }

    pub async fn set_overstay_action(
        &self,
        id: &str,
        action: OverstayAction,
    ) -> AppResult<Booking> {
        let now = self.clock.now();
        let current = self.store.get(id).await?;

        if current.status != BookingStatus::Active {
            return Err(illegal(&current));
        }
        let Some(grace_end) = current.overstay_grace_end else {
            return Err(AppError::BadRequest(
                "no overstay has been detected for this booking".to_string(),
            ));
        };
        if now < grace_end {
            return Err(AppError::BadRequest(
                "the overstay grace period has not elapsed".to_string(),
            ));
        }
        if current.overstay_action.is_some() {
            return Err(AppError::Conflict(
                "an overstay action is already in progress".to_string(),
            ));
        }

        let booking = self
            .store
            .conditional_update(id, BookingStatus::Active, &|b| {
                if b.overstay_action.is_some() {
                    return Err(AppError::Conflict(
                        "an overstay action is already in progress".to_string(),
                    ));
                }
                b.overstay_action = Some(action);
                b.updated_at = now;
                Ok(())
            })
            .await?;

        tracing::info!(booking_id = %id, action = action.as_str(), "overstay action set");
        if action == OverstayAction::Towing {
            // Tow dispatch is an external collaborator; the request itself
            // is the side effect here.
            self.notifier
                .notify(
                    &booking.spot_id,
                    "tow_requested",
                    json!({ "booking_id": id, "spot_id": booking.spot_id }),
                )
                .await;
        }
        Ok(booking)
    }

    pub async fn cancel_tow_request(&self, id: &str) -> AppResult<Booking> {
        let now = self.clock.now();
        let current = self.store.get(id).await?;

        if current.status != BookingStatus::Active {
            return Err(illegal(&current));
        }
        if current.overstay_action != Some(OverstayAction::Towing) {
            return Err(AppError::BadRequest(
                "no tow request is in progress for this booking".to_string(),
            ));
        }

        let booking = self
            .store
            .conditional_update(id, BookingStatus::Active, &|b| {
                if b.overstay_action != Some(OverstayAction::Towing) {
                    return Err(AppError::Conflict(
                        "the tow request is no longer in progress".to_string(),
                    ));
                }
                b.overstay_action = None;
                b.updated_at = now;
                Ok(())
            })
            .await?;

        tracing::info!(booking_id = %id, "tow request canceled");
        self.notifier
            .notify(
                &booking.spot_id,
                "tow_request_canceled",
                json!({ "booking_id": id }),
            )
            .await;
        Ok(booking)
    }

    fn require_held(&self, booking: &Booking) -> AppResult<()> {
        if is_held(booking) {
            Ok(())
        } else {
            Err(illegal(booking))
        }
    }

    async fn apply_settled_extension(
        &self,
        id: &str,
        loaded: &Booking,
        new_end_at: DateTime<Utc>,
        amount_cents: i64,
        charge_ref: &str,
    ) -> AppResult<Booking> {
        let now = self.clock.now();
        let old_end = loaded.end_at;

        let update = self
            .store
            .conditional_update(id, BookingStatus::Active, &|b| {
                if b.end_at != old_end {
                    return Err(AppError::Conflict(
                        "booking window changed while extending".to_string(),
                    ));
                }
                b.end_at = new_end_at;
                b.total_hours = hours_between(b.start_at, new_end_at);
                b.extension_charges_cents += amount_cents;
                b.total_amount_cents += amount_cents;
                b.pending_extension = None;
                b.updated_at = now;
                Ok(())
            })
            .await;

        let booking = match update {
            Ok(booking) => booking,
            Err(store_error) => {
                // The charge already settled; give it back rather than keep
                // money for an extension that was never applied.
                if let Err(refund_error) = self.gateway.refund(charge_ref, amount_cents).await {
                    tracing::error!(
                        booking_id = %id,
                        charge = %charge_ref,
                        error = %refund_error,
                        "could not refund orphaned extension charge"
                    );
                }
                return Err(store_error);
            }
        };

        tracing::info!(
            booking_id = %id,
            charged_cents = amount_cents,
            new_end_at = %new_end_at,
            "booking extended"
        );
        self.notifier
            .notify(
                booking.party.notify_ref(),
                "booking_extended",
                json!({ "booking_id": id, "charged_cents": amount_cents }),
            )
            .await;
        Ok(booking)
    }

    /// Best-effort undo of a settled charge or refund after the paired
    /// status write was lost.
    async fn compensate_settlement(
        &self,
        booking: &Booking,
        delta_cents: i64,
        charge_ref: Option<&str>,
    ) {
        if delta_cents > 0 {
            if let Some(charge_ref) = charge_ref {
                if let Err(error) = self.gateway.refund(charge_ref, delta_cents).await {
                    tracing::error!(
                        booking_id = %booking.id,
                        charge = %charge_ref,
                        error = %error,
                        "could not refund orphaned charge"
                    );
                }
            }
        } else if delta_cents < 0 {
            if let Err(error) = self
                .gateway
                .charge_immediate(-delta_cents, &booking.payer_ref)
                .await
            {
                tracing::error!(
                    booking_id = %booking.id,
                    error = %error,
                    "could not recover orphaned refund"
                );
            }
        }
    }

    async fn revert_claim(&self, id: &str, claimed: BookingStatus, snapshot: &Booking) {
        let result = self
            .store
            .conditional_update(id, claimed, &|b| {
                *b = snapshot.clone();
                Ok(())
            })
            .await;
        if let Err(error) = result {
            tracing::error!(
                booking_id = %id,
                error = %error,
                "could not revert claimed transition after gateway failure"
            );
        }
    }
}

fn is_held(booking: &Booking) -> bool {
    matches!(
        booking.status,
        BookingStatus::Pending | BookingStatus::Held
    )
}

fn illegal(booking: &Booking) -> AppError {
    AppError::IllegalTransition {
        status: booking.status.as_str().to_string(),
    }
}
