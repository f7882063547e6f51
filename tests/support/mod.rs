use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use curbside_backend_rs::clock::{Clock, ManualClock};
use curbside_backend_rs::config::PricingConfig;
use curbside_backend_rs::error::{AppError, AppResult};
use curbside_backend_rs::model::Party;
use curbside_backend_rs::repository::{BookingStore, MemoryBookingStore};
use curbside_backend_rs::services::booking_engine::{BookingEngine, CreateBookingRequest};
use curbside_backend_rs::services::notifications::NoopNotifier;
use curbside_backend_rs::services::payment_gateway::{ChargeOutcome, PaymentGateway};

/// Every gateway interaction, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Authorize { amount_cents: i64 },
    Capture { intent_ref: String },
    Release { intent_ref: String },
    Refund { intent_ref: String, amount_cents: i64 },
    Charge { amount_cents: i64 },
    Confirm { authorization_ref: String },
}

/// Scripted in-process gateway: records calls and can be told to decline
/// authorizations, fail captures, or demand step-up authentication.
#[derive(Default)]
pub struct MockGateway {
    calls: Mutex<Vec<GatewayCall>>,
    counter: AtomicU64,
    pub decline_authorize: AtomicBool,
    pub fail_capture: AtomicBool,
    pub require_authentication: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn release_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| matches!(call, GatewayCall::Release { .. }))
            .count()
    }

    pub fn refund_total_cents(&self) -> i64 {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Refund { amount_cents, .. } => Some(*amount_cents),
                _ => None,
            })
            .sum()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_ref(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn authorize(&self, amount_cents: i64, _payer_ref: &str) -> AppResult<String> {
        if self.decline_authorize.load(Ordering::SeqCst) {
            return Err(AppError::PaymentAuthorizationFailed(
                "card declined".to_string(),
            ));
        }
        self.record(GatewayCall::Authorize { amount_cents });
        Ok(self.next_ref("pi"))
    }

    async fn capture(&self, intent_ref: &str) -> AppResult<()> {
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(AppError::PaymentCaptureFailed(
                "capture rejected".to_string(),
            ));
        }
        self.record(GatewayCall::Capture {
            intent_ref: intent_ref.to_string(),
        });
        Ok(())
    }

    async fn release(&self, intent_ref: &str) -> AppResult<()> {
        self.record(GatewayCall::Release {
            intent_ref: intent_ref.to_string(),
        });
        Ok(())
    }

    async fn refund(&self, intent_ref: &str, amount_cents: i64) -> AppResult<()> {
        self.record(GatewayCall::Refund {
            intent_ref: intent_ref.to_string(),
            amount_cents,
        });
        Ok(())
    }

    async fn charge_immediate(
        &self,
        amount_cents: i64,
        _payer_ref: &str,
    ) -> AppResult<ChargeOutcome> {
        if self.require_authentication.load(Ordering::SeqCst) {
            return Ok(ChargeOutcome::RequiresAuthentication {
                authorization_ref: self.next_ref("pi_auth"),
                challenge_ref: self.next_ref("challenge"),
            });
        }
        self.record(GatewayCall::Charge { amount_cents });
        Ok(ChargeOutcome::Charged {
            charge_ref: self.next_ref("ch"),
        })
    }

    async fn confirm_pending(&self, authorization_ref: &str) -> AppResult<()> {
        self.record(GatewayCall::Confirm {
            authorization_ref: authorization_ref.to_string(),
        });
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<BookingEngine>,
    pub store: Arc<MemoryBookingStore>,
    pub gateway: Arc<MockGateway>,
    pub clock: Arc<ManualClock>,
}

/// A fixed, arbitrary "wall clock zero" for scenarios.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryBookingStore::new());
    let gateway = Arc::new(MockGateway::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = Arc::new(BookingEngine::new(
        store.clone() as Arc<dyn BookingStore>,
        gateway.clone() as Arc<dyn PaymentGateway>,
        Arc::new(NoopNotifier),
        clock.clone() as Arc<dyn Clock>,
        PricingConfig::default(),
    ));
    Harness {
        engine,
        store,
        gateway,
        clock,
    }
}

/// A $10.00/h booking starting two hours from the harness clock, four hours
/// long.
pub fn request(instant_book: bool) -> CreateBookingRequest {
    CreateBookingRequest {
        spot_id: "spot-42".to_string(),
        instant_book,
        hourly_rate_cents: 1000,
        ev_rate_cents_per_hour: None,
        start_at: t0() + Duration::hours(2),
        end_at: t0() + Duration::hours(6),
        party: Party::Renter {
            user_id: "renter-1".to_string(),
        },
        payer_ref: "pm_card".to_string(),
    }
}
