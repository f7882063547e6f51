//! Driver-facing pricing. Pure functions over [`PricingConfig`]; all money
//! is integer cents, rounded half-up, so the same inputs always produce the
//! same charge no matter which call site computes it.

use crate::config::PricingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub driver_subtotal_cents: i64,
    pub service_fee_cents: i64,
    pub driver_total_cents: i64,
}

/// Half-up rounding to whole cents. Inputs here are non-negative, so
/// `f64::round` (ties away from zero) is exactly half-up.
fn round_cents(amount: f64) -> i64 {
    amount.round() as i64
}

/// The driver-facing hourly rate: host base rate plus the configured markup.
pub fn driver_hourly_rate_cents(pricing: &PricingConfig, host_rate_cents: i64) -> i64 {
    round_cents(host_rate_cents as f64 * (1.0 + pricing.driver_markup_rate))
}

/// Subtotal, service fee, and total for a stay of `hours` at the host's
/// base rate. The fee is computed on the already-rounded subtotal so that
/// `total == subtotal + fee` holds exactly in cents.
pub fn base_pricing(pricing: &PricingConfig, host_rate_cents: i64, hours: f64) -> Quote {
    let driver_subtotal_cents = round_cents(
        host_rate_cents as f64 * (1.0 + pricing.driver_markup_rate) * hours,
    );
    let service_fee_cents = round_cents(driver_subtotal_cents as f64 * pricing.service_fee_rate);
    Quote {
        driver_subtotal_cents,
        service_fee_cents,
        driver_total_cents: driver_subtotal_cents + service_fee_cents,
    }
}

/// Cost of extending a stay, applied to the incremental hours only.
pub fn extension_cost(pricing: &PricingConfig, host_rate_cents: i64, extension_hours: f64) -> Quote {
    base_pricing(pricing, host_rate_cents, extension_hours)
}

/// Signed difference between the price of the new duration and what was
/// already charged. Positive means charge, negative means refund.
pub fn modification_delta(
    pricing: &PricingConfig,
    host_rate_cents: i64,
    new_hours: f64,
    already_charged_cents: i64,
) -> i64 {
    base_pricing(pricing, host_rate_cents, new_hours).driver_total_cents - already_charged_cents
}

/// Flat EV-charging premium, applied over the whole booked window at
/// creation time only.
pub fn ev_charging_fee_cents(ev_rate_cents_per_hour: i64, hours: f64) -> i64 {
    round_cents(ev_rate_cents_per_hour as f64 * hours)
}
