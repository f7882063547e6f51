use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Result of an immediate charge. Gateways may demand a step-up
/// authentication (3-D Secure); the caller then holds the booking unchanged
/// until the matching confirmation arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Charged {
        charge_ref: String,
    },
    RequiresAuthentication {
        authorization_ref: String,
        challenge_ref: String,
    },
}

/// Payment operations on a booking's intent. Authorize holds funds, capture
/// converts the hold into a charge, release cancels the hold, refund
/// returns captured money.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(&self, amount_cents: i64, payer_ref: &str) -> AppResult<String>;
    async fn capture(&self, intent_ref: &str) -> AppResult<()>;
    async fn release(&self, intent_ref: &str) -> AppResult<()>;
    async fn refund(&self, intent_ref: &str, amount_cents: i64) -> AppResult<()>;
    async fn charge_immediate(&self, amount_cents: i64, payer_ref: &str)
        -> AppResult<ChargeOutcome>;
    /// Confirm a previously authenticated step-up charge.
    async fn confirm_pending(&self, authorization_ref: &str) -> AppResult<()>;
}

/// Stripe payment-intents implementation.
pub struct StripeGateway {
    http_client: Client,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(http_client: Client, secret_key: String) -> Self {
        Self {
            http_client,
            secret_key,
        }
    }

    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> AppResult<Value> {
        let response = self
            .http_client
            .post(format!("https://api.stripe.com/v1/{path}"))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, path, "Stripe API request failed");
                AppError::Dependency("Stripe API request failed.".to_string())
            })?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or(json!({"error": "failed to parse response"}));

        if status.is_success() {
            Ok(body)
        } else {
            let message = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown Stripe error");
            Err(AppError::Dependency(format!(
                "Stripe API error ({status}): {message}"
            )))
        }
    }
}

fn intent_id(body: &Value) -> AppResult<String> {
    body.get("id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::Dependency("Stripe response missing intent id.".to_string()))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn authorize(&self, amount_cents: i64, payer_ref: &str) -> AppResult<String> {
        let body = self
            .post_form(
                "payment_intents",
                &[
                    ("amount", amount_cents.to_string()),
                    ("currency", "usd".to_string()),
                    ("payment_method", payer_ref.to_string()),
                    ("capture_method", "manual".to_string()),
                    ("confirm", "true".to_string()),
                ],
            )
            .await
            .map_err(|e| AppError::PaymentAuthorizationFailed(e.to_string()))?;
        intent_id(&body)
    }

    async fn capture(&self, intent_ref: &str) -> AppResult<()> {
        self.post_form(&format!("payment_intents/{intent_ref}/capture"), &[])
            .await
            .map_err(|e| AppError::PaymentCaptureFailed(e.to_string()))?;
        Ok(())
    }

    async fn release(&self, intent_ref: &str) -> AppResult<()> {
        self.post_form(&format!("payment_intents/{intent_ref}/cancel"), &[])
            .await?;
        Ok(())
    }

    async fn refund(&self, intent_ref: &str, amount_cents: i64) -> AppResult<()> {
        self.post_form(
            "refunds",
            &[
                ("payment_intent", intent_ref.to_string()),
                ("amount", amount_cents.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn charge_immediate(
        &self,
        amount_cents: i64,
        payer_ref: &str,
    ) -> AppResult<ChargeOutcome> {
        let body = self
            .post_form(
                "payment_intents",
                &[
                    ("amount", amount_cents.to_string()),
                    ("currency", "usd".to_string()),
                    ("payment_method", payer_ref.to_string()),
                    ("confirm", "true".to_string()),
                ],
            )
            .await
            .map_err(|e| AppError::PaymentCaptureFailed(e.to_string()))?;

        let id = intent_id(&body)?;
        let status = body.get("status").and_then(Value::as_str).unwrap_or("");
        if status == "requires_action" {
            let challenge_ref = body
                .get("client_secret")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(ChargeOutcome::RequiresAuthentication {
                authorization_ref: id,
                challenge_ref,
            });
        }
        Ok(ChargeOutcome::Charged { charge_ref: id })
    }

    async fn confirm_pending(&self, authorization_ref: &str) -> AppResult<()> {
        let body = self
            .post_form(&format!("payment_intents/{authorization_ref}/confirm"), &[])
            .await
            .map_err(|e| AppError::PaymentCaptureFailed(e.to_string()))?;
        let status = body.get("status").and_then(Value::as_str).unwrap_or("");
        if status == "succeeded" || status == "requires_capture" {
            Ok(())
        } else {
            Err(AppError::PaymentCaptureFailed(format!(
                "intent '{authorization_ref}' is '{status}' after confirmation"
            )))
        }
    }
}

/// Approves everything without talking to any processor. Stands in for the
/// real gateway in non-production environments with no Stripe key
/// configured.
#[derive(Debug, Default)]
pub struct SandboxGateway;

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn authorize(&self, amount_cents: i64, payer_ref: &str) -> AppResult<String> {
        let intent_ref = format!("sandbox_{}", uuid::Uuid::new_v4());
        tracing::debug!(amount_cents, payer_ref, intent = %intent_ref, "sandbox authorize");
        Ok(intent_ref)
    }

    async fn capture(&self, intent_ref: &str) -> AppResult<()> {
        tracing::debug!(intent = %intent_ref, "sandbox capture");
        Ok(())
    }

    async fn release(&self, intent_ref: &str) -> AppResult<()> {
        tracing::debug!(intent = %intent_ref, "sandbox release");
        Ok(())
    }

    async fn refund(&self, intent_ref: &str, amount_cents: i64) -> AppResult<()> {
        tracing::debug!(intent = %intent_ref, amount_cents, "sandbox refund");
        Ok(())
    }

    async fn charge_immediate(
        &self,
        amount_cents: i64,
        payer_ref: &str,
    ) -> AppResult<ChargeOutcome> {
        let charge_ref = format!("sandbox_{}", uuid::Uuid::new_v4());
        tracing::debug!(amount_cents, payer_ref, charge = %charge_ref, "sandbox charge");
        Ok(ChargeOutcome::Charged { charge_ref })
    }

    async fn confirm_pending(&self, authorization_ref: &str) -> AppResult<()> {
        tracing::debug!(intent = %authorization_ref, "sandbox confirm");
        Ok(())
    }
}

/// Verify a Stripe webhook signature using HMAC-SHA256.
///
/// Parses the `Stripe-Signature` header (format: `t=<timestamp>,v1=<sig>`),
/// constructs the signed payload `<timestamp>.<body>`, computes HMAC-SHA256
/// with the webhook secret, and uses constant-time comparison.
/// Rejects signatures older than 5 minutes to prevent replay attacks.
pub fn verify_webhook_signature(
    payload: &str,
    signature_header: &str,
    webhook_secret: &str,
    now: DateTime<Utc>,
) -> bool {
    const TOLERANCE_SECS: i64 = 300; // 5 minutes

    let mut timestamp: Option<&str> = None;
    let mut signature: Option<&str> = None;

    for part in signature_header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v1) = part.strip_prefix("v1=") {
            signature = Some(v1);
        }
    }

    let (Some(ts_str), Some(expected_hex)) = (timestamp, signature) else {
        return false;
    };

    let Ok(ts) = ts_str.parse::<i64>() else {
        return false;
    };

    if (now.timestamp() - ts).abs() > TOLERANCE_SECS {
        tracing::warn!(
            "webhook signature too old: delta={}s",
            (now.timestamp() - ts).abs()
        );
        return false;
    }

    let signed_payload = format!("{ts_str}.{payload}");

    let Ok(mut mac) = HmacSha256::new_from_slice(webhook_secret.as_bytes()) else {
        return false;
    };
    mac.update(signed_payload.as_bytes());

    let Ok(expected_bytes) = hex_decode(expected_hex) else {
        return false;
    };

    mac.verify_slice(&expected_bytes).is_ok()
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}
