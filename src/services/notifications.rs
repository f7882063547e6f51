use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Fire-and-forget notification delivery. Failures are logged and swallowed;
/// a notification must never block or fail a booking transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, event: &str, payload: Value);
}

/// Posts notification events to a downstream delivery service (push/email
/// fan-out lives there, not here).
pub struct WebhookNotifier {
    http_client: Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(http_client: Client, endpoint: String) -> Self {
        Self {
            http_client,
            endpoint,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, recipient: &str, event: &str, payload: Value) {
        let body = json!({
            "recipient": recipient,
            "event": event,
            "payload": payload,
        });

        let result = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(
                    event,
                    recipient,
                    status = %response.status(),
                    "notification delivery rejected"
                );
            }
            Err(error) => {
                tracing::warn!(event, recipient, error = %error, "notification delivery failed");
            }
            Ok(_) => {}
        }
    }
}

/// Used when no delivery endpoint is configured, and by tests.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, recipient: &str, event: &str, _payload: Value) {
        tracing::debug!(event, recipient, "notification suppressed (no endpoint configured)");
    }
}
