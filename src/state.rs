use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::repository::{BookingStore, MemoryBookingStore, PgBookingStore};
use crate::services::booking_engine::BookingEngine;
use crate::services::notifications::{NoopNotifier, Notifier, WebhookNotifier};
use crate::services::payment_gateway::{PaymentGateway, SandboxGateway, StripeGateway};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn BookingStore>,
    pub clock: Arc<dyn Clock>,
    pub engine: Arc<BookingEngine>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub async fn build(config: AppConfig) -> AppResult<Self> {
        let http_client = reqwest::Client::new();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store: Arc<dyn BookingStore> = match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.db_pool_max_connections)
                    .acquire_timeout(Duration::from_secs(
                        config.db_pool_acquire_timeout_seconds,
                    ))
                    .connect_lazy(url)
                    .map_err(|e| {
                        crate::error::AppError::Dependency(format!(
                            "invalid DATABASE_URL: {e}"
                        ))
                    })?;
                Arc::new(PgBookingStore::connect(pool).await?)
            }
            None => {
                tracing::warn!(
                    "DATABASE_URL is not set — using the in-memory booking store (state is lost on restart)"
                );
                Arc::new(MemoryBookingStore::new())
            }
        };

        let gateway: Arc<dyn PaymentGateway> = match &config.stripe_secret_key {
            Some(secret_key) => Arc::new(StripeGateway::new(
                http_client.clone(),
                secret_key.clone(),
            )),
            None if !config.is_production() => {
                tracing::warn!(
                    "STRIPE_SECRET_KEY is not set — using the sandbox gateway (no real charges)"
                );
                Arc::new(SandboxGateway)
            }
            None => {
                return Err(crate::error::AppError::Dependency(
                    "STRIPE_SECRET_KEY must be set in production".to_string(),
                ))
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
            Some(endpoint) => Arc::new(WebhookNotifier::new(
                http_client.clone(),
                endpoint.clone(),
            )),
            None => Arc::new(NoopNotifier),
        };

        let engine = Arc::new(BookingEngine::new(
            store.clone(),
            gateway,
            notifier,
            clock.clone(),
            config.pricing,
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            clock,
            engine,
            http_client,
        })
    }
}
