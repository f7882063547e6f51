use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::error::{AppError, AppResult};
use crate::model::{Booking, BookingStatus};
use crate::repository::booking_store::{BookingStore, MutateFn};

/// Postgres store. The booking document lives in a JSONB column so the
/// entity round-trips through serde; the columns the store filters on
/// (status, created_at, the two lookup refs) are projected out alongside it
/// and rewritten on every update.
pub struct PgBookingStore {
    pool: PgPool,
}

const ENSURE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bookings (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    guest_token_hash TEXT,
    pending_authorization_ref TEXT,
    data JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS bookings_status_created_at_idx ON bookings (status, created_at);
CREATE INDEX IF NOT EXISTS bookings_guest_token_hash_idx ON bookings (guest_token_hash);
CREATE INDEX IF NOT EXISTS bookings_pending_authorization_idx ON bookings (pending_authorization_ref);
"#;

impl PgBookingStore {
    /// Wraps the pool and ensures the single bookings table exists, so the
    /// service runs against a fresh database without a migration step.
    pub async fn connect(pool: PgPool) -> AppResult<Self> {
        for statement in ENSURE_SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(map_db_error)?;
        }
        Ok(Self { pool })
    }

    fn encode(booking: &Booking) -> AppResult<Value> {
        serde_json::to_value(booking)
            .map_err(|e| AppError::Internal(format!("could not serialize booking: {e}")))
    }

    fn decode(data: Value) -> AppResult<Booking> {
        serde_json::from_value(data)
            .map_err(|e| AppError::Internal(format!("could not deserialize booking row: {e}")))
    }

    fn pending_ref(booking: &Booking) -> Option<&str> {
        booking
            .pending_extension
            .as_ref()
            .map(|p| p.authorization_ref.as_str())
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn insert(&self, booking: &Booking) -> AppResult<()> {
        let data = Self::encode(booking)?;
        sqlx::query(
            "INSERT INTO bookings (id, status, created_at, guest_token_hash, pending_authorization_ref, data) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&booking.id)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .bind(booking.guest_token_hash.as_deref())
        .bind(Self::pending_ref(booking))
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> AppResult<Booking> {
        let row = sqlx::query("SELECT data FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| AppError::NotFound(format!("booking '{id}' not found")))?;
        Self::decode(row.try_get("data").map_err(map_db_error)?)
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: BookingStatus,
        mutate: MutateFn<'_>,
    ) -> AppResult<Booking> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        let row = sqlx::query("SELECT data FROM bookings WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| AppError::NotFound(format!("booking '{id}' not found")))?;

        let mut booking = Self::decode(row.try_get("data").map_err(map_db_error)?)?;
        if booking.status != expected {
            // Dropping the transaction releases the row lock.
            return Err(AppError::Conflict(format!(
                "booking '{}' is '{}', expected '{}'",
                id,
                booking.status.as_str(),
                expected.as_str()
            )));
        }

        mutate(&mut booking)?;

        let data = Self::encode(&booking)?;
        sqlx::query(
            "UPDATE bookings \
             SET status = $2, guest_token_hash = $3, pending_authorization_ref = $4, data = $5 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(booking.status.as_str())
        .bind(booking.guest_token_hash.as_deref())
        .bind(Self::pending_ref(&booking))
        .bind(&data)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)?;
        Ok(booking)
    }

    async fn list_held_created_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT id FROM bookings WHERE status = $1 AND created_at < $2 ORDER BY created_at ASC LIMIT 500",
        )
        .bind(BookingStatus::Held.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("id").map_err(map_db_error))
            .collect()
    }

    async fn find_by_guest_token_hash(&self, token_hash: &str) -> AppResult<Booking> {
        let row = sqlx::query("SELECT data FROM bookings WHERE guest_token_hash = $1 LIMIT 1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| AppError::NotFound("no booking for this access token".to_string()))?;
        Self::decode(row.try_get("data").map_err(map_db_error)?)
    }

    async fn find_by_pending_authorization(&self, authorization_ref: &str) -> AppResult<Booking> {
        let row =
            sqlx::query("SELECT data FROM bookings WHERE pending_authorization_ref = $1 LIMIT 1")
                .bind(authorization_ref)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_error)?
                .ok_or_else(|| {
                    AppError::NotFound("no booking with a matching pending extension".to_string())
                })?;
        Self::decode(row.try_get("data").map_err(map_db_error)?)
    }
}

fn map_db_error<E: std::fmt::Display>(error: E) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}
