use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::model::{Booking, BookingStatus};
use crate::repository::booking_store::{BookingStore, MutateFn};

/// Map-behind-a-lock store. Serves local development when no database is
/// configured, and every test. The single mutex gives the same
/// per-booking serialization the Postgres row lock provides.
#[derive(Default)]
pub struct MemoryBookingStore {
    bookings: Mutex<HashMap<String, Booking>>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn insert(&self, booking: &Booking) -> AppResult<()> {
        let mut bookings = self.bookings.lock().await;
        if bookings.contains_key(&booking.id) {
            return Err(AppError::Conflict(format!(
                "booking '{}' already exists",
                booking.id
            )));
        }
        bookings.insert(booking.id.clone(), booking.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> AppResult<Booking> {
        self.bookings
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("booking '{id}' not found")))
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: BookingStatus,
        mutate: MutateFn<'_>,
    ) -> AppResult<Booking> {
        let mut bookings = self.bookings.lock().await;
        let booking = bookings
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("booking '{id}' not found")))?;

        if booking.status != expected {
            return Err(AppError::Conflict(format!(
                "booking '{}' is '{}', expected '{}'",
                id,
                booking.status.as_str(),
                expected.as_str()
            )));
        }

        let mut candidate = booking.clone();
        mutate(&mut candidate)?;
        *booking = candidate.clone();
        Ok(candidate)
    }

    async fn list_held_created_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<String>> {
        let bookings = self.bookings.lock().await;
        Ok(bookings
            .values()
            .filter(|b| b.status == BookingStatus::Held && b.created_at < cutoff)
            .map(|b| b.id.clone())
            .collect())
    }

    async fn find_by_guest_token_hash(&self, token_hash: &str) -> AppResult<Booking> {
        let bookings = self.bookings.lock().await;
        bookings
            .values()
            .find(|b| b.guest_token_hash.as_deref() == Some(token_hash))
            .cloned()
            .ok_or_else(|| AppError::NotFound("no booking for this access token".to_string()))
    }

    async fn find_by_pending_authorization(&self, authorization_ref: &str) -> AppResult<Booking> {
        let bookings = self.bookings.lock().await;
        bookings
            .values()
            .find(|b| {
                b.pending_extension
                    .as_ref()
                    .is_some_and(|p| p.authorization_ref == authorization_ref)
            })
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound("no booking with a matching pending extension".to_string())
            })
    }
}
