use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::model::{Booking, BookingStatus};

/// Mutation applied under the store's per-booking atomicity. Must be
/// synchronous: it runs while the row (or map entry) is exclusively held.
pub type MutateFn<'a> = &'a (dyn Fn(&mut Booking) -> AppResult<()> + Send + Sync);

/// Durable persistence for bookings. The compare-and-set in
/// [`conditional_update`](BookingStore::conditional_update) is the only
/// write path for existing rows: every status transition and every money
/// movement is serialized through it, so the engine can run as any number
/// of stateless instances.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: &Booking) -> AppResult<()>;

    async fn get(&self, id: &str) -> AppResult<Booking>;

    /// Atomically: load the booking, verify `status == expected`, apply the
    /// mutation, persist, return the updated booking. Returns
    /// `AppError::Conflict` when the status no longer matches (the caller
    /// lost an optimistic-concurrency race) and propagates any error the
    /// mutation itself raises, leaving the row unchanged.
    async fn conditional_update(
        &self,
        id: &str,
        expected: BookingStatus,
        mutate: MutateFn<'_>,
    ) -> AppResult<Booking>;

    /// Held bookings whose approval window has elapsed, i.e. created before
    /// `cutoff`. Drives the expiry scheduler.
    async fn list_held_created_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<String>>;

    /// Guest access path: resolve a booking by the SHA-1 hex of its access
    /// token.
    async fn find_by_guest_token_hash(&self, token_hash: &str) -> AppResult<Booking>;

    /// Resolve the booking holding a pending extension with this gateway
    /// authorization reference, for webhook-driven finalization.
    async fn find_by_pending_authorization(&self, authorization_ref: &str) -> AppResult<Booking>;
}
