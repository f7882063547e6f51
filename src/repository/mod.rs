pub mod booking_store;
pub mod memory;
pub mod postgres;

pub use booking_store::{BookingStore, MutateFn};
pub use memory::MemoryBookingStore;
pub use postgres::PgBookingStore;
