//! Persistence seam for the booking core.
//!
//! A [`Store`] hands out units of work ([`StoreTx`]). Every read and write a
//! core operation performs goes through one `StoreTx`, so a reservation or a
//! reconciliation either lands completely or not at all. Dropping a `StoreTx`
//! without calling [`StoreTx::commit`] discards its writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BookingError;
use crate::models::{
    BookingEvent, BookingKeys, BookingStatus, Movie, NewBooking, NewPayment, NewShowtime,
    Payment, PaymentStatus, Seat, SeatBooking, Showtime, Studio,
};

pub mod memory;
pub mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Raised by the in-memory store's fault injection.
    #[error("injected failure at {0}")]
    Injected(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
    // --- catalogue lookups ---
    async fn find_movie(&mut self, id: Uuid) -> StoreResult<Option<Movie>>;
    async fn find_studio(&mut self, id: Uuid) -> StoreResult<Option<Studio>>;
    /// Locks the studio row; scheduling in one studio is serialised on it so
    /// two overlapping showtimes cannot both pass the conflict check.
    async fn lock_studio(&mut self, id: Uuid) -> StoreResult<Option<Studio>>;
    async fn find_showtime(&mut self, id: Uuid) -> StoreResult<Option<Showtime>>;
    /// Every showtime, earliest first.
    async fn list_showtimes(&mut self) -> StoreResult<Vec<Showtime>>;

    /// Showtimes of `studio_id` whose closed interval `[show_start, show_end]`
    /// intersects the closed interval `[start, end]`.
    async fn showtimes_touching(
        &mut self,
        studio_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Showtime>>;

    async fn insert_showtime(&mut self, showtime: &NewShowtime) -> StoreResult<Uuid>;

    // --- seats ---
    async fn list_seats(&mut self, studio_id: Uuid) -> StoreResult<Vec<Seat>>;
    async fn find_seat(&mut self, id: Uuid) -> StoreResult<Option<Seat>>;

    /// Reads the seat only if it is still available and keeps it locked for
    /// the rest of the transaction.
    async fn lock_available_seat(&mut self, id: Uuid) -> StoreResult<Option<Seat>>;

    /// Returns `false` when no such seat exists.
    async fn set_seat_available(&mut self, id: Uuid, available: bool) -> StoreResult<bool>;

    // --- bookings ---
    /// Inserts the booking (status `Pending`) and its seat-detail row.
    async fn insert_booking(&mut self, booking: &NewBooking) -> StoreResult<BookingKeys>;
    async fn find_booking(&mut self, id: Uuid) -> StoreResult<Option<SeatBooking>>;
    async fn lock_booking(&mut self, id: Uuid) -> StoreResult<Option<SeatBooking>>;
    async fn list_bookings_for_user(&mut self, user_id: Uuid) -> StoreResult<Vec<SeatBooking>>;

    /// Pending bookings of the user that no payment covers yet, locked.
    async fn unclaimed_pending_bookings(
        &mut self,
        user_id: Uuid,
    ) -> StoreResult<Vec<SeatBooking>>;

    async fn set_booking_status(&mut self, id: Uuid, status: BookingStatus)
        -> StoreResult<bool>;

    /// Payment currently covering the booking, if any.
    async fn payment_for_booking(&mut self, booking_id: Uuid) -> StoreResult<Option<Uuid>>;

    /// Deletes the booking and its seat detail; returns the seat it held.
    async fn delete_booking(&mut self, id: Uuid) -> StoreResult<Option<Uuid>>;

    // --- payments ---
    /// Inserts the payment and marks `payment.booking_ids` as covered by it.
    async fn insert_payment(&mut self, payment: &NewPayment) -> StoreResult<Payment>;
    async fn find_payment(&mut self, id: Uuid) -> StoreResult<Option<Payment>>;
    async fn list_payments_for_user(&mut self, user_id: Uuid) -> StoreResult<Vec<Payment>>;
    async fn lock_payment(&mut self, id: Uuid) -> StoreResult<Option<Payment>>;
    async fn payment_bookings(&mut self, payment_id: Uuid) -> StoreResult<Vec<SeatBooking>>;
    async fn set_payment_status(&mut self, id: Uuid, status: PaymentStatus)
        -> StoreResult<bool>;

    /// Deletes the payment; bookings it covered become unclaimed.
    async fn delete_payment(&mut self, id: Uuid) -> StoreResult<bool>;

    // --- audit ---
    async fn append_event(&mut self, event: &BookingEvent) -> StoreResult<()>;
    async fn booking_events(&mut self, booking_id: Uuid) -> StoreResult<Vec<BookingEvent>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Single exit point of a unit of work: commit on success, roll back on any
/// error. A failed rollback is logged, the original error is returned.
pub async fn commit_or_rollback<T>(
    tx: Box<dyn StoreTx>,
    result: Result<T, BookingError>,
) -> Result<T, BookingError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
