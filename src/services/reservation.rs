//! Reservation Coordinator.
//!
//! `reserve` runs showtime lookup, the locked availability read, the booking
//! insert, the seat flip and the audit entry as one transaction, behind a
//! per-seat lease. `release` is its inverse for a booking that was never paid.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::within;
use crate::error::BookingError;
use crate::locks::SeatLocks;
use crate::models::{
    BookingEvent, BookingEventKind, BookingKeys, BookingStatus, NewBooking, Seat, SeatBooking,
};
use crate::store::{commit_or_rollback, Store, StoreError, StoreTx};

pub struct ReservationCoordinator {
    store: Arc<dyn Store>,
    locks: Arc<dyn SeatLocks>,
    tx_timeout: Duration,
}

impl ReservationCoordinator {
    pub fn new(store: Arc<dyn Store>, locks: Arc<dyn SeatLocks>, tx_timeout: Duration) -> Self {
        Self {
            store,
            locks,
            tx_timeout,
        }
    }

    /// Books `seat_id` for `showtime_id` on behalf of `user_id`.
    ///
    /// Fails with `SeatUnavailable` when the seat is taken or does not exist,
    /// and with `SeatBusy` when another request held the seat for longer than
    /// the lease wait.
    pub async fn reserve(
        &self,
        user_id: Uuid,
        showtime_id: Uuid,
        seat_id: Uuid,
    ) -> Result<BookingKeys, BookingError> {
        if showtime_id.is_nil() || seat_id.is_nil() {
            return Err(BookingError::Validation(
                "showtime_id and seat_id are required".to_string(),
            ));
        }

        let lease = self.locks.acquire(seat_id).await?;
        let result = within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result = reserve_in(tx.as_mut(), user_id, showtime_id, seat_id).await;
            commit_or_rollback(tx, result).await
        })
        .await;
        self.locks.release(lease).await;

        match &result {
            Ok(keys) => info!(
                booking_id = %keys.booking_id,
                %showtime_id,
                %seat_id,
                %user_id,
                "seat reserved"
            ),
            Err(e) => debug!(%showtime_id, %seat_id, %user_id, error = %e, "reservation refused"),
        }
        result
    }

    /// Deletes an unpaid booking of `user_id` and frees its seat. An open
    /// payment covering the booking is dropped as well; its other bookings
    /// go back to waiting for an order.
    pub async fn release(&self, user_id: Uuid, booking_id: Uuid) -> Result<(), BookingError> {
        let mut attempt = 1;
        let seat_id = loop {
            let released = within(self.tx_timeout, async {
                let mut tx = self.store.begin().await?;
                let result = release_in(tx.as_mut(), user_id, booking_id).await;
                match result {
                    Ok(Released::Seat(seat_id)) => {
                        commit_or_rollback(tx, Ok(seat_id)).await.map(Some)
                    }
                    Ok(Released::Raced) => {
                        tx.rollback().await?;
                        Ok(None)
                    }
                    Err(err) => commit_or_rollback(tx, Err(err)).await,
                }
            })
            .await?;

            match released {
                Some(seat_id) => break seat_id,
                None if attempt < RELEASE_ATTEMPTS => {
                    debug!(%booking_id, attempt, "booking claimed by an order mid-release, retrying");
                    attempt += 1;
                }
                None => return Err(BookingError::BookingContended(booking_id)),
            }
        };

        info!(%booking_id, %seat_id, %user_id, "booking released by owner");
        Ok(())
    }

    pub async fn find_booking(
        &self,
        user_id: Uuid,
        booking_id: Uuid,
    ) -> Result<SeatBooking, BookingError> {
        within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result: Result<_, BookingError> = async {
                let booking = tx
                    .find_booking(booking_id)
                    .await?
                    .ok_or(BookingError::BookingNotFound(booking_id))?;
                if booking.user_id != user_id {
                    return Err(BookingError::Forbidden);
                }
                Ok(booking)
            }
            .await;
            commit_or_rollback(tx, result).await
        })
        .await
    }

    pub async fn list_bookings(&self, user_id: Uuid) -> Result<Vec<SeatBooking>, BookingError> {
        within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result = tx
                .list_bookings_for_user(user_id)
                .await
                .map_err(BookingError::from);
            commit_or_rollback(tx, result).await
        })
        .await
    }

    /// Audit trail of one booking, oldest first. Still readable after the
    /// booking itself was deleted.
    pub async fn booking_history(
        &self,
        user_id: Uuid,
        booking_id: Uuid,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result: Result<_, BookingError> = async {
                let events = tx.booking_events(booking_id).await?;
                match events.first() {
                    None => Err(BookingError::BookingNotFound(booking_id)),
                    Some(first) if first.user_id != user_id => Err(BookingError::Forbidden),
                    Some(_) => Ok(events),
                }
            }
            .await;
            commit_or_rollback(tx, result).await
        })
        .await
    }

    /// Seats of a studio with their availability flags.
    pub async fn list_seats(&self, studio_id: Uuid) -> Result<Vec<Seat>, BookingError> {
        within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result: Result<_, BookingError> = async {
                tx.find_studio(studio_id)
                    .await?
                    .ok_or(BookingError::StudioNotFound(studio_id))?;
                Ok(tx.list_seats(studio_id).await?)
            }
            .await;
            commit_or_rollback(tx, result).await
        })
        .await
    }
}

async fn reserve_in(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
    showtime_id: Uuid,
    seat_id: Uuid,
) -> Result<BookingKeys, BookingError> {
    let showtime = tx
        .find_showtime(showtime_id)
        .await?
        .ok_or(BookingError::ShowtimeNotFound(showtime_id))?;

    // the availability predicate is part of the locked read: a concurrent
    // transaction that already flipped the seat makes this return nothing
    let seat = tx
        .lock_available_seat(seat_id)
        .await?
        .ok_or(BookingError::SeatUnavailable(seat_id))?;

    if seat.studio_id != showtime.studio_id {
        return Err(BookingError::SeatNotInStudio {
            seat_id,
            studio_id: showtime.studio_id,
        });
    }

    let keys = tx
        .insert_booking(&NewBooking {
            user_id,
            showtime_id,
            seat_id,
        })
        .await?;

    if !tx.set_seat_available(seat_id, false).await? {
        return Err(StoreError::Corrupt(format!("seat {} vanished mid-reservation", seat_id)).into());
    }

    tx.append_event(&BookingEvent::new(
        BookingEventKind::Reserved,
        keys.booking_id,
        seat_id,
        user_id,
    ))
    .await?;

    Ok(keys)
}

/// Retries of a release that lost the race against a new payment order.
const RELEASE_ATTEMPTS: u32 = 3;

enum Released {
    Seat(Uuid),
    /// A payment claimed the booking after its lock order was chosen. The
    /// transaction holds the booking lock and must not take the payment
    /// lock now; it is rolled back and retried.
    Raced,
}

async fn release_in(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
    booking_id: Uuid,
) -> Result<Released, BookingError> {
    // payment before booking, the same order the reconciler locks in
    let open_payment = tx.payment_for_booking(booking_id).await?;
    if let Some(payment_id) = open_payment {
        tx.lock_payment(payment_id).await?;
    }

    let booking = tx
        .lock_booking(booking_id)
        .await?
        .ok_or(BookingError::BookingNotFound(booking_id))?;
    if booking.user_id != user_id {
        return Err(BookingError::Forbidden);
    }
    if booking.status != BookingStatus::Pending {
        return Err(BookingError::BookingAlreadyPaid(booking_id));
    }

    // an order may have claimed the booking between the two reads
    if tx.payment_for_booking(booking_id).await? != open_payment {
        return Ok(Released::Raced);
    }

    // an order that still counts this seat can no longer be paid as priced
    if let Some(payment_id) = open_payment {
        tx.delete_payment(payment_id).await?;
        debug!(%payment_id, %booking_id, "open payment dropped with released booking");
    }

    let seat_id = tx
        .delete_booking(booking_id)
        .await?
        .ok_or_else(|| StoreError::Corrupt(format!("booking {} has no seat detail", booking_id)))?;
    tx.set_seat_available(seat_id, true).await?;

    let mut event = BookingEvent::new(BookingEventKind::Cancelled, booking_id, seat_id, user_id);
    if let Some(payment_id) = open_payment {
        event = event.with_payment(payment_id);
    }
    tx.append_event(&event).await?;

    Ok(Released::Seat(seat_id))
}
