//! In-process [`Store`].
//!
//! Each transaction takes the store-wide lock, works on a private copy of the
//! state and swaps it in on commit, so transactions are serialisable and a
//! dropped transaction leaves no trace. Used by the test-suite and when the
//! service runs without `DATABASE_URL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, StoreTx};
use crate::models::{
    BookingEvent, BookingKeys, BookingStatus, Movie, NewBooking, NewPayment, NewShowtime,
    Payment, PaymentStatus, Seat, SeatBooking, Showtime, Studio,
};

#[derive(Debug, Clone)]
struct ShowtimeRow {
    id: Uuid,
    studio_id: Uuid,
    movie_id: Uuid,
    show_start: DateTime<Utc>,
    show_end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct BookingRow {
    id: Uuid,
    seq: u64,
    user_id: Uuid,
    showtime_id: Uuid,
    status: BookingStatus,
    payment_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct SeatDetailRow {
    id: Uuid,
    seat_id: Uuid,
    booking_id: Uuid,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    seq: u64,
    movies: HashMap<Uuid, Movie>,
    studios: HashMap<Uuid, Studio>,
    showtimes: HashMap<Uuid, ShowtimeRow>,
    seats: HashMap<Uuid, Seat>,
    bookings: HashMap<Uuid, BookingRow>,
    seat_details: HashMap<Uuid, SeatDetailRow>,
    payments: HashMap<Uuid, Payment>,
    events: Vec<BookingEvent>,
}

impl MemoryState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn showtime_view(&self, row: &ShowtimeRow) -> StoreResult<Showtime> {
        let movie = self.movies.get(&row.movie_id).ok_or_else(|| {
            StoreError::Corrupt(format!("showtime {} references missing movie", row.id))
        })?;
        let studio = self.studios.get(&row.studio_id).ok_or_else(|| {
            StoreError::Corrupt(format!("showtime {} references missing studio", row.id))
        })?;
        Ok(Showtime {
            id: row.id,
            studio_id: row.studio_id,
            movie_id: row.movie_id,
            show_start: row.show_start,
            show_end: row.show_end,
            studio_name: studio.name.clone(),
            movie_title: movie.title.clone(),
            movie_price: movie.price,
        })
    }

    fn booking_view(&self, row: &BookingRow) -> StoreResult<SeatBooking> {
        let detail = self
            .seat_details
            .values()
            .find(|d| d.booking_id == row.id)
            .ok_or_else(|| StoreError::Corrupt(format!("booking {} has no seat detail", row.id)))?;
        let seat = self.seats.get(&detail.seat_id).ok_or_else(|| {
            StoreError::Corrupt(format!("booking {} references missing seat", row.id))
        })?;
        let showtime_row = self.showtimes.get(&row.showtime_id).ok_or_else(|| {
            StoreError::Corrupt(format!("booking {} references missing showtime", row.id))
        })?;
        let showtime = self.showtime_view(showtime_row)?;

        Ok(SeatBooking {
            id: row.id,
            user_id: row.user_id,
            showtime_id: row.showtime_id,
            seat_id: seat.id,
            seat_detail_id: detail.id,
            status: row.status,
            show_start: showtime.show_start,
            show_end: showtime.show_end,
            movie_id: showtime.movie_id,
            movie_title: showtime.movie_title,
            movie_price: showtime.movie_price,
            studio_id: showtime.studio_id,
            studio_name: showtime.studio_name,
            seat_name: seat.name.clone(),
            created_at: row.created_at,
        })
    }

    fn bookings_where(&self, pred: impl Fn(&BookingRow) -> bool) -> StoreResult<Vec<SeatBooking>> {
        let mut rows: Vec<&BookingRow> = self.bookings.values().filter(|b| pred(b)).collect();
        rows.sort_by_key(|b| b.seq);
        rows.into_iter().map(|b| self.booking_view(b)).collect()
    }
}

/// In-process store with serialisable transactions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_at: Option<&'static str>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every transaction fail with [`StoreError::Injected`] when it
    /// reaches the named operation (e.g. `"set_seat_available"`).
    pub fn failing_at(&self, operation: &'static str) -> Self {
        Self {
            state: self.state.clone(),
            fail_at: Some(operation),
        }
    }

    pub async fn add_studio(&self, name: &str) -> Studio {
        let studio = Studio {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.state.lock().await.studios.insert(studio.id, studio.clone());
        studio
    }

    pub async fn add_movie(&self, title: &str, price: i64, duration_minutes: i32) -> Movie {
        let movie = Movie {
            id: Uuid::new_v4(),
            title: title.to_string(),
            price,
            duration_minutes,
        };
        self.state.lock().await.movies.insert(movie.id, movie.clone());
        movie
    }

    pub async fn add_seat(&self, studio_id: Uuid, name: &str) -> Seat {
        let seat = Seat {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_available: true,
            studio_id,
        };
        self.state.lock().await.seats.insert(seat.id, seat.clone());
        seat
    }

    /// Adds a showtime without conflict checking.
    pub async fn add_showtime(
        &self,
        studio_id: Uuid,
        movie_id: Uuid,
        show_start: DateTime<Utc>,
        show_end: DateTime<Utc>,
    ) -> Uuid {
        let row = ShowtimeRow {
            id: Uuid::new_v4(),
            studio_id,
            movie_id,
            show_start,
            show_end,
        };
        let id = row.id;
        self.state.lock().await.showtimes.insert(id, row);
        id
    }

    /// Seeds one studio with a handful of seats, one movie and one showtime,
    /// so a store-less deployment has something to book.
    pub async fn with_demo_catalogue(self) -> Self {
        let studio = self.add_studio("Studio 1").await;
        for row in ['A', 'B'] {
            for number in 1..=5 {
                self.add_seat(studio.id, &format!("{}{}", row, number)).await;
            }
        }
        let movie = self.add_movie("Opening Night", 50_000, 120).await;
        let start = Utc::now() + chrono::Duration::days(1);
        let showtime = self
            .add_showtime(studio.id, movie.id, start, start + movie.duration())
            .await;
        tracing::info!(studio_id = %studio.id, movie_id = %movie.id, showtime_id = %showtime, "seeded demo catalogue");
        self
    }

    pub async fn seat(&self, id: Uuid) -> Option<Seat> {
        self.state.lock().await.seats.get(&id).cloned()
    }

    pub async fn payment(&self, id: Uuid) -> Option<Payment> {
        self.state.lock().await.payments.get(&id).cloned()
    }

    pub async fn booking(&self, id: Uuid) -> Option<SeatBooking> {
        let state = self.state.lock().await;
        let row = state.bookings.get(&id)?;
        state.booking_view(row).ok()
    }

    /// Live bookings (any status) holding `seat_id`.
    pub async fn live_bookings_for_seat(&self, seat_id: Uuid) -> usize {
        let state = self.state.lock().await;
        state
            .seat_details
            .values()
            .filter(|d| d.seat_id == seat_id && state.bookings.contains_key(&d.booking_id))
            .count()
    }

    pub async fn events(&self) -> Vec<BookingEvent> {
        self.state.lock().await.events.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            work,
            fail_at: self.fail_at,
        }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
    fail_at: Option<&'static str>,
}

impl MemoryTx {
    fn check(&self, operation: &'static str) -> StoreResult<()> {
        match self.fail_at {
            Some(target) if target == operation => Err(StoreError::Injected(operation)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_movie(&mut self, id: Uuid) -> StoreResult<Option<Movie>> {
        self.check("find_movie")?;
        Ok(self.work.movies.get(&id).cloned())
    }

    async fn find_studio(&mut self, id: Uuid) -> StoreResult<Option<Studio>> {
        self.check("find_studio")?;
        Ok(self.work.studios.get(&id).cloned())
    }

    async fn lock_studio(&mut self, id: Uuid) -> StoreResult<Option<Studio>> {
        self.check("lock_studio")?;
        Ok(self.work.studios.get(&id).cloned())
    }

    async fn find_showtime(&mut self, id: Uuid) -> StoreResult<Option<Showtime>> {
        self.check("find_showtime")?;
        self.work
            .showtimes
            .get(&id)
            .map(|row| self.work.showtime_view(row))
            .transpose()
    }

    async fn list_showtimes(&mut self) -> StoreResult<Vec<Showtime>> {
        self.check("list_showtimes")?;
        let mut rows: Vec<&ShowtimeRow> = self.work.showtimes.values().collect();
        rows.sort_by_key(|s| (s.show_start, s.id));
        rows.into_iter()
            .map(|row| self.work.showtime_view(row))
            .collect()
    }

    async fn showtimes_touching(
        &mut self,
        studio_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Showtime>> {
        self.check("showtimes_touching")?;
        let mut rows: Vec<&ShowtimeRow> = self
            .work
            .showtimes
            .values()
            .filter(|s| s.studio_id == studio_id && s.show_start <= end && s.show_end >= start)
            .collect();
        rows.sort_by_key(|s| s.show_start);
        rows.into_iter().map(|s| self.work.showtime_view(s)).collect()
    }

    async fn insert_showtime(&mut self, showtime: &NewShowtime) -> StoreResult<Uuid> {
        self.check("insert_showtime")?;
        let row = ShowtimeRow {
            id: Uuid::new_v4(),
            studio_id: showtime.studio_id,
            movie_id: showtime.movie_id,
            show_start: showtime.show_start,
            show_end: showtime.show_end,
        };
        let id = row.id;
        self.work.showtimes.insert(id, row);
        Ok(id)
    }

    async fn list_seats(&mut self, studio_id: Uuid) -> StoreResult<Vec<Seat>> {
        self.check("list_seats")?;
        let mut seats: Vec<Seat> = self
            .work
            .seats
            .values()
            .filter(|s| s.studio_id == studio_id)
            .cloned()
            .collect();
        seats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(seats)
    }

    async fn find_seat(&mut self, id: Uuid) -> StoreResult<Option<Seat>> {
        self.check("find_seat")?;
        Ok(self.work.seats.get(&id).cloned())
    }

    async fn lock_available_seat(&mut self, id: Uuid) -> StoreResult<Option<Seat>> {
        self.check("lock_available_seat")?;
        Ok(self.work.seats.get(&id).filter(|s| s.is_available).cloned())
    }

    async fn set_seat_available(&mut self, id: Uuid, available: bool) -> StoreResult<bool> {
        self.check("set_seat_available")?;
        match self.work.seats.get_mut(&id) {
            Some(seat) => {
                seat.is_available = available;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> StoreResult<BookingKeys> {
        self.check("insert_booking")?;
        // mirrors UNIQUE(seat_id) on seat details
        if self
            .work
            .seat_details
            .values()
            .any(|d| d.seat_id == booking.seat_id)
        {
            return Err(StoreError::Corrupt(format!(
                "seat {} already has a live booking",
                booking.seat_id
            )));
        }

        let seq = self.work.next_seq();
        let row = BookingRow {
            id: Uuid::new_v4(),
            seq,
            user_id: booking.user_id,
            showtime_id: booking.showtime_id,
            status: BookingStatus::Pending,
            payment_id: None,
            created_at: Utc::now(),
        };
        let detail = SeatDetailRow {
            id: Uuid::new_v4(),
            seat_id: booking.seat_id,
            booking_id: row.id,
        };
        let keys = BookingKeys {
            booking_id: row.id,
            seat_detail_id: detail.id,
        };
        self.work.bookings.insert(row.id, row);
        self.work.seat_details.insert(detail.id, detail);
        Ok(keys)
    }

    async fn find_booking(&mut self, id: Uuid) -> StoreResult<Option<SeatBooking>> {
        self.check("find_booking")?;
        self.work
            .bookings
            .get(&id)
            .map(|row| self.work.booking_view(row))
            .transpose()
    }

    async fn lock_booking(&mut self, id: Uuid) -> StoreResult<Option<SeatBooking>> {
        self.check("lock_booking")?;
        self.work
            .bookings
            .get(&id)
            .map(|row| self.work.booking_view(row))
            .transpose()
    }

    async fn list_bookings_for_user(&mut self, user_id: Uuid) -> StoreResult<Vec<SeatBooking>> {
        self.check("list_bookings_for_user")?;
        self.work.bookings_where(|b| b.user_id == user_id)
    }

    async fn unclaimed_pending_bookings(
        &mut self,
        user_id: Uuid,
    ) -> StoreResult<Vec<SeatBooking>> {
        self.check("unclaimed_pending_bookings")?;
        self.work.bookings_where(|b| {
            b.user_id == user_id && b.status == BookingStatus::Pending && b.payment_id.is_none()
        })
    }

    async fn set_booking_status(
        &mut self,
        id: Uuid,
        status: BookingStatus,
    ) -> StoreResult<bool> {
        self.check("set_booking_status")?;
        match self.work.bookings.get_mut(&id) {
            Some(row) => {
                row.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn payment_for_booking(&mut self, booking_id: Uuid) -> StoreResult<Option<Uuid>> {
        self.check("payment_for_booking")?;
        Ok(self.work.bookings.get(&booking_id).and_then(|b| b.payment_id))
    }

    async fn delete_booking(&mut self, id: Uuid) -> StoreResult<Option<Uuid>> {
        self.check("delete_booking")?;
        if self.work.bookings.remove(&id).is_none() {
            return Ok(None);
        }
        let detail_id = self
            .work
            .seat_details
            .values()
            .find(|d| d.booking_id == id)
            .map(|d| d.id);
        Ok(detail_id
            .and_then(|detail_id| self.work.seat_details.remove(&detail_id))
            .map(|d| d.seat_id))
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> StoreResult<Payment> {
        self.check("insert_payment")?;
        let row = Payment {
            id: Uuid::new_v4(),
            user_id: payment.user_id,
            seat_detail_id: payment.seat_detail_id,
            total_seat: payment.total_seat,
            total_price: payment.total_price,
            status: PaymentStatus::Pending,
            created_at: Utc::now(),
        };
        for booking_id in &payment.booking_ids {
            if let Some(booking) = self.work.bookings.get_mut(booking_id) {
                booking.payment_id = Some(row.id);
            }
        }
        self.work.payments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_payment(&mut self, id: Uuid) -> StoreResult<Option<Payment>> {
        self.check("find_payment")?;
        Ok(self.work.payments.get(&id).cloned())
    }

    async fn list_payments_for_user(&mut self, user_id: Uuid) -> StoreResult<Vec<Payment>> {
        self.check("list_payments_for_user")?;
        let mut payments: Vec<Payment> = self
            .work
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.created_at, p.id));
        Ok(payments)
    }

    async fn lock_payment(&mut self, id: Uuid) -> StoreResult<Option<Payment>> {
        self.check("lock_payment")?;
        Ok(self.work.payments.get(&id).cloned())
    }

    async fn payment_bookings(&mut self, payment_id: Uuid) -> StoreResult<Vec<SeatBooking>> {
        self.check("payment_bookings")?;
        self.work.bookings_where(|b| b.payment_id == Some(payment_id))
    }

    async fn set_payment_status(
        &mut self,
        id: Uuid,
        status: PaymentStatus,
    ) -> StoreResult<bool> {
        self.check("set_payment_status")?;
        match self.work.payments.get_mut(&id) {
            Some(payment) => {
                payment.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_payment(&mut self, id: Uuid) -> StoreResult<bool> {
        self.check("delete_payment")?;
        if self.work.payments.remove(&id).is_none() {
            return Ok(false);
        }
        for booking in self.work.bookings.values_mut() {
            if booking.payment_id == Some(id) {
                booking.payment_id = None;
            }
        }
        Ok(true)
    }

    async fn append_event(&mut self, event: &BookingEvent) -> StoreResult<()> {
        self.check("append_event")?;
        self.work.events.push(event.clone());
        Ok(())
    }

    async fn booking_events(&mut self, booking_id: Uuid) -> StoreResult<Vec<BookingEvent>> {
        self.check("booking_events")?;
        Ok(self
            .work
            .events
            .iter()
            .filter(|e| e.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.check("commit")?;
        let MemoryTx {
            mut guard, work, ..
        } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
