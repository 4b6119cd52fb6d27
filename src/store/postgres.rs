use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, StoreTx};
use crate::models::{
    BookingEvent, BookingKeys, BookingStatus, Movie, NewBooking, NewPayment, NewShowtime,
    Payment, PaymentStatus, Seat, SeatBooking, Showtime, Studio,
};

const SHOWTIME_SELECT: &str = r#"
    SELECT sh.id, sh.studio_id, sh.movie_id, sh.show_start, sh.show_end,
           st.name AS studio_name, m.title AS movie_title, m.price AS movie_price
    FROM showtimes sh
    JOIN studios st ON st.id = sh.studio_id
    JOIN movies m ON m.id = sh.movie_id
"#;

const BOOKING_SELECT: &str = r#"
    SELECT sb.id, sb.user_id, sb.showtime_id, sb.status, sb.created_at,
           sd.id AS seat_detail_id, sd.seat_id, se.seat_name,
           sh.show_start, sh.show_end, sh.studio_id, st.name AS studio_name,
           sh.movie_id, m.title AS movie_title, m.price AS movie_price
    FROM seat_bookings sb
    JOIN seat_detail_for_bookings sd ON sd.seat_booking_id = sb.id
    JOIN seats se ON se.id = sd.seat_id
    JOIN showtimes sh ON sh.id = sb.showtime_id
    JOIN studios st ON st.id = sh.studio_id
    JOIN movies m ON m.id = sh.movie_id
"#;

const SEAT_SELECT: &str =
    "SELECT id, seat_name AS name, is_available, studio_id FROM seats";

const PAYMENT_SELECT: &str = r#"
    SELECT id, user_id, seat_detail_id, total_seat, total_price, status, created_at
    FROM payments
"#;

#[derive(FromRow)]
struct BookingRecord {
    id: Uuid,
    user_id: Uuid,
    showtime_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    seat_detail_id: Uuid,
    seat_id: Uuid,
    seat_name: String,
    show_start: DateTime<Utc>,
    show_end: DateTime<Utc>,
    studio_id: Uuid,
    studio_name: String,
    movie_id: Uuid,
    movie_title: String,
    movie_price: i64,
}

impl TryFrom<BookingRecord> for SeatBooking {
    type Error = StoreError;

    fn try_from(r: BookingRecord) -> Result<Self, Self::Error> {
        Ok(SeatBooking {
            id: r.id,
            user_id: r.user_id,
            showtime_id: r.showtime_id,
            seat_id: r.seat_id,
            seat_detail_id: r.seat_detail_id,
            status: r.status.parse().map_err(StoreError::Corrupt)?,
            show_start: r.show_start,
            show_end: r.show_end,
            movie_id: r.movie_id,
            movie_title: r.movie_title,
            movie_price: r.movie_price,
            studio_id: r.studio_id,
            studio_name: r.studio_name,
            seat_name: r.seat_name,
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct PaymentRecord {
    id: Uuid,
    user_id: Uuid,
    seat_detail_id: Uuid,
    total_seat: i32,
    total_price: i64,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRecord> for Payment {
    type Error = StoreError;

    fn try_from(r: PaymentRecord) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: r.id,
            user_id: r.user_id,
            seat_detail_id: r.seat_detail_id,
            total_seat: r.total_seat,
            total_price: r.total_price,
            status: r.status.parse().map_err(StoreError::Corrupt)?,
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct EventRecord {
    booking_id: Uuid,
    seat_id: Uuid,
    user_id: Uuid,
    payment_id: Option<Uuid>,
    kind: String,
    detail: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRecord> for BookingEvent {
    type Error = StoreError;

    fn try_from(r: EventRecord) -> Result<Self, Self::Error> {
        Ok(BookingEvent {
            booking_id: r.booking_id,
            seat_id: r.seat_id,
            user_id: r.user_id,
            payment_id: r.payment_id,
            kind: r.kind.parse().map_err(StoreError::Corrupt)?,
            detail: r.detail,
            created_at: r.created_at,
        })
    }
}

fn convert_all<R, T>(records: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    records.into_iter().map(T::try_from).collect()
}

/// [`Store`] backed by Postgres. Row locks (`FOR UPDATE`) taken by the
/// `lock_*` reads keep concurrent transactions on the same seat, booking or
/// payment in order, across any number of service processes.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn booking_where(
        &mut self,
        clause: &str,
        id: Uuid,
    ) -> StoreResult<Vec<SeatBooking>> {
        let sql = format!("{} {}", BOOKING_SELECT, clause);
        let records = sqlx::query_as::<_, BookingRecord>(&sql)
            .bind(id)
            .fetch_all(&mut *self.tx)
            .await?;
        convert_all(records)
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_movie(&mut self, id: Uuid) -> StoreResult<Option<Movie>> {
        let movie = sqlx::query_as::<_, Movie>(
            "SELECT id, title, price, duration_minutes FROM movies WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(movie)
    }

    async fn find_studio(&mut self, id: Uuid) -> StoreResult<Option<Studio>> {
        let studio = sqlx::query_as::<_, Studio>("SELECT id, name FROM studios WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(studio)
    }

    async fn lock_studio(&mut self, id: Uuid) -> StoreResult<Option<Studio>> {
        let studio =
            sqlx::query_as::<_, Studio>("SELECT id, name FROM studios WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(studio)
    }

    async fn find_showtime(&mut self, id: Uuid) -> StoreResult<Option<Showtime>> {
        let sql = format!("{} WHERE sh.id = $1", SHOWTIME_SELECT);
        let showtime = sqlx::query_as::<_, Showtime>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(showtime)
    }

    async fn list_showtimes(&mut self) -> StoreResult<Vec<Showtime>> {
        let sql = format!("{} ORDER BY sh.show_start, sh.id", SHOWTIME_SELECT);
        let showtimes = sqlx::query_as::<_, Showtime>(&sql)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(showtimes)
    }

    async fn showtimes_touching(
        &mut self,
        studio_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Showtime>> {
        let sql = format!(
            "{} WHERE sh.studio_id = $1 AND sh.show_start <= $3 AND sh.show_end >= $2 \
             ORDER BY sh.show_start",
            SHOWTIME_SELECT
        );
        let showtimes = sqlx::query_as::<_, Showtime>(&sql)
            .bind(studio_id)
            .bind(start)
            .bind(end)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(showtimes)
    }

    async fn insert_showtime(&mut self, showtime: &NewShowtime) -> StoreResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO showtimes (studio_id, movie_id, show_start, show_end) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(showtime.studio_id)
        .bind(showtime.movie_id)
        .bind(showtime.show_start)
        .bind(showtime.show_end)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn list_seats(&mut self, studio_id: Uuid) -> StoreResult<Vec<Seat>> {
        let sql = format!("{} WHERE studio_id = $1 ORDER BY seat_name", SEAT_SELECT);
        let seats = sqlx::query_as::<_, Seat>(&sql)
            .bind(studio_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(seats)
    }

    async fn find_seat(&mut self, id: Uuid) -> StoreResult<Option<Seat>> {
        let sql = format!("{} WHERE id = $1", SEAT_SELECT);
        let seat = sqlx::query_as::<_, Seat>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(seat)
    }

    async fn lock_available_seat(&mut self, id: Uuid) -> StoreResult<Option<Seat>> {
        let sql = format!(
            "{} WHERE id = $1 AND is_available = true FOR UPDATE",
            SEAT_SELECT
        );
        let seat = sqlx::query_as::<_, Seat>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(seat)
    }

    async fn set_seat_available(&mut self, id: Uuid, available: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE seats SET is_available = $1 WHERE id = $2")
            .bind(available)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> StoreResult<BookingKeys> {
        let booking_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO seat_bookings (user_id, showtime_id, status) \
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(booking.user_id)
        .bind(booking.showtime_id)
        .bind(BookingStatus::Pending.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        let seat_detail_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO seat_detail_for_bookings (seat_id, seat_booking_id) \
             VALUES ($1, $2) RETURNING id",
        )
        .bind(booking.seat_id)
        .bind(booking_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(BookingKeys {
            booking_id,
            seat_detail_id,
        })
    }

    async fn find_booking(&mut self, id: Uuid) -> StoreResult<Option<SeatBooking>> {
        Ok(self.booking_where("WHERE sb.id = $1", id).await?.into_iter().next())
    }

    async fn lock_booking(&mut self, id: Uuid) -> StoreResult<Option<SeatBooking>> {
        Ok(self
            .booking_where("WHERE sb.id = $1 FOR UPDATE OF sb", id)
            .await?
            .into_iter()
            .next())
    }

    async fn list_bookings_for_user(&mut self, user_id: Uuid) -> StoreResult<Vec<SeatBooking>> {
        self.booking_where("WHERE sb.user_id = $1 ORDER BY sb.created_at, sb.id", user_id)
            .await
    }

    async fn unclaimed_pending_bookings(
        &mut self,
        user_id: Uuid,
    ) -> StoreResult<Vec<SeatBooking>> {
        self.booking_where(
            "WHERE sb.user_id = $1 AND sb.status = 'pending' AND sb.payment_id IS NULL \
             ORDER BY sb.created_at, sb.id FOR UPDATE OF sb",
            user_id,
        )
        .await
    }

    async fn set_booking_status(
        &mut self,
        id: Uuid,
        status: BookingStatus,
    ) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE seat_bookings SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn payment_for_booking(&mut self, booking_id: Uuid) -> StoreResult<Option<Uuid>> {
        let payment_id = sqlx::query_scalar::<_, Option<Uuid>>(
            "SELECT payment_id FROM seat_bookings WHERE id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(payment_id.flatten())
    }

    async fn delete_booking(&mut self, id: Uuid) -> StoreResult<Option<Uuid>> {
        let seat_id = sqlx::query_scalar::<_, Uuid>(
            "DELETE FROM seat_detail_for_bookings WHERE seat_booking_id = $1 RETURNING seat_id",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let result = sqlx::query("DELETE FROM seat_bookings WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(seat_id)
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> StoreResult<Payment> {
        let record = sqlx::query_as::<_, PaymentRecord>(
            r#"
            INSERT INTO payments (user_id, seat_detail_id, total_seat, total_price, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, seat_detail_id, total_seat, total_price, status, created_at
            "#,
        )
        .bind(payment.user_id)
        .bind(payment.seat_detail_id)
        .bind(payment.total_seat)
        .bind(payment.total_price)
        .bind(PaymentStatus::Pending.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        sqlx::query("UPDATE seat_bookings SET payment_id = $1 WHERE id = ANY($2)")
            .bind(record.id)
            .bind(&payment.booking_ids[..])
            .execute(&mut *self.tx)
            .await?;

        Payment::try_from(record)
    }

    async fn find_payment(&mut self, id: Uuid) -> StoreResult<Option<Payment>> {
        let sql = format!("{} WHERE id = $1", PAYMENT_SELECT);
        sqlx::query_as::<_, PaymentRecord>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn list_payments_for_user(&mut self, user_id: Uuid) -> StoreResult<Vec<Payment>> {
        let sql = format!("{} WHERE user_id = $1 ORDER BY created_at, id", PAYMENT_SELECT);
        sqlx::query_as::<_, PaymentRecord>(&sql)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }

    async fn lock_payment(&mut self, id: Uuid) -> StoreResult<Option<Payment>> {
        let sql = format!("{} WHERE id = $1 FOR UPDATE", PAYMENT_SELECT);
        sqlx::query_as::<_, PaymentRecord>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn payment_bookings(&mut self, payment_id: Uuid) -> StoreResult<Vec<SeatBooking>> {
        self.booking_where(
            "WHERE sb.payment_id = $1 ORDER BY sb.created_at, sb.id",
            payment_id,
        )
        .await
    }

    async fn set_payment_status(
        &mut self,
        id: Uuid,
        status: PaymentStatus,
    ) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE payments SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_payment(&mut self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM payments WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_event(&mut self, event: &BookingEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO booking_events
                (booking_id, seat_id, user_id, payment_id, kind, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.booking_id)
        .bind(event.seat_id)
        .bind(event.user_id)
        .bind(event.payment_id)
        .bind(event.kind.as_str())
        .bind(event.detail.as_deref())
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn booking_events(&mut self, booking_id: Uuid) -> StoreResult<Vec<BookingEvent>> {
        let records = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT booking_id, seat_id, user_id, payment_id, kind, detail, created_at
            FROM booking_events
            WHERE booking_id = $1
            ORDER BY id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(records)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let PgTx { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
