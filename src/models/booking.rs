use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Success,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Success => "success",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "success" => Ok(BookingStatus::Success),
            other => Err(format!("unknown booking status '{}'", other)),
        }
    }
}

/// A reservation of one seat for one showtime, together with the display
/// fields joined from showtime, movie, studio and seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatBooking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub showtime_id: Uuid,
    pub seat_id: Uuid,
    pub seat_detail_id: Uuid,
    pub status: BookingStatus,
    pub show_start: DateTime<Utc>,
    pub show_end: DateTime<Utc>,
    pub movie_id: Uuid,
    pub movie_title: String,
    pub movie_price: i64,
    pub studio_id: Uuid,
    pub studio_name: String,
    pub seat_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub user_id: Uuid,
    pub showtime_id: Uuid,
    pub seat_id: Uuid,
}

/// Ids generated when a booking is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BookingKeys {
    pub booking_id: Uuid,
    #[serde(rename = "seat_detail_for_booking_id")]
    pub seat_detail_id: Uuid,
}
