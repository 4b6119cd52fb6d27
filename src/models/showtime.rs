use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Movie {
    pub id: Uuid,
    pub title: String,
    /// Unit price of one seat, in the smallest currency unit.
    pub price: i64,
    pub duration_minutes: i32,
}

impl Movie {
    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// A screening of a movie in a studio, with the display fields joined from
/// the movie and studio rows.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Showtime {
    pub id: Uuid,
    pub studio_id: Uuid,
    pub movie_id: Uuid,
    pub show_start: DateTime<Utc>,
    pub show_end: DateTime<Utc>,
    pub studio_name: String,
    pub movie_title: String,
    pub movie_price: i64,
}

#[derive(Debug, Clone)]
pub struct NewShowtime {
    pub studio_id: Uuid,
    pub movie_id: Uuid,
    pub show_start: DateTime<Utc>,
    pub show_end: DateTime<Utc>,
}
