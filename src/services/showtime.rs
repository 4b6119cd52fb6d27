//! Showtime conflict checking and scheduling.
//!
//! Two showtimes of one studio conflict when their intervals overlap under
//! the configured [`BoundaryRule`]. The store is asked for every showtime
//! whose closed interval touches the proposed one; the rule then decides
//! whether touching at an endpoint counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::within;
use crate::error::BookingError;
use crate::models::{NewShowtime, Showtime};
use crate::store::{commit_or_rollback, Store, StoreTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryRule {
    /// `[start, end)`: a showtime may begin at the instant the previous one ends.
    #[default]
    HalfOpen,
    /// `[start, end]`: back-to-back showtimes conflict.
    Closed,
}

impl FromStr for BoundaryRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "half_open" | "half-open" => Ok(BoundaryRule::HalfOpen),
            "closed" => Ok(BoundaryRule::Closed),
            other => Err(format!("unknown showtime boundary rule '{}'", other)),
        }
    }
}

/// Whether `[a_start, a_end]` and `[b_start, b_end]` overlap under `rule`.
pub fn overlaps(
    rule: BoundaryRule,
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    match rule {
        BoundaryRule::Closed => a_start <= b_end && a_end >= b_start,
        BoundaryRule::HalfOpen => a_start < b_end && a_end > b_start,
    }
}

pub struct ShowtimeScheduler {
    store: Arc<dyn Store>,
    boundary: BoundaryRule,
    tx_timeout: Duration,
}

impl ShowtimeScheduler {
    pub fn new(store: Arc<dyn Store>, boundary: BoundaryRule, tx_timeout: Duration) -> Self {
        Self {
            store,
            boundary,
            tx_timeout,
        }
    }

    pub fn boundary(&self) -> BoundaryRule {
        self.boundary
    }

    pub async fn find_showtime(&self, id: Uuid) -> Result<Showtime, BookingError> {
        within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result = tx
                .find_showtime(id)
                .await
                .map_err(BookingError::from)
                .and_then(|showtime| showtime.ok_or(BookingError::ShowtimeNotFound(id)));
            commit_or_rollback(tx, result).await
        })
        .await
    }

    pub async fn list_showtimes(&self) -> Result<Vec<Showtime>, BookingError> {
        within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result = tx.list_showtimes().await.map_err(BookingError::from);
            commit_or_rollback(tx, result).await
        })
        .await
    }

    /// Ok when nothing in `studio_id` overlaps `[start, end]`.
    pub async fn check_conflict(
        &self,
        studio_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        let boundary = self.boundary;
        within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result = ensure_free(tx.as_mut(), boundary, studio_id, start, end).await;
            commit_or_rollback(tx, result).await
        })
        .await
    }

    /// Schedules `movie_id` in `studio_id` from `show_start` for the movie's
    /// duration, refusing any overlap with an existing showtime.
    pub async fn schedule(
        &self,
        studio_id: Uuid,
        movie_id: Uuid,
        show_start: DateTime<Utc>,
    ) -> Result<Showtime, BookingError> {
        let boundary = self.boundary;
        let showtime = within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result = schedule_in(tx.as_mut(), boundary, studio_id, movie_id, show_start).await;
            commit_or_rollback(tx, result).await
        })
        .await?;

        info!(
            showtime_id = %showtime.id,
            %studio_id,
            %movie_id,
            show_start = %showtime.show_start,
            show_end = %showtime.show_end,
            "showtime scheduled"
        );
        Ok(showtime)
    }
}

async fn ensure_free(
    tx: &mut dyn StoreTx,
    boundary: BoundaryRule,
    studio_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), BookingError> {
    if end <= start {
        return Err(BookingError::Validation(
            "showtime must end after it starts".to_string(),
        ));
    }

    let candidates = tx.showtimes_touching(studio_id, start, end).await?;
    match candidates
        .iter()
        .find(|s| overlaps(boundary, start, end, s.show_start, s.show_end))
    {
        Some(existing) => {
            warn!(%studio_id, existing = %existing.id, %start, %end, "showtime conflict");
            Err(BookingError::ShowtimeConflict {
                studio_id,
                existing: existing.id,
            })
        }
        None => Ok(()),
    }
}

async fn schedule_in(
    tx: &mut dyn StoreTx,
    boundary: BoundaryRule,
    studio_id: Uuid,
    movie_id: Uuid,
    show_start: DateTime<Utc>,
) -> Result<Showtime, BookingError> {
    tx.lock_studio(studio_id)
        .await?
        .ok_or(BookingError::StudioNotFound(studio_id))?;
    let movie = tx
        .find_movie(movie_id)
        .await?
        .ok_or(BookingError::MovieNotFound(movie_id))?;

    if movie.duration_minutes <= 0 {
        return Err(BookingError::Validation(format!(
            "movie {} has no running time",
            movie.id
        )));
    }
    let show_end = show_start
        .checked_add_signed(movie.duration())
        .ok_or_else(|| {
            BookingError::Validation(format!("show_start {} is out of range", show_start))
        })?;

    ensure_free(tx, boundary, studio_id, show_start, show_end).await?;

    let id = tx
        .insert_showtime(&NewShowtime {
            studio_id,
            movie_id,
            show_start,
            show_end,
        })
        .await?;
    tx.find_showtime(id)
        .await?
        .ok_or(BookingError::ShowtimeNotFound(id))
}
