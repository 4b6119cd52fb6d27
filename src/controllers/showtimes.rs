use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{error::BookingError, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/showtimes", get(list_showtimes).post(create_showtime))
        .route("/showtimes/{id}", get(get_showtime))
        .route("/studios/{id}/seats", get(studio_seats))
}

// POST /api/v1/showtimes
#[derive(Debug, Deserialize, Validate)]
pub struct CreateShowtimeRequest {
    #[validate(required(message = "studio_id is required"))]
    pub studio_id: Option<Uuid>,
    #[validate(required(message = "movie_id is required"))]
    pub movie_id: Option<Uuid>,
    #[validate(required(message = "show_start is required"))]
    pub show_start: Option<DateTime<Utc>>,
}

async fn create_showtime(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateShowtimeRequest>,
) -> Result<impl IntoResponse, BookingError> {
    req.validate()?;
    let (Some(studio_id), Some(movie_id), Some(show_start)) =
        (req.studio_id, req.movie_id, req.show_start)
    else {
        return Err(BookingError::Validation(
            "studio_id, movie_id and show_start are required".to_string(),
        ));
    };

    let showtime = state
        .scheduler
        .schedule(studio_id, movie_id, show_start)
        .await?;
    Ok((StatusCode::CREATED, Json(showtime)))
}

// GET /api/v1/showtimes
async fn list_showtimes(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, BookingError> {
    let showtimes = state.scheduler.list_showtimes().await?;
    Ok(Json(showtimes))
}

// GET /api/v1/showtimes/{id}
async fn get_showtime(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let showtime = state.scheduler.find_showtime(id).await?;
    Ok(Json(showtime))
}

// GET /api/v1/studios/{id}/seats
async fn studio_seats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let seats = state.reservations.list_seats(id).await?;
    Ok(Json(seats))
}
