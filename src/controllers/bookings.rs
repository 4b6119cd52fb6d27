use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{error::BookingError, middleware::AuthUser, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/{id}", get(get_booking).delete(release_booking))
        .route("/bookings/{id}/events", get(booking_history))
}

// POST /api/v1/bookings
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[validate(required(message = "seat_id is required"))]
    pub seat_id: Option<Uuid>,
    #[validate(required(message = "showtime_id is required"))]
    pub showtime_id: Option<Uuid>,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, BookingError> {
    req.validate()?;
    let (Some(showtime_id), Some(seat_id)) = (req.showtime_id, req.seat_id) else {
        return Err(BookingError::Validation(
            "showtime_id and seat_id are required".to_string(),
        ));
    };

    let keys = state
        .reservations
        .reserve(user.user_id, showtime_id, seat_id)
        .await?;
    Ok((StatusCode::CREATED, Json(keys)))
}

// GET /api/v1/bookings
async fn list_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, BookingError> {
    let bookings = state.reservations.list_bookings(user.user_id).await?;
    Ok(Json(bookings))
}

// GET /api/v1/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let booking = state.reservations.find_booking(user.user_id, id).await?;
    Ok(Json(booking))
}

// DELETE /api/v1/bookings/{id}
async fn release_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    state.reservations.release(user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// GET /api/v1/bookings/{id}/events
async fn booking_history(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let events = state.reservations.booking_history(user.user_id, id).await?;
    Ok(Json(events))
}
