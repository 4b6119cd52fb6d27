use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::BookingError, middleware::AuthUser, services::reconcile::PaymentNotification, AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments", get(list_payments).post(create_payment))
        .route("/payments/notification", post(payment_notification))
        .route("/payments/{id}", get(get_payment))
}

// POST /api/v1/payments
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(required(message = "seat_detail_for_booking_id is required"))]
    pub seat_detail_for_booking_id: Option<Uuid>,
}

async fn create_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, BookingError> {
    req.validate()?;
    let seat_detail_id = req.seat_detail_for_booking_id.ok_or_else(|| {
        BookingError::Validation("seat_detail_for_booking_id is required".to_string())
    })?;

    let order = state
        .payments
        .create_order(user.user_id, seat_detail_id)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

// GET /api/v1/payments
async fn list_payments(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, BookingError> {
    let payments = state.payments.list_payments(user.user_id).await?;
    Ok(Json(payments))
}

// GET /api/v1/payments/{id}
async fn get_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let payment = state.payments.find_payment(user.user_id, id).await?;
    Ok(Json(payment))
}

// POST /api/v1/payments/notification
//
// Called by the gateway, not by a user. Anything but a 2xx makes the
// gateway deliver again, so ignored notifications still answer 200.
async fn payment_notification(
    State(state): State<Arc<AppState>>,
    Json(notification): Json<PaymentNotification>,
) -> Result<impl IntoResponse, BookingError> {
    let outcome = state.reconciler.reconcile(&notification).await?;
    Ok(Json(outcome))
}
