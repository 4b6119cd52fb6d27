use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::store::StoreError;

/// Coarse classification of a failure, used to pick the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Forbidden,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("showtime {0} not found")]
    ShowtimeNotFound(Uuid),

    #[error("movie {0} not found")]
    MovieNotFound(Uuid),

    #[error("studio {0} not found")]
    StudioNotFound(Uuid),

    #[error("seat {0} is not available")]
    SeatUnavailable(Uuid),

    #[error("seat {0} is being booked by another request")]
    SeatBusy(Uuid),

    #[error("seat {seat_id} does not belong to studio {studio_id}")]
    SeatNotInStudio { seat_id: Uuid, studio_id: Uuid },

    #[error("booking {0} not found")]
    BookingNotFound(Uuid),

    #[error("booking {0} is being ordered concurrently, try again")]
    BookingContended(Uuid),

    #[error("booking {0} is already paid")]
    BookingAlreadyPaid(Uuid),

    #[error("payment {0} not found")]
    PaymentNotFound(Uuid),

    #[error("no pending bookings to pay for")]
    NoPendingBookings,

    #[error("pending bookings have different unit prices: {0:?}")]
    MixedUnitPrices(Vec<i64>),

    #[error("studio {studio_id} already has showtime {existing} in that interval")]
    ShowtimeConflict { studio_id: Uuid, existing: Uuid },

    #[error("access denied")]
    Forbidden,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::Validation(_)
            | BookingError::SeatNotInStudio { .. }
            | BookingError::MixedUnitPrices(_) => ErrorKind::Validation,
            BookingError::ShowtimeNotFound(_)
            | BookingError::MovieNotFound(_)
            | BookingError::StudioNotFound(_)
            | BookingError::SeatUnavailable(_)
            | BookingError::BookingNotFound(_)
            | BookingError::PaymentNotFound(_)
            | BookingError::NoPendingBookings => ErrorKind::NotFound,
            BookingError::SeatBusy(_)
            | BookingError::BookingContended(_)
            | BookingError::BookingAlreadyPaid(_)
            | BookingError::ShowtimeConflict { .. } => ErrorKind::Conflict,
            BookingError::Forbidden => ErrorKind::Forbidden,
            BookingError::Timeout(_) | BookingError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable reason, so clients can tell a taken seat from
    /// a showtime clash or an empty cart.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "validation_failed",
            BookingError::ShowtimeNotFound(_) => "showtime_not_found",
            BookingError::MovieNotFound(_) => "movie_not_found",
            BookingError::StudioNotFound(_) => "studio_not_found",
            BookingError::SeatUnavailable(_) => "seat_unavailable",
            BookingError::SeatBusy(_) => "seat_busy",
            BookingError::SeatNotInStudio { .. } => "seat_not_in_studio",
            BookingError::BookingNotFound(_) => "booking_not_found",
            BookingError::BookingContended(_) => "booking_contended",
            BookingError::BookingAlreadyPaid(_) => "booking_already_paid",
            BookingError::PaymentNotFound(_) => "payment_not_found",
            BookingError::NoPendingBookings => "no_pending_bookings",
            BookingError::MixedUnitPrices(_) => "mixed_unit_prices",
            BookingError::ShowtimeConflict { .. } => "showtime_conflict",
            BookingError::Forbidden => "forbidden",
            BookingError::Timeout(_) => "timeout",
            BookingError::Store(_) => "internal",
        }
    }
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BookingError::Validation(errors.to_string())
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error while handling request");
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_taken_and_showtime_clash_are_distinguishable() {
        let taken = BookingError::SeatUnavailable(Uuid::new_v4());
        let clash = BookingError::ShowtimeConflict {
            studio_id: Uuid::new_v4(),
            existing: Uuid::new_v4(),
        };

        assert_eq!(taken.kind(), ErrorKind::NotFound);
        assert_eq!(clash.kind(), ErrorKind::Conflict);
        assert_ne!(taken.code(), clash.code());
        assert_ne!(BookingError::NoPendingBookings.code(), taken.code());
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        let err = BookingError::Store(StoreError::Corrupt("bad status column".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_codes_follow_kind() {
        let cases = [
            (BookingError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (BookingError::PaymentNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (BookingError::SeatBusy(Uuid::nil()), StatusCode::CONFLICT),
            (BookingError::Forbidden, StatusCode::FORBIDDEN),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
