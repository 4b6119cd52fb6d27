pub mod gateway;
pub mod payment;
pub mod reconcile;
pub mod reservation;
pub mod showtime;

use std::future::Future;
use std::time::Duration;

use crate::error::BookingError;

/// Bounds one unit of work. On expiry the future is dropped, and with it the
/// open transaction, which rolls back.
pub(crate) async fn within<T, F>(limit: Duration, work: F) -> Result<T, BookingError>
where
    F: Future<Output = Result<T, BookingError>>,
{
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| BookingError::Timeout(limit))?
}
