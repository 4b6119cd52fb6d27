//! Payment Ledger.
//!
//! Turns every pending, not yet ordered booking of a user into one priced
//! order and asks the gateway where the customer should pay it.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::gateway::PaymentGateway;
use super::within;
use crate::error::BookingError;
use crate::models::{NewPayment, Payment, PaymentDetail, SeatBooking};
use crate::store::{commit_or_rollback, Store, StoreError, StoreTx};

/// A freshly created order. `url` is empty when the gateway could not be
/// reached; the order itself still exists and can be paid once it can.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "seat_detail_for_booking_id")]
    pub seat_detail_id: Uuid,
    pub total_seat: i32,
    pub total_price: i64,
    pub url: String,
}

pub struct PaymentLedger {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    tx_timeout: Duration,
}

impl PaymentLedger {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        tx_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            tx_timeout,
        }
    }

    pub async fn create_order(
        &self,
        user_id: Uuid,
        seat_detail_id: Uuid,
    ) -> Result<PaymentOrder, BookingError> {
        if seat_detail_id.is_nil() {
            return Err(BookingError::Validation(
                "seat_detail_for_booking_id is required".to_string(),
            ));
        }

        let payment = within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result = create_in(tx.as_mut(), user_id, seat_detail_id).await;
            commit_or_rollback(tx, result).await
        })
        .await?;

        info!(
            payment_id = %payment.id,
            %user_id,
            total_seat = payment.total_seat,
            total_price = payment.total_price,
            "payment order created"
        );

        // the row is committed before the gateway hears of it, so a
        // notification can never arrive for an order we cannot find
        let url = match self
            .gateway
            .create_transaction(payment.id, payment.total_price)
            .await
        {
            Ok(transaction) => transaction.redirect_url,
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "order created without redirect url");
                String::new()
            }
        };

        Ok(PaymentOrder {
            id: payment.id,
            user_id,
            seat_detail_id,
            total_seat: payment.total_seat,
            total_price: payment.total_price,
            url,
        })
    }

    /// The payment with the bookings it covers; owner only.
    pub async fn find_payment(
        &self,
        user_id: Uuid,
        payment_id: Uuid,
    ) -> Result<PaymentDetail, BookingError> {
        within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result: Result<_, BookingError> = async {
                let payment = tx
                    .find_payment(payment_id)
                    .await?
                    .ok_or(BookingError::PaymentNotFound(payment_id))?;
                if payment.user_id != user_id {
                    return Err(BookingError::Forbidden);
                }
                let bookings = tx.payment_bookings(payment_id).await?;
                Ok(PaymentDetail { payment, bookings })
            }
            .await;
            commit_or_rollback(tx, result).await
        })
        .await
    }

    /// Payments ordered by `user_id`, oldest first.
    pub async fn list_payments(&self, user_id: Uuid) -> Result<Vec<Payment>, BookingError> {
        within(self.tx_timeout, async {
            let mut tx = self.store.begin().await?;
            let result = tx
                .list_payments_for_user(user_id)
                .await
                .map_err(BookingError::from);
            commit_or_rollback(tx, result).await
        })
        .await
    }
}

/// Price shared by every booking, or `MixedUnitPrices` listing the
/// distinct prices found.
fn unit_price(bookings: &[SeatBooking]) -> Result<i64, BookingError> {
    let mut prices: Vec<i64> = bookings.iter().map(|b| b.movie_price).collect();
    prices.sort_unstable();
    prices.dedup();
    match prices.as_slice() {
        [] => Err(BookingError::NoPendingBookings),
        [price] => Ok(*price),
        _ => Err(BookingError::MixedUnitPrices(prices)),
    }
}

async fn create_in(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
    seat_detail_id: Uuid,
) -> Result<Payment, BookingError> {
    let pending = tx.unclaimed_pending_bookings(user_id).await?;
    if pending.is_empty() {
        return Err(BookingError::NoPendingBookings);
    }
    if !pending.iter().any(|b| b.seat_detail_id == seat_detail_id) {
        return Err(BookingError::Validation(format!(
            "seat detail {} is not one of your pending bookings",
            seat_detail_id
        )));
    }

    let price = unit_price(&pending)?;
    let total_seat = i32::try_from(pending.len())
        .map_err(|_| BookingError::Validation("too many bookings in one order".to_string()))?;
    let total_price = price
        .checked_mul(i64::from(total_seat))
        .ok_or_else(|| StoreError::Corrupt(format!("order total overflows at unit price {}", price)))?;

    let payment = tx
        .insert_payment(&NewPayment {
            user_id,
            seat_detail_id,
            total_seat,
            total_price,
            booking_ids: pending.iter().map(|b| b.id).collect(),
        })
        .await?;
    Ok(payment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingStatus, PaymentStatus};
    use crate::services::gateway::{GatewayError, SnapTransaction};
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedGateway;

    #[async_trait]
    impl PaymentGateway for FixedGateway {
        async fn create_transaction(
            &self,
            order_id: Uuid,
            _gross_amount: i64,
        ) -> Result<SnapTransaction, GatewayError> {
            Ok(SnapTransaction {
                token: order_id.to_string(),
                redirect_url: format!("https://pay.example/{}", order_id),
            })
        }
    }

    struct Booked {
        store: MemoryStore,
        user: Uuid,
        details: Vec<Uuid>,
    }

    async fn book(prices: &[i64]) -> Booked {
        let store = MemoryStore::new();
        let studio = store.add_studio("Studio 1").await;
        let user = Uuid::new_v4();
        let mut details = Vec::new();
        for (i, price) in prices.iter().enumerate() {
            let movie = store.add_movie("Feature", *price, 90).await;
            let start = Utc::now() + chrono::Duration::days(i as i64 + 1);
            let showtime = store
                .add_showtime(studio.id, movie.id, start, start + movie.duration())
                .await;
            let seat = store.add_seat(studio.id, &format!("A{}", i + 1)).await;

            let mut tx = store.begin().await.unwrap();
            let keys = tx
                .insert_booking(&crate::models::NewBooking {
                    user_id: user,
                    showtime_id: showtime,
                    seat_id: seat.id,
                })
                .await
                .unwrap();
            tx.set_seat_available(seat.id, false).await.unwrap();
            tx.commit().await.unwrap();
            details.push(keys.seat_detail_id);
        }
        Booked {
            store,
            user,
            details,
        }
    }

    fn ledger(store: &MemoryStore) -> PaymentLedger {
        PaymentLedger::new(
            Arc::new(store.clone()),
            Arc::new(FixedGateway),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn aggregates_all_pending_bookings() {
        let b = book(&[50, 50, 50]).await;
        let order = ledger(&b.store).create_order(b.user, b.details[0]).await.unwrap();

        assert_eq!(order.total_seat, 3);
        assert_eq!(order.total_price, 150);
        assert_eq!(order.url, format!("https://pay.example/{}", order.id));

        let stored = b.store.payment(order.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert_eq!(stored.total_price, 150);
    }

    #[tokio::test]
    async fn no_pending_bookings_is_reported() {
        let b = book(&[]).await;
        let err = ledger(&b.store)
            .create_order(b.user, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NoPendingBookings));
    }

    #[tokio::test]
    async fn mixed_prices_are_refused() {
        let b = book(&[50, 70]).await;
        let err = ledger(&b.store)
            .create_order(b.user, b.details[0])
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::MixedUnitPrices(ref p) if p == &vec![50, 70]));
    }

    #[tokio::test]
    async fn ordered_bookings_are_not_aggregated_twice() {
        let b = book(&[50, 50]).await;
        let ledger = ledger(&b.store);
        ledger.create_order(b.user, b.details[0]).await.unwrap();

        let err = ledger.create_order(b.user, b.details[1]).await.unwrap_err();
        assert!(matches!(err, BookingError::NoPendingBookings));
    }

    #[tokio::test]
    async fn foreign_seat_detail_fails_validation() {
        let b = book(&[50]).await;
        let err = ledger(&b.store)
            .create_order(b.user, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn gateway_failure_still_creates_order() {
        let b = book(&[50]).await;
        let ledger = PaymentLedger::new(
            Arc::new(b.store.clone()),
            Arc::new(crate::services::gateway::DisabledGateway),
            Duration::from_secs(5),
        );

        let order = ledger.create_order(b.user, b.details[0]).await.unwrap();
        assert!(order.url.is_empty());
        assert!(b.store.payment(order.id).await.is_some());
    }

    #[tokio::test]
    async fn payment_detail_is_owner_only() {
        let b = book(&[50, 50]).await;
        let ledger = ledger(&b.store);
        let order = ledger.create_order(b.user, b.details[1]).await.unwrap();

        let detail = ledger.find_payment(b.user, order.id).await.unwrap();
        assert_eq!(detail.bookings.len(), 2);
        assert!(detail
            .bookings
            .iter()
            .all(|bk| bk.status == BookingStatus::Pending));

        let err = ledger.find_payment(Uuid::new_v4(), order.id).await.unwrap_err();
        assert!(matches!(err, BookingError::Forbidden));
        let err = ledger.find_payment(b.user, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BookingError::PaymentNotFound(_)));
    }

    #[tokio::test]
    async fn payments_are_listed_per_owner() {
        let b = book(&[50]).await;
        let ledger = ledger(&b.store);
        let order = ledger.create_order(b.user, b.details[0]).await.unwrap();

        let mine = ledger.list_payments(b.user).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, order.id);
        assert_eq!(mine[0].status, PaymentStatus::Pending);

        assert!(ledger.list_payments(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
