//! Payment Reconciler.
//!
//! Applies the gateway's asynchronous verdict on an order to the payment,
//! every booking it covers and their seats, in one transaction. Deliveries
//! may repeat or arrive out of order, so every transition is idempotent:
//! an order that is gone or already in its final state is reported as
//! ignored, not as an error.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::gateway::verify_notification_signature;
use super::within;
use crate::error::BookingError;
use crate::models::{BookingEvent, BookingEventKind, BookingStatus, PaymentStatus};
use crate::store::{commit_or_rollback, Store, StoreError, StoreTx};

/// Webhook body as the gateway posts it. Only `order_id` and
/// `transaction_status` drive the state machine; the rest feeds the
/// signature check and the logs.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PaymentNotification {
    #[serde(default)]
    #[validate(length(min = 1, message = "order_id is required"))]
    pub order_id: String,
    #[serde(default)]
    pub transaction_status: String,
    #[serde(default)]
    pub status_code: Option<String>,
    #[serde(default)]
    pub gross_amount: Option<String>,
    #[serde(default)]
    pub signature_key: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub fraud_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Settlement,
    Deny,
    Cancel,
    Expire,
    Other(String),
}

impl TransactionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "settlement" => TransactionStatus::Settlement,
            "deny" => TransactionStatus::Deny,
            "cancel" => TransactionStatus::Cancel,
            "expire" => TransactionStatus::Expire,
            other => TransactionStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TransactionStatus::Settlement => "settlement",
            TransactionStatus::Deny => "deny",
            TransactionStatus::Cancel => "cancel",
            TransactionStatus::Expire => "expire",
            TransactionStatus::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// `order_id` is not one of our payment ids.
    MalformedOrderId,
    /// No such payment, e.g. it was already released.
    UnknownOrder,
    AlreadySettled,
    /// A failure status arrived for an order that was already paid.
    AlreadyPaid,
    UnsupportedStatus(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Settled { payment_id: Uuid, bookings: usize },
    Released { payment_id: Uuid, seats: usize },
    Ignored { reason: IgnoreReason },
}

/// How notifications are authenticated.
#[derive(Debug, Clone, Default)]
pub struct SignaturePolicy {
    pub server_key: String,
    /// Reject notifications that carry no signature at all.
    pub required: bool,
}

pub struct PaymentReconciler {
    store: Arc<dyn Store>,
    signatures: SignaturePolicy,
    tx_timeout: Duration,
}

impl PaymentReconciler {
    pub fn new(store: Arc<dyn Store>, signatures: SignaturePolicy, tx_timeout: Duration) -> Self {
        Self {
            store,
            signatures,
            tx_timeout,
        }
    }

    pub async fn reconcile(
        &self,
        notification: &PaymentNotification,
    ) -> Result<ReconcileOutcome, BookingError> {
        notification.validate()?;
        self.authenticate(notification)?;

        let status = TransactionStatus::parse(&notification.transaction_status);
        let outcome = match (Uuid::parse_str(notification.order_id.trim()), status) {
            (Err(_), _) => ReconcileOutcome::Ignored {
                reason: IgnoreReason::MalformedOrderId,
            },
            (Ok(_), TransactionStatus::Other(raw)) => ReconcileOutcome::Ignored {
                reason: IgnoreReason::UnsupportedStatus(raw),
            },
            (Ok(payment_id), status) => {
                within(self.tx_timeout, async {
                    let mut tx = self.store.begin().await?;
                    let result = apply(tx.as_mut(), payment_id, &status).await;
                    commit_or_rollback(tx, result).await
                })
                .await?
            }
        };

        match &outcome {
            ReconcileOutcome::Settled {
                payment_id,
                bookings,
            } => info!(%payment_id, bookings, "payment settled"),
            ReconcileOutcome::Released { payment_id, seats } => info!(
                %payment_id,
                seats,
                status = %notification.transaction_status,
                "payment failed, seats released"
            ),
            ReconcileOutcome::Ignored { reason } => warn!(
                order_id = %notification.order_id,
                status = %notification.transaction_status,
                ?reason,
                "payment notification ignored"
            ),
        }
        Ok(outcome)
    }

    fn authenticate(&self, notification: &PaymentNotification) -> Result<(), BookingError> {
        let Some(signature) = notification.signature_key.as_deref() else {
            if self.signatures.required {
                warn!(order_id = %notification.order_id, "unsigned payment notification rejected");
                return Err(BookingError::Forbidden);
            }
            return Ok(());
        };

        let valid = verify_notification_signature(
            &notification.order_id,
            notification.status_code.as_deref().unwrap_or_default(),
            notification.gross_amount.as_deref().unwrap_or_default(),
            &self.signatures.server_key,
            signature,
        );
        if !valid {
            warn!(order_id = %notification.order_id, "payment notification signature mismatch");
            return Err(BookingError::Forbidden);
        }
        Ok(())
    }
}

async fn apply(
    tx: &mut dyn StoreTx,
    payment_id: Uuid,
    status: &TransactionStatus,
) -> Result<ReconcileOutcome, BookingError> {
    let Some(payment) = tx.lock_payment(payment_id).await? else {
        return Ok(ReconcileOutcome::Ignored {
            reason: IgnoreReason::UnknownOrder,
        });
    };

    if *status == TransactionStatus::Settlement {
        if payment.status == PaymentStatus::Paid {
            return Ok(ReconcileOutcome::Ignored {
                reason: IgnoreReason::AlreadySettled,
            });
        }
        return settle(tx, payment_id).await;
    }

    if payment.status == PaymentStatus::Paid {
        return Ok(ReconcileOutcome::Ignored {
            reason: IgnoreReason::AlreadyPaid,
        });
    }
    release(tx, payment_id, status).await
}

async fn settle(
    tx: &mut dyn StoreTx,
    payment_id: Uuid,
) -> Result<ReconcileOutcome, BookingError> {
    tx.set_payment_status(payment_id, PaymentStatus::Paid).await?;

    let bookings = tx.payment_bookings(payment_id).await?;
    for booking in &bookings {
        if booking.status == BookingStatus::Success {
            continue;
        }
        tx.set_booking_status(booking.id, BookingStatus::Success).await?;
        tx.append_event(
            &BookingEvent::new(
                BookingEventKind::Settled,
                booking.id,
                booking.seat_id,
                booking.user_id,
            )
            .with_payment(payment_id),
        )
        .await?;
    }

    Ok(ReconcileOutcome::Settled {
        payment_id,
        bookings: bookings.len(),
    })
}

async fn release(
    tx: &mut dyn StoreTx,
    payment_id: Uuid,
    status: &TransactionStatus,
) -> Result<ReconcileOutcome, BookingError> {
    let detail = status.as_str();

    // read the covered bookings before the payment row (and the link) goes
    let bookings = tx.payment_bookings(payment_id).await?;
    tx.delete_payment(payment_id).await?;

    let mut seats = 0;
    for booking in &bookings {
        let Some(seat_id) = tx.delete_booking(booking.id).await? else {
            continue;
        };
        if !tx.set_seat_available(seat_id, true).await? {
            return Err(StoreError::Corrupt(format!(
                "booking {} held missing seat {}",
                booking.id, seat_id
            ))
            .into());
        }
        tx.append_event(
            &BookingEvent::new(
                BookingEventKind::Released,
                booking.id,
                seat_id,
                booking.user_id,
            )
            .with_payment(payment_id)
            .with_detail(detail),
        )
        .await?;
        seats += 1;
    }

    Ok(ReconcileOutcome::Released { payment_id, seats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::notification_signature;
    use crate::store::memory::MemoryStore;

    fn notification(order_id: &str, status: &str) -> PaymentNotification {
        PaymentNotification {
            order_id: order_id.to_string(),
            transaction_status: status.to_string(),
            status_code: None,
            gross_amount: None,
            signature_key: None,
            transaction_id: None,
            fraud_status: None,
        }
    }

    fn reconciler(policy: SignaturePolicy) -> PaymentReconciler {
        PaymentReconciler::new(
            Arc::new(MemoryStore::new()),
            policy,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!(TransactionStatus::parse("Settlement"), TransactionStatus::Settlement);
        assert_eq!(TransactionStatus::parse("EXPIRE"), TransactionStatus::Expire);
        assert_eq!(
            TransactionStatus::parse("pending"),
            TransactionStatus::Other("pending".to_string())
        );
    }

    #[tokio::test]
    async fn missing_order_id_fails_validation() {
        let err = reconciler(SignaturePolicy::default())
            .reconcile(&notification("", "settlement"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_and_malformed_orders_are_ignored() {
        let r = reconciler(SignaturePolicy::default());

        let outcome = r
            .reconcile(&notification(&Uuid::new_v4().to_string(), "deny"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Ignored {
                reason: IgnoreReason::UnknownOrder
            }
        );

        let outcome = r.reconcile(&notification("order-42", "settlement")).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Ignored {
                reason: IgnoreReason::MalformedOrderId
            }
        );
    }

    #[tokio::test]
    async fn unsupported_status_is_a_no_op() {
        let outcome = reconciler(SignaturePolicy::default())
            .reconcile(&notification(&Uuid::new_v4().to_string(), "pending"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Ignored {
                reason: IgnoreReason::UnsupportedStatus("pending".to_string())
            }
        );
    }

    #[tokio::test]
    async fn signatures_are_checked_when_present() {
        let policy = SignaturePolicy {
            server_key: "server-key".to_string(),
            required: false,
        };
        let r = reconciler(policy);
        let order_id = Uuid::new_v4().to_string();

        let mut signed = notification(&order_id, "settlement");
        signed.status_code = Some("200".to_string());
        signed.gross_amount = Some("150.00".to_string());
        signed.signature_key = Some(notification_signature(&order_id, "200", "150.00", "server-key"));
        assert!(r.reconcile(&signed).await.is_ok());

        signed.gross_amount = Some("1.00".to_string());
        let err = r.reconcile(&signed).await.unwrap_err();
        assert!(matches!(err, BookingError::Forbidden));

        // unsigned passes while signatures are optional
        assert!(r.reconcile(&notification(&order_id, "settlement")).await.is_ok());
    }

    #[tokio::test]
    async fn unsigned_notification_rejected_when_required() {
        let r = reconciler(SignaturePolicy {
            server_key: "server-key".to_string(),
            required: true,
        });
        let err = r
            .reconcile(&notification(&Uuid::new_v4().to_string(), "settlement"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Forbidden));
    }
}
