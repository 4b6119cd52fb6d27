use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kinds of entries in the append-only booking history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingEventKind {
    Reserved,
    Settled,
    /// Payment failed, was cancelled or expired.
    Released,
    /// The owner deleted the booking.
    Cancelled,
}

impl BookingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingEventKind::Reserved => "reserved",
            BookingEventKind::Settled => "settled",
            BookingEventKind::Released => "released",
            BookingEventKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(BookingEventKind::Reserved),
            "settled" => Ok(BookingEventKind::Settled),
            "released" => Ok(BookingEventKind::Released),
            "cancelled" => Ok(BookingEventKind::Cancelled),
            other => Err(format!("unknown booking event kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingEvent {
    pub booking_id: Uuid,
    pub seat_id: Uuid,
    pub user_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub kind: BookingEventKind,
    /// Free-form reason, e.g. the gateway status that caused a release.
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BookingEvent {
    pub fn new(
        kind: BookingEventKind,
        booking_id: Uuid,
        seat_id: Uuid,
        user_id: Uuid,
    ) -> Self {
        Self {
            booking_id,
            seat_id,
            user_id,
            payment_id: None,
            kind,
            detail: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_payment(mut self, payment_id: Uuid) -> Self {
        self.payment_id = Some(payment_id);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
