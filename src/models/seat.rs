use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A physical seat inside a studio. `is_available = false` is what stops a
/// second booking of the same seat.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Seat {
    pub id: Uuid,
    pub name: String,
    pub is_available: bool,
    pub studio_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Studio {
    pub id: Uuid,
    pub name: String,
}
