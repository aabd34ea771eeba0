use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub title: String,
    /// Базовая цена одного места.
    pub price: Decimal,
    pub total_seats: i32,
    /// Денормализованный счётчик: `total_seats - count(is_booked)`.
    pub available_seats: i32,
    pub is_cancelled: bool,
    pub starts_at: DateTime<Utc>,
}

impl Event {
    /// Отмена брони разрешена только до начала события.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    pub price: Decimal,
    pub starts_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySummary {
    pub event_id: i64,
    pub total_seats: i32,
    pub booked_seats: i32,
    pub available_seats: i32,
}
