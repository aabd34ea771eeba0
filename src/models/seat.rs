use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: i64,
    pub event_id: i64,
    pub seat_number: String,
    pub seat_type: String,
    pub price_multiplier: Decimal,
    pub is_booked: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSeat {
    pub seat_number: String,
    #[serde(default = "default_seat_type")]
    pub seat_type: String,
    #[serde(default = "default_multiplier")]
    pub price_multiplier: Decimal,
}

impl NewSeat {
    pub fn standard(seat_number: impl Into<String>) -> Self {
        Self {
            seat_number: seat_number.into(),
            seat_type: default_seat_type(),
            price_multiplier: Decimal::ONE,
        }
    }
}

fn default_seat_type() -> String {
    "standard".to_string()
}

fn default_multiplier() -> Decimal {
    Decimal::ONE
}
