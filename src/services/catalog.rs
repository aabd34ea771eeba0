use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::error::{BookingError, BookingResult};
use crate::models::{NewEvent, NewSeat, Requester};
use crate::services::reservation::max_amount;

/// Проверка схемы зала перед созданием события.
pub fn validate_layout(
    requester: Requester,
    event: &NewEvent,
    layout: &[NewSeat],
    now: DateTime<Utc>,
) -> BookingResult<()> {
    if !requester.may_publish_events() {
        return Err(BookingError::forbidden("only organizers and admins can create events"));
    }
    if event.title.trim().is_empty() {
        return Err(BookingError::validation("title must not be empty"));
    }
    if event.price < Decimal::ZERO {
        return Err(BookingError::validation("price must not be negative"));
    }
    if event.price > max_amount() || event.price.normalize().scale() > 2 {
        return Err(BookingError::validation(format!(
            "price must be at most {} with no more than 2 decimal places",
            max_amount()
        )));
    }
    if event.starts_at <= now {
        return Err(BookingError::validation("event must start in the future"));
    }
    if layout.is_empty() {
        return Err(BookingError::validation("seat layout must not be empty"));
    }

    let mut numbers = HashSet::with_capacity(layout.len());
    for seat in layout {
        if seat.seat_number.trim().is_empty() {
            return Err(BookingError::validation("seat number must not be empty"));
        }
        if seat.price_multiplier <= Decimal::ZERO {
            return Err(BookingError::validation(format!(
                "seat {} has non-positive price multiplier",
                seat.seat_number
            )));
        }
        // NUMERIC(6, 3)
        if seat.price_multiplier >= Decimal::ONE_THOUSAND || seat.price_multiplier.normalize().scale() > 3 {
            return Err(BookingError::validation(format!(
                "seat {} price multiplier must be below 1000 with no more than 3 decimal places",
                seat.seat_number
            )));
        }
        if !numbers.insert(seat.seat_number.as_str()) {
            return Err(BookingError::validation(format!(
                "seat number {} is duplicated",
                seat.seat_number
            )));
        }
    }

    Ok(())
}
