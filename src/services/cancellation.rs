//! Освобождение мест: отмена брони пользователем, истечение неоплаченной брони
//! и отказ платежа. Все три пути дают одинаковый эффект на места и счётчик
//! события и отличаются только допустимым исходным статусом.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::{BookingError, BookingResult};
use crate::models::{Booking, BookingStatus, Event, Payment, PaymentStatus, Refund, Requester};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Отмена подтверждённой брони владельцем или администратором.
    Cancellation(Requester),
    /// Неоплаченная бронь не была подтверждена вовремя.
    Expiry,
    /// Платёжный шлюз сообщил об отказе.
    PaymentFailed,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::Cancellation(_) => "cancellation",
            ReleaseReason::Expiry => "expiry",
            ReleaseReason::PaymentFailed => "payment_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPlan {
    pub payment_id: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleasePlan {
    pub booking_id: i64,
    pub event_id: i64,
    pub seat_ids: Vec<i64>,
    pub cancelled_at: DateTime<Utc>,
    pub refund: Option<RefundPlan>,
}

impl ReleasePlan {
    pub fn seat_count(&self) -> i32 {
        self.seat_ids.len() as i32
    }
}

/// Результат освобождения, возвращаемый хранилищем после коммита.
#[derive(Debug, Clone, PartialEq)]
pub struct Released {
    pub booking: Booking,
    pub released_seat_ids: Vec<i64>,
    pub refund: Option<Refund>,
}

/// Проверяет правила освобождения на заблокированных строках брони и события.
///
/// Порядок проверок: права, статус брони, время начала события.
pub fn plan_release(
    booking: &Booking,
    event: &Event,
    mut seat_ids: Vec<i64>,
    payment: Option<&Payment>,
    reason: ReleaseReason,
    now: DateTime<Utc>,
) -> BookingResult<ReleasePlan> {
    match reason {
        ReleaseReason::Cancellation(requester) => {
            if !requester.may_manage(booking.user_id) {
                return Err(BookingError::forbidden(format!(
                    "booking {} belongs to another user",
                    booking.id
                )));
            }
            match booking.status {
                BookingStatus::Confirmed => {}
                BookingStatus::Cancelled => {
                    return Err(BookingError::invalid_state(format!(
                        "booking {} is already cancelled",
                        booking.id
                    )));
                }
                BookingStatus::Pending => {
                    return Err(BookingError::invalid_state(format!(
                        "booking {} is not confirmed; unpaid bookings are released on expiry",
                        booking.id
                    )));
                }
            }
            if event.has_started(now) {
                return Err(BookingError::invalid_state(format!(
                    "event {} has already started",
                    event.id
                )));
            }
        }
        ReleaseReason::Expiry | ReleaseReason::PaymentFailed => {
            if booking.status != BookingStatus::Pending {
                return Err(BookingError::invalid_state(format!(
                    "booking {} is {}, only pending bookings can expire",
                    booking.id, booking.status
                )));
            }
        }
    }

    let refund = payment
        .filter(|p| p.status == PaymentStatus::Captured)
        .map(|p| RefundPlan {
            payment_id: p.id,
            amount: p.amount,
        });

    seat_ids.sort_unstable();

    Ok(ReleasePlan {
        booking_id: booking.id,
        event_id: event.id,
        seat_ids,
        cancelled_at: now,
        refund,
    })
}
