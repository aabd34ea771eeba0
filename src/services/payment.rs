//! Учёт платежей. Сам платёжный шлюз внешний: сюда приходят только его
//! результаты (успех или отказ), а модуль решает, как они меняют бронь.

use rust_decimal::Decimal;

use crate::error::{BookingError, BookingResult};
use crate::models::{Booking, BookingStatus, Payment, PaymentOutcome, PaymentStatus, Requester};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenPayment {
    Create { amount: Decimal },
    Reuse,
}

/// Открыть платёж можно только по своей неподтверждённой брони.
pub fn plan_open_payment(
    booking: &Booking,
    existing: Option<&Payment>,
    requester: Requester,
) -> BookingResult<OpenPayment> {
    if !requester.may_manage(booking.user_id) {
        return Err(BookingError::forbidden(format!(
            "booking {} belongs to another user",
            booking.id
        )));
    }
    if booking.status != BookingStatus::Pending {
        return Err(BookingError::invalid_state(format!(
            "booking {} is {}, payment can only be opened for pending bookings",
            booking.id, booking.status
        )));
    }
    match existing.map(|p| p.status) {
        None => Ok(OpenPayment::Create { amount: booking.total_amount }),
        Some(PaymentStatus::Created) => Ok(OpenPayment::Reuse),
        Some(status) => Err(BookingError::invalid_state(format!(
            "payment for booking {} is already {:?}",
            booking.id, status
        ))),
    }
}

/// Что происходит с бронью в ответ на событие платежа.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingEffect {
    Confirm,
    Release,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentPlan {
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub booking_effect: BookingEffect,
}

/// Результат шлюза принимается только для платежа, открытого через
/// [`plan_open_payment`]: без него бронь не подтверждается и не освобождается.
pub fn plan_payment(
    booking: &Booking,
    existing: Option<&Payment>,
    outcome: PaymentOutcome,
) -> BookingResult<PaymentPlan> {
    let payment = existing.ok_or_else(|| {
        BookingError::invalid_state(format!("no payment was opened for booking {}", booking.id))
    })?;
    if payment.booking_id != booking.id {
        return Err(BookingError::validation(format!(
            "payment {} does not belong to booking {}",
            payment.id, booking.id
        )));
    }
    let current = payment.status;

    match outcome {
        PaymentOutcome::Captured { amount } => {
            if amount != booking.total_amount {
                return Err(BookingError::validation(format!(
                    "captured amount {amount} does not match booking total {}",
                    booking.total_amount
                )));
            }
            if matches!(current, PaymentStatus::Refunded | PaymentStatus::Failed) {
                return Err(BookingError::invalid_state(format!(
                    "payment for booking {} is already closed",
                    booking.id
                )));
            }
            let booking_effect = match booking.status {
                BookingStatus::Pending => BookingEffect::Confirm,
                BookingStatus::Confirmed => BookingEffect::Unchanged,
                BookingStatus::Cancelled => {
                    return Err(BookingError::invalid_state(format!(
                        "booking {} is cancelled",
                        booking.id
                    )));
                }
            };
            Ok(PaymentPlan {
                status: PaymentStatus::Captured,
                amount,
                booking_effect,
            })
        }
        PaymentOutcome::Failed => {
            if matches!(current, PaymentStatus::Captured | PaymentStatus::Refunded) {
                return Err(BookingError::invalid_state(format!(
                    "payment for booking {} is already captured",
                    booking.id
                )));
            }
            let booking_effect = if booking.status == BookingStatus::Pending {
                BookingEffect::Release
            } else {
                BookingEffect::Unchanged
            };
            Ok(PaymentPlan {
                status: PaymentStatus::Failed,
                amount: payment.amount,
                booking_effect,
            })
        }
    }
}
