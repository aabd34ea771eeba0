use crate::error::{BookingError, BookingResult};
use crate::models::{Booking, BookingStatus, Requester};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    /// Повторное подтверждение ничего не меняет.
    AlreadyConfirmed,
}

/// Разрешённые переходы статуса брони.
pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled)
    )
}

/// Переход `pending -> confirmed`. Статус проверяется на заблокированной строке.
pub fn confirm_transition(booking: &Booking) -> BookingResult<ConfirmOutcome> {
    match booking.status {
        BookingStatus::Pending => Ok(ConfirmOutcome::Confirmed),
        BookingStatus::Confirmed => Ok(ConfirmOutcome::AlreadyConfirmed),
        BookingStatus::Cancelled => Err(BookingError::invalid_state(format!(
            "booking {} is cancelled and cannot be confirmed",
            booking.id
        ))),
    }
}

/// Явное подтверждение от имени пользователя.
pub fn authorize_confirm(booking: &Booking, requester: Requester) -> BookingResult<ConfirmOutcome> {
    if !requester.may_manage(booking.user_id) {
        return Err(BookingError::forbidden(format!(
            "booking {} belongs to another user",
            booking.id
        )));
    }
    confirm_transition(booking)
}
