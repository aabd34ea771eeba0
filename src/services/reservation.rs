//! Правила бронирования мест.
//!
//! Здесь нет ввода-вывода: хранилище блокирует событие и запрошенные места в
//! своей транзакции, передаёт заблокированные строки в [`plan_reservation`] и
//! применяет полученный план. Проверка "место свободно" и запись выполняются в
//! одной транзакции, поэтому два параллельных запроса не могут оба пройти её
//! для одного и того же места.

use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::error::{BookingError, BookingResult};
use crate::models::{BookingStatus, Event, Seat};

/// Запрос на бронирование набора мест одного события.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRequest {
    pub event_id: i64,
    pub user_id: i64,
    pub seat_ids: Vec<i64>,
    /// `pending` для оплаты через шлюз, `confirmed` для прямого оформления.
    pub initial_status: BookingStatus,
}

/// Строка брони: место и зафиксированная цена.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatLine {
    pub seat_id: i64,
    pub price_paid: Decimal,
}

/// Всё, что хранилище должно записать в рамках одной транзакции.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationPlan {
    pub event_id: i64,
    pub user_id: i64,
    pub status: BookingStatus,
    pub total_amount: Decimal,
    pub lines: Vec<SeatLine>,
}

impl ReservationPlan {
    pub fn seat_ids(&self) -> Vec<i64> {
        self.lines.iter().map(|l| l.seat_id).collect()
    }

    pub fn seat_count(&self) -> i32 {
        self.lines.len() as i32
    }
}

/// Список мест не пуст, идентификаторы положительные и не повторяются.
pub fn validate_selection(seat_ids: &[i64]) -> BookingResult<()> {
    if seat_ids.is_empty() {
        return Err(BookingError::validation("seat_ids must not be empty"));
    }

    if let Some(bad) = seat_ids.iter().find(|id| **id <= 0) {
        return Err(BookingError::validation(format!("invalid seat id {bad}")));
    }

    let mut seen = HashSet::with_capacity(seat_ids.len());
    let mut duplicates: Vec<i64> = seat_ids
        .iter()
        .copied()
        .filter(|id| !seen.insert(*id))
        .collect();
    if !duplicates.is_empty() {
        duplicates.sort_unstable();
        duplicates.dedup();
        return Err(BookingError::validation(format!(
            "seat_ids contain duplicates: {duplicates:?}"
        )));
    }

    Ok(())
}

/// Наибольшая сумма, которая помещается в `NUMERIC(12, 2)`.
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999, 2)
}

fn amount_in_range(amount: Option<Decimal>, what: impl FnOnce() -> String) -> BookingResult<Decimal> {
    match amount {
        Some(value) if value <= max_amount() => Ok(value),
        _ => Err(BookingError::validation(format!(
            "{} exceeds the maximum amount {}",
            what(),
            max_amount()
        ))),
    }
}

/// Цена места: базовая цена события, умноженная на коэффициент места,
/// округлённая до копеек.
pub fn seat_price(event: &Event, seat: &Seat) -> BookingResult<Decimal> {
    amount_in_range(
        event.price.checked_mul(seat.price_multiplier).map(|p| p.round_dp(2)),
        || format!("price of seat {}", seat.id),
    )
}

/// Проверяет событие и места на заблокированных строках и считает стоимость.
///
/// `locked_seats` - места, найденные хранилищем по `seat_ids` без фильтра по
/// событию: несуществующий id даёт `NotFound`, место другого события -
/// ошибку валидации.
pub fn plan_reservation(
    request: &ReservationRequest,
    event: &Event,
    locked_seats: &[Seat],
) -> BookingResult<ReservationPlan> {
    validate_selection(&request.seat_ids)?;

    if event.id != request.event_id {
        return Err(BookingError::validation(format!(
            "event {} does not match request for event {}",
            event.id, request.event_id
        )));
    }

    if event.is_cancelled {
        return Err(BookingError::invalid_state(format!(
            "event {} is cancelled",
            event.id
        )));
    }

    if !request.initial_status.holds_seats() {
        return Err(BookingError::validation(format!(
            "a booking cannot start as {}",
            request.initial_status
        )));
    }

    for seat_id in &request.seat_ids {
        match locked_seats.iter().find(|s| s.id == *seat_id) {
            None => return Err(BookingError::not_found("seat", seat_id)),
            Some(seat) if seat.event_id != event.id => {
                return Err(BookingError::validation(format!(
                    "seat {} belongs to event {}, not {}",
                    seat.id, seat.event_id, event.id
                )));
            }
            Some(_) => {}
        }
    }

    let mut taken: Vec<i64> = locked_seats
        .iter()
        .filter(|s| s.is_booked)
        .map(|s| s.id)
        .collect();
    if !taken.is_empty() {
        taken.sort_unstable();
        return Err(BookingError::SeatUnavailable { seat_ids: taken });
    }

    let mut lines = locked_seats
        .iter()
        .map(|seat| {
            Ok(SeatLine {
                seat_id: seat.id,
                price_paid: seat_price(event, seat)?,
            })
        })
        .collect::<BookingResult<Vec<SeatLine>>>()?;
    lines.sort_by_key(|l| l.seat_id);

    // Сумма считается из тех же строк, что пишутся в booked_seats.
    let total_amount = amount_in_range(
        lines
            .iter()
            .try_fold(Decimal::ZERO, |sum, line| sum.checked_add(line.price_paid)),
        || "booking total".to_string(),
    )?;

    Ok(ReservationPlan {
        event_id: event.id,
        user_id: request.user_id,
        status: request.initial_status,
        total_amount,
        lines,
    })
}
