//! Проекция доступности мест для отображения.
//!
//! Источник данных только авторитетные поля `seats.is_booked` и
//! `events.available_seats`, которые пишутся в транзакциях бронирования и
//! отмены. Отдельного кеша, который мог бы разойтись с ними, нет.

use crate::models::{AvailabilitySummary, Event, Seat};

pub fn summarize(event: &Event) -> AvailabilitySummary {
    AvailabilitySummary {
        event_id: event.id,
        total_seats: event.total_seats,
        booked_seats: event.total_seats - event.available_seats,
        available_seats: event.available_seats,
    }
}

pub fn booked_count(seats: &[Seat]) -> i32 {
    seats.iter().filter(|s| s.is_booked).count() as i32
}

/// `available_seats == total_seats - count(is_booked)`.
pub fn counter_matches(event: &Event, seats: &[Seat]) -> bool {
    event.available_seats >= 0
        && event.total_seats == seats.len() as i32
        && event.available_seats == event.total_seats - booked_count(seats)
}
