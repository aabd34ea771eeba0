#![allow(dead_code)]

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use seat_reservation::config::BookingConfig;
use seat_reservation::models::{Event, NewEvent, NewSeat, Requester, Role, Seat};
use seat_reservation::services::availability;
use seat_reservation::services::BookingService;
use seat_reservation::store::{InventoryStore, MemoryStore};

pub const ORGANIZER: Requester = Requester {
    user_id: 900,
    role: Role::Organizer,
};

pub fn booking_config(direct_confirm: bool) -> BookingConfig {
    BookingConfig {
        direct_confirm,
        ..BookingConfig::default()
    }
}

pub fn service(store: &Arc<MemoryStore>, direct_confirm: bool) -> BookingService {
    BookingService::new(store.clone(), booking_config(direct_confirm))
}

/// Событие через сутки с местами заданных номеров и коэффициентом 1.
pub async fn seed_event(store: &MemoryStore, numbers: &[&str], price: Decimal) -> (Event, Vec<Seat>) {
    store
        .create_event(
            NewEvent {
                title: "Test event".to_string(),
                price,
                starts_at: Utc::now() + Duration::days(1),
            },
            numbers.iter().map(|n| NewSeat::standard(*n)).collect(),
        )
        .await
        .expect("seed event")
}

pub fn ids(seats: &[Seat]) -> Vec<i64> {
    seats.iter().map(|s| s.id).collect()
}

/// Счётчик события совпадает с флагами мест, а проекция совпадает с флагами.
pub async fn assert_consistent(store: &MemoryStore, event_id: i64) {
    let event = store.event(event_id).await.expect("event");
    let stored = store.stored_seats(event_id).await;
    assert!(
        availability::counter_matches(&event, &stored),
        "available_seats {} does not match seats {:?}",
        event.available_seats,
        stored
    );

    let projected = store.seats_for_event(event_id).await.expect("projection");
    let stored_flags: Vec<(i64, bool)> = stored.iter().map(|s| (s.id, s.is_booked)).collect();
    let projected_flags: Vec<(i64, bool)> = projected.iter().map(|s| (s.id, s.is_booked)).collect();
    assert_eq!(stored_flags, projected_flags, "projection drifted from stored seat flags");
}
