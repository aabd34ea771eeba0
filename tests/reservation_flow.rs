//! Сценарии бронирования, подтверждения и отмены поверх `MemoryStore`.

mod common;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use common::{assert_consistent, ids, seed_event, service};
use seat_reservation::error::BookingError;
use seat_reservation::models::{BookingStatus, NewSeat, PaymentOutcome, PaymentStatus, Requester};
use seat_reservation::services::ExpirySweeper;
use seat_reservation::store::{InventoryStore, MemoryStore};

const X: Requester = Requester { user_id: 1, role: seat_reservation::models::Role::User };
const Y: Requester = Requester { user_id: 2, role: seat_reservation::models::Role::User };

#[tokio::test]
async fn reserve_then_conflict_then_cancel() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, true);
    let (event, seats) = seed_event(&store, &["A1", "A2", "A3"], dec!(100)).await;
    let (a1, a2, a3) = (seats[0].id, seats[1].id, seats[2].id);

    let booking = svc.reserve(X, event.id, vec![a1, a2]).await.unwrap();
    assert_eq!(booking.booking.total_amount, dec!(200));
    assert_eq!(booking.booking.status, BookingStatus::Confirmed);
    assert_eq!(svc.available_count(event.id).await.unwrap(), 1);

    let err = svc.reserve(Y, event.id, vec![a2, a3]).await.unwrap_err();
    match err {
        BookingError::SeatUnavailable { seat_ids } => assert_eq!(seat_ids, vec![a2]),
        other => panic!("expected conflict, got {other:?}"),
    }
    // Проигравший запрос ничего не меняет: A3 по-прежнему свободно.
    assert_eq!(svc.available_count(event.id).await.unwrap(), 1);
    assert_consistent(&store, event.id).await;

    let released = svc.cancel(X, booking.booking.id).await.unwrap();
    assert_eq!(released.released_seat_ids, vec![a1, a2]);
    assert_eq!(released.booking.status, BookingStatus::Cancelled);
    assert!(released.booking.cancelled_at.is_some());
    assert_eq!(svc.available_count(event.id).await.unwrap(), 3);

    let projection = svc.seats_for_event(event.id).await.unwrap();
    assert!(projection.iter().all(|s| !s.is_booked));
    assert_consistent(&store, event.id).await;
}

#[tokio::test]
async fn booked_seat_snapshots_sum_to_total() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, false);
    let (event, seats) = store
        .create_event(
            seat_reservation::models::NewEvent {
                title: "Mixed hall".to_string(),
                price: dec!(80),
                starts_at: Utc::now() + Duration::days(2),
            },
            vec![
                NewSeat::standard("R1"),
                NewSeat {
                    seat_number: "VIP1".to_string(),
                    seat_type: "vip".to_string(),
                    price_multiplier: dec!(2.5),
                },
            ],
        )
        .await
        .unwrap();

    let details = svc.reserve(X, event.id, ids(&seats)).await.unwrap();
    let sum: rust_decimal::Decimal = details.seats.iter().map(|s| s.price_paid).sum();
    assert_eq!(details.booking.total_amount, dec!(280));
    assert_eq!(sum, details.booking.total_amount);
}

#[tokio::test]
async fn precondition_failures() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, false);
    let (event, seats) = seed_event(&store, &["A1", "A2"], dec!(50)).await;
    let (other, other_seats) = seed_event(&store, &["B1"], dec!(50)).await;

    assert!(matches!(
        svc.reserve(X, event.id, vec![]).await,
        Err(BookingError::Validation(_))
    ));
    assert!(matches!(
        svc.reserve(X, event.id, vec![seats[0].id, seats[0].id]).await,
        Err(BookingError::Validation(_))
    ));
    assert!(matches!(
        svc.reserve(X, 9999, vec![seats[0].id]).await,
        Err(BookingError::NotFound { entity: "event", .. })
    ));
    assert!(matches!(
        svc.reserve(X, event.id, vec![seats[0].id, other_seats[0].id]).await,
        Err(BookingError::Validation(_))
    ));
    assert!(matches!(
        svc.reserve(X, event.id, vec![seats[0].id, 99999]).await,
        Err(BookingError::NotFound { entity: "seat", .. })
    ));

    store.cancel_event(other.id).await.unwrap();
    assert!(matches!(
        svc.reserve(X, other.id, vec![other_seats[0].id]).await,
        Err(BookingError::InvalidState(_))
    ));

    assert_eq!(svc.available_count(event.id).await.unwrap(), 2);
    assert_consistent(&store, event.id).await;
}

#[tokio::test]
async fn confirm_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, false);
    let (event, seats) = seed_event(&store, &["A1"], dec!(100)).await;

    let booking = svc.reserve(X, event.id, ids(&seats)).await.unwrap();
    assert_eq!(booking.booking.status, BookingStatus::Pending);

    let first = svc.confirm(X, booking.booking.id).await.unwrap();
    let event_after_first = store.event(event.id).await.unwrap();
    let second = svc.confirm(X, booking.booking.id).await.unwrap();

    assert_eq!(first.status, BookingStatus::Confirmed);
    assert_eq!(first, second);
    assert_eq!(store.event(event.id).await.unwrap(), event_after_first);
    assert_consistent(&store, event.id).await;
}

#[tokio::test]
async fn pending_booking_is_not_user_cancellable() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, false);
    let (event, seats) = seed_event(&store, &["A1"], dec!(100)).await;

    let booking = svc.reserve(X, event.id, ids(&seats)).await.unwrap();
    assert!(matches!(
        svc.cancel(X, booking.booking.id).await,
        Err(BookingError::InvalidState(_))
    ));
    assert_eq!(svc.available_count(event.id).await.unwrap(), 0);
}

#[tokio::test]
async fn cancellation_rules() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, true);
    let (event, seats) = seed_event(&store, &["A1", "A2"], dec!(100)).await;

    let booking = svc.reserve(X, event.id, vec![seats[0].id]).await.unwrap();
    let id = booking.booking.id;

    assert!(matches!(svc.cancel(Y, id).await, Err(BookingError::Forbidden(_))));

    svc.cancel(Requester::admin(77), id).await.unwrap();
    assert!(matches!(svc.cancel(X, id).await, Err(BookingError::InvalidState(_))));
    assert_eq!(svc.available_count(event.id).await.unwrap(), 2);

    let late = svc.reserve(X, event.id, vec![seats[1].id]).await.unwrap();
    store
        .reschedule_event(event.id, Utc::now() - Duration::minutes(1))
        .await
        .unwrap();
    assert!(matches!(
        svc.cancel(X, late.booking.id).await,
        Err(BookingError::InvalidState(_))
    ));

    // Отказ оставляет бронь подтверждённой и место занятым.
    let still = svc.booking(X, late.booking.id).await.unwrap();
    assert_eq!(still.booking.status, BookingStatus::Confirmed);
    assert_eq!(svc.available_count(event.id).await.unwrap(), 1);
    assert_consistent(&store, event.id).await;
}

#[tokio::test]
async fn released_seats_can_be_rebooked_by_someone_else() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, true);
    let (event, seats) = seed_event(&store, &["A", "B", "C"], dec!(40)).await;
    let wanted = vec![seats[0].id, seats[1].id];

    let first = svc.reserve(X, event.id, wanted.clone()).await.unwrap();
    svc.cancel(X, first.booking.id).await.unwrap();
    let second = svc.reserve(Y, event.id, wanted.clone()).await.unwrap();

    // Та же картина, что и без первой брони.
    let fresh = Arc::new(MemoryStore::new());
    let fresh_svc = service(&fresh, true);
    let (fresh_event, fresh_seats) = seed_event(&fresh, &["A", "B", "C"], dec!(40)).await;
    fresh_svc
        .reserve(Y, fresh_event.id, vec![fresh_seats[0].id, fresh_seats[1].id])
        .await
        .unwrap();

    let flags = |seats: Vec<seat_reservation::models::Seat>| -> Vec<(String, bool)> {
        seats.into_iter().map(|s| (s.seat_number, s.is_booked)).collect()
    };
    assert_eq!(
        flags(store.stored_seats(event.id).await),
        flags(fresh.stored_seats(fresh_event.id).await)
    );
    assert_eq!(
        store.event(event.id).await.unwrap().available_seats,
        fresh.event(fresh_event.id).await.unwrap().available_seats
    );
    assert_eq!(second.booking.total_amount, dec!(80));
    assert_consistent(&store, event.id).await;
}

#[tokio::test]
async fn price_overflow_is_rejected_without_side_effects() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, false);
    let (event, seats) = store
        .create_event(
            seat_reservation::models::NewEvent {
                title: "Overpriced".to_string(),
                price: rust_decimal::Decimal::MAX,
                starts_at: Utc::now() + Duration::days(2),
            },
            vec![NewSeat {
                seat_number: "VIP1".to_string(),
                seat_type: "vip".to_string(),
                price_multiplier: dec!(2),
            }],
        )
        .await
        .unwrap();

    let err = svc.reserve(X, event.id, ids(&seats)).await.unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
    assert_eq!(svc.available_count(event.id).await.unwrap(), 1);
    assert_consistent(&store, event.id).await;
}

#[tokio::test]
async fn failure_midway_leaves_no_trace() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, false);
    let (event, seats) = seed_event(&store, &["A1", "A2", "A3"], dec!(100)).await;

    store.fail_after_seat_writes(1);
    let err = svc.reserve(X, event.id, ids(&seats)).await.unwrap_err();
    assert!(err.is_internal());
    assert_eq!(err.kind(), "internal_error");

    assert!(store.stored_seats(event.id).await.iter().all(|s| !s.is_booked));
    assert_eq!(svc.available_count(event.id).await.unwrap(), 3);
    assert!(svc.bookings_for_user(X).await.unwrap().is_empty());
    assert_consistent(&store, event.id).await;
}

#[tokio::test]
async fn captured_payment_confirms_and_cancellation_refunds() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, false);
    let (event, seats) = seed_event(&store, &["A1", "A2"], dec!(60)).await;

    let booking = svc.reserve(X, event.id, ids(&seats)).await.unwrap();
    let id = booking.booking.id;

    let payment = svc.open_payment(X, id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Created);
    assert_eq!(payment.amount, dec!(120));
    assert_eq!(svc.open_payment(X, id).await.unwrap().id, payment.id);

    assert!(matches!(
        svc.record_payment(payment.reference, PaymentOutcome::Captured { amount: dec!(100) }).await,
        Err(BookingError::Validation(_))
    ));

    let recorded = svc
        .record_payment(payment.reference, PaymentOutcome::Captured { amount: dec!(120) })
        .await
        .unwrap();
    assert_eq!(recorded.booking_status, BookingStatus::Confirmed);
    assert_eq!(recorded.payment.status, PaymentStatus::Captured);

    // Повторный вебхук ничего не ломает.
    let again = svc
        .record_payment(payment.reference, PaymentOutcome::Captured { amount: dec!(120) })
        .await
        .unwrap();
    assert_eq!(again.booking_status, BookingStatus::Confirmed);

    let released = svc.cancel(X, id).await.unwrap();
    let refund = released.refund.expect("refund entry");
    assert_eq!(refund.amount, dec!(120));
    assert_eq!(refund.payment_id, payment.id);

    let payment = svc.payment_for_booking(id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(store.refunds_for_booking(id).await.unwrap().len(), 1);
    assert_consistent(&store, event.id).await;
}

#[tokio::test]
async fn failed_payment_releases_pending_booking() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, false);
    let (event, seats) = seed_event(&store, &["A1", "A2"], dec!(60)).await;

    let booking = svc.reserve(X, event.id, vec![seats[0].id]).await.unwrap();
    let payment = svc.open_payment(X, booking.booking.id).await.unwrap();
    let recorded = svc
        .record_payment(payment.reference, PaymentOutcome::Failed)
        .await
        .unwrap();

    assert_eq!(recorded.booking_status, BookingStatus::Cancelled);
    assert_eq!(recorded.payment.status, PaymentStatus::Failed);
    assert_eq!(recorded.released.unwrap().released_seat_ids, vec![seats[0].id]);
    assert_eq!(svc.available_count(event.id).await.unwrap(), 2);

    assert!(matches!(
        svc.record_payment(payment.reference, PaymentOutcome::Captured { amount: dec!(60) }).await,
        Err(BookingError::InvalidState(_))
    ));
    assert_consistent(&store, event.id).await;
}

#[tokio::test]
async fn gateway_result_needs_an_opened_payment() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, false);
    let (event, seats) = seed_event(&store, &["A1", "A2"], dec!(60)).await;

    let victim = svc.reserve(X, event.id, vec![seats[0].id]).await.unwrap();
    let id = victim.booking.id;

    // Без открытого платежа никакая ссылка не найдёт бронь.
    for outcome in [PaymentOutcome::Captured { amount: dec!(60) }, PaymentOutcome::Failed] {
        assert!(matches!(
            svc.record_payment(uuid::Uuid::new_v4(), outcome).await,
            Err(BookingError::NotFound { entity: "payment", .. })
        ));
    }
    assert!(svc.payment_for_booking(id).await.unwrap().is_none());

    // Ссылка чужого платежа двигает только свою бронь.
    let other = svc.reserve(Y, event.id, vec![seats[1].id]).await.unwrap();
    let payment = svc.open_payment(Y, other.booking.id).await.unwrap();
    let recorded = svc
        .record_payment(payment.reference, PaymentOutcome::Failed)
        .await
        .unwrap();
    assert_eq!(recorded.payment.booking_id, other.booking.id);

    let untouched = svc.booking(X, id).await.unwrap();
    assert_eq!(untouched.booking.status, BookingStatus::Pending);
    assert_eq!(svc.available_count(event.id).await.unwrap(), 1);
    assert_consistent(&store, event.id).await;
}

#[tokio::test]
async fn sweeper_expires_only_stale_pending_bookings() {
    let store = Arc::new(MemoryStore::new());
    let pending_svc = service(&store, false);
    let direct_svc = service(&store, true);
    let (event, seats) = seed_event(&store, &["A1", "A2", "A3"], dec!(10)).await;

    let stale = pending_svc.reserve(X, event.id, vec![seats[0].id]).await.unwrap();
    let fresh = pending_svc.reserve(Y, event.id, vec![seats[1].id]).await.unwrap();
    let confirmed = direct_svc.reserve(Y, event.id, vec![seats[2].id]).await.unwrap();

    for id in [stale.booking.id, confirmed.booking.id] {
        store
            .backdate_booking(id, Utc::now() - Duration::hours(1))
            .await
            .unwrap();
    }

    let stats = ExpirySweeper::new(pending_svc.clone()).sweep_once().await;
    assert_eq!(stats.found, 1);
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.seats_released, 1);

    let statuses = pending_svc.bookings_for_user(Y).await.unwrap();
    assert!(statuses.iter().all(|b| b.status != BookingStatus::Cancelled));
    assert_eq!(
        pending_svc.booking(X, stale.booking.id).await.unwrap().booking.status,
        BookingStatus::Cancelled
    );
    assert_eq!(
        pending_svc.booking(Y, fresh.booking.id).await.unwrap().booking.status,
        BookingStatus::Pending
    );
    assert_eq!(pending_svc.available_count(event.id).await.unwrap(), 1);
    assert_consistent(&store, event.id).await;

    // Второй проход ничего не находит.
    assert_eq!(ExpirySweeper::new(pending_svc).sweep_once().await.found, 0);
}

#[tokio::test]
async fn extreme_pending_ttl_keeps_fresh_bookings() {
    let store = Arc::new(MemoryStore::new());
    let svc = seat_reservation::services::BookingService::new(
        store.clone(),
        seat_reservation::config::BookingConfig {
            direct_confirm: false,
            pending_ttl_minutes: u32::MAX,
            sweep_interval_seconds: 1,
        },
    );
    let (event, seats) = seed_event(&store, &["A1"], dec!(10)).await;

    let booking = svc.reserve(X, event.id, ids(&seats)).await.unwrap();
    let stats = ExpirySweeper::new(svc.clone()).sweep_once().await;
    assert_eq!(stats.found, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        svc.booking(X, booking.booking.id).await.unwrap().booking.status,
        BookingStatus::Pending
    );
}

#[tokio::test]
async fn bookings_are_private() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(&store, false);
    let (event, seats) = seed_event(&store, &["A1"], dec!(10)).await;

    let booking = svc.reserve(X, event.id, ids(&seats)).await.unwrap();
    assert!(matches!(
        svc.booking(Y, booking.booking.id).await,
        Err(BookingError::Forbidden(_))
    ));
    assert!(matches!(
        svc.confirm(Y, booking.booking.id).await,
        Err(BookingError::Forbidden(_))
    ));
    assert!(svc.booking(Requester::admin(5), booking.booking.id).await.is_ok());
}
