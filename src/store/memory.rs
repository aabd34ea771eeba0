use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{sort_user_bookings, InventoryStore, PaymentRecorded};
use crate::error::{BookingError, BookingResult};
use crate::models::{
    BookedSeat, Booking, BookingDetails, BookingStatus, BookingSummary, Event, NewEvent, NewSeat,
    Payment, PaymentOutcome, PaymentStatus, Refund, Requester, Seat,
};
use crate::services::cancellation::{plan_release, ReleaseReason, Released};
use crate::services::lifecycle::{authorize_confirm, can_transition, ConfirmOutcome};
use crate::services::payment::{plan_open_payment, plan_payment, BookingEffect, OpenPayment};
use crate::services::reservation::{plan_reservation, ReservationRequest};

const NO_FAULT: usize = usize::MAX;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    events: BTreeMap<i64, Event>,
    seats: BTreeMap<i64, Seat>,
    bookings: BTreeMap<i64, Booking>,
    booked_seats: Vec<BookedSeat>,
    /// Платежи по booking_id: не больше одного на бронь.
    payments: BTreeMap<i64, Payment>,
    refunds: Vec<Refund>,
    last_event_id: i64,
    last_seat_id: i64,
    last_booking_id: i64,
    last_payment_id: i64,
}

impl MemoryState {
    fn event(&self, event_id: i64) -> BookingResult<&Event> {
        self.events
            .get(&event_id)
            .ok_or_else(|| BookingError::not_found("event", event_id))
    }

    fn booking(&self, booking_id: i64) -> BookingResult<&Booking> {
        self.bookings
            .get(&booking_id)
            .ok_or_else(|| BookingError::not_found("booking", booking_id))
    }

    fn booked_seat_ids(&self, booking_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .booked_seats
            .iter()
            .filter(|bs| bs.booking_id == booking_id)
            .map(|bs| bs.seat_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn set_status(&mut self, booking_id: i64, status: BookingStatus, at: Option<DateTime<Utc>>) -> BookingResult<Booking> {
        let booking = self
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| BookingError::not_found("booking", booking_id))?;
        if !can_transition(booking.status, status) {
            return Err(BookingError::Storage(format!(
                "booking {booking_id} cannot move from {} to {status}",
                booking.status
            )));
        }
        booking.status = status;
        if at.is_some() {
            booking.cancelled_at = at;
        }
        Ok(booking.clone())
    }

    fn adjust_available(&mut self, event_id: i64, delta: i32) -> BookingResult<()> {
        let event = self
            .events
            .get_mut(&event_id)
            .ok_or_else(|| BookingError::not_found("event", event_id))?;
        let next = event.available_seats + delta;
        if next < 0 || next > event.total_seats {
            return Err(BookingError::Storage(format!(
                "available seats of event {event_id} would become {next}"
            )));
        }
        event.available_seats = next;
        Ok(())
    }

    fn release(&mut self, booking_id: i64, reason: ReleaseReason, now: DateTime<Utc>) -> BookingResult<Released> {
        let booking = self.booking(booking_id)?.clone();
        let event = self.event(booking.event_id)?.clone();
        let seat_ids = self.booked_seat_ids(booking_id);
        let payment = self.payments.get(&booking_id).cloned();

        let plan = plan_release(&booking, &event, seat_ids, payment.as_ref(), reason, now)?;

        let cancelled = self.set_status(plan.booking_id, BookingStatus::Cancelled, Some(plan.cancelled_at))?;

        for seat_id in &plan.seat_ids {
            let seat = self
                .seats
                .get_mut(seat_id)
                .filter(|s| s.is_booked)
                .ok_or_else(|| {
                    BookingError::Storage(format!(
                        "seat {seat_id} of booking {} is not marked booked",
                        plan.booking_id
                    ))
                })?;
            seat.is_booked = false;
        }
        self.adjust_available(plan.event_id, plan.seat_count())?;

        let refund = match plan.refund {
            Some(refund) => {
                if let Some(payment) = self.payments.get_mut(&booking_id) {
                    payment.status = PaymentStatus::Refunded;
                    payment.updated_at = now;
                }
                let entry = Refund {
                    id: Uuid::new_v4(),
                    payment_id: refund.payment_id,
                    booking_id,
                    amount: refund.amount,
                    created_at: now,
                };
                self.refunds.push(entry.clone());
                Some(entry)
            }
            None => None,
        };

        Ok(Released {
            booking: cancelled,
            released_seat_ids: plan.seat_ids,
            refund,
        })
    }
}

/// Хранилище в памяти процесса для тестов и локального запуска.
///
/// Всё состояние под одним `tokio::sync::Mutex`, что сериализует операции
/// так же, как блокировки строк в Postgres. Операция меняет черновую копию
/// состояния и публикует её только при успехе, поэтому ошибка на любом шаге
/// ничего не оставляет.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_after_seat_writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            fail_after_seat_writes: AtomicUsize::new(NO_FAULT),
        }
    }

    /// Следующее бронирование упадёт после `writes` записей в booked_seats.
    pub fn fail_after_seat_writes(&self, writes: usize) {
        self.fail_after_seat_writes.store(writes, Ordering::SeqCst);
    }

    /// Помечает событие отменённым (отмена событий - забота внешнего сервиса).
    pub async fn cancel_event(&self, event_id: i64) -> BookingResult<()> {
        self.transact(|state| {
            let event = state
                .events
                .get_mut(&event_id)
                .ok_or_else(|| BookingError::not_found("event", event_id))?;
            event.is_cancelled = true;
            Ok(())
        })
        .await
    }

    /// Сдвигает время начала события.
    pub async fn reschedule_event(&self, event_id: i64, starts_at: DateTime<Utc>) -> BookingResult<()> {
        self.transact(|state| {
            let event = state
                .events
                .get_mut(&event_id)
                .ok_or_else(|| BookingError::not_found("event", event_id))?;
            event.starts_at = starts_at;
            Ok(())
        })
        .await
    }

    /// Сдвигает время создания брони, чтобы она попала под истечение.
    pub async fn backdate_booking(&self, booking_id: i64, created_at: DateTime<Utc>) -> BookingResult<()> {
        self.transact(|state| {
            let booking = state
                .bookings
                .get_mut(&booking_id)
                .ok_or_else(|| BookingError::not_found("booking", booking_id))?;
            booking.created_at = created_at;
            Ok(())
        })
        .await
    }

    /// Места события в том виде, в каком они хранятся (флаг `is_booked` без пересчёта).
    pub async fn stored_seats(&self, event_id: i64) -> Vec<Seat> {
        let state = self.state.lock().await;
        state
            .seats
            .values()
            .filter(|s| s.event_id == event_id)
            .cloned()
            .collect()
    }

    async fn transact<T>(&self, op: impl FnOnce(&mut MemoryState) -> BookingResult<T>) -> BookingResult<T> {
        let mut guard = self.state.lock().await;
        let mut draft = guard.clone();
        let out = op(&mut draft)?;
        *guard = draft;
        Ok(out)
    }

    fn check_seat_write_fault(&self, written: usize) -> BookingResult<()> {
        let limit = self.fail_after_seat_writes.load(Ordering::SeqCst);
        if limit != NO_FAULT && written >= limit {
            self.fail_after_seat_writes.store(NO_FAULT, Ordering::SeqCst);
            return Err(BookingError::Storage(format!(
                "injected failure after {written} seat writes"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn create_event(&self, event: NewEvent, layout: Vec<NewSeat>) -> BookingResult<(Event, Vec<Seat>)> {
        self.transact(|state| {
            state.last_event_id += 1;
            let created = Event {
                id: state.last_event_id,
                title: event.title,
                price: event.price,
                total_seats: layout.len() as i32,
                available_seats: layout.len() as i32,
                is_cancelled: false,
                starts_at: event.starts_at,
            };

            let mut seats = Vec::with_capacity(layout.len());
            for new_seat in layout {
                if seats.iter().any(|s: &Seat| s.seat_number == new_seat.seat_number) {
                    return Err(BookingError::validation(format!(
                        "seat number {} is duplicated",
                        new_seat.seat_number
                    )));
                }
                state.last_seat_id += 1;
                let seat = Seat {
                    id: state.last_seat_id,
                    event_id: created.id,
                    seat_number: new_seat.seat_number,
                    seat_type: new_seat.seat_type,
                    price_multiplier: new_seat.price_multiplier,
                    is_booked: false,
                };
                state.seats.insert(seat.id, seat.clone());
                seats.push(seat);
            }

            state.events.insert(created.id, created.clone());
            Ok((created, seats))
        })
        .await
    }

    async fn reserve(&self, request: &ReservationRequest) -> BookingResult<BookingDetails> {
        self.transact(|state| {
            let event = state.event(request.event_id)?.clone();
            let seats: Vec<Seat> = request
                .seat_ids
                .iter()
                .filter_map(|id| state.seats.get(id))
                .cloned()
                .collect();

            let plan = plan_reservation(request, &event, &seats)?;

            state.last_booking_id += 1;
            let booking = Booking {
                id: state.last_booking_id,
                user_id: plan.user_id,
                event_id: plan.event_id,
                total_amount: plan.total_amount,
                status: plan.status,
                created_at: Utc::now(),
                cancelled_at: None,
            };
            state.bookings.insert(booking.id, booking.clone());

            let mut booked = Vec::with_capacity(plan.lines.len());
            for line in &plan.lines {
                self.check_seat_write_fault(booked.len())?;
                let row = BookedSeat {
                    booking_id: booking.id,
                    seat_id: line.seat_id,
                    price_paid: line.price_paid,
                };
                state.booked_seats.push(row.clone());
                booked.push(row);
            }

            for seat_id in plan.seat_ids() {
                if let Some(seat) = state.seats.get_mut(&seat_id) {
                    seat.is_booked = true;
                }
            }
            state.adjust_available(plan.event_id, -plan.seat_count())?;

            Ok(BookingDetails {
                booking,
                seats: booked,
            })
        })
        .await
    }

    async fn confirm(&self, booking_id: i64, requester: Requester) -> BookingResult<(Booking, ConfirmOutcome)> {
        self.transact(|state| {
            let booking = state.booking(booking_id)?.clone();
            let outcome = authorize_confirm(&booking, requester)?;
            let booking = match outcome {
                ConfirmOutcome::Confirmed => state.set_status(booking_id, BookingStatus::Confirmed, None)?,
                ConfirmOutcome::AlreadyConfirmed => booking,
            };
            Ok((booking, outcome))
        })
        .await
    }

    async fn release(&self, booking_id: i64, reason: ReleaseReason, now: DateTime<Utc>) -> BookingResult<Released> {
        self.transact(|state| state.release(booking_id, reason, now)).await
    }

    async fn open_payment(&self, booking_id: i64, requester: Requester) -> BookingResult<Payment> {
        self.transact(|state| {
            let booking = state.booking(booking_id)?.clone();
            let existing = state.payments.get(&booking_id).cloned();

            match plan_open_payment(&booking, existing.as_ref(), requester)? {
                OpenPayment::Create { amount } => {
                    state.last_payment_id += 1;
                    let now = Utc::now();
                    let payment = Payment {
                        id: state.last_payment_id,
                        reference: Uuid::new_v4(),
                        booking_id,
                        amount,
                        status: PaymentStatus::Created,
                        created_at: now,
                        updated_at: now,
                    };
                    state.payments.insert(booking_id, payment.clone());
                    Ok(payment)
                }
                OpenPayment::Reuse => existing.ok_or_else(|| {
                    BookingError::Storage(format!("payment for booking {booking_id} disappeared"))
                }),
            }
        })
        .await
    }

    async fn record_payment(
        &self,
        reference: Uuid,
        outcome: PaymentOutcome,
        now: DateTime<Utc>,
    ) -> BookingResult<PaymentRecorded> {
        self.transact(|state| {
            let booking_id = state
                .payments
                .values()
                .find(|p| p.reference == reference)
                .map(|p| p.booking_id)
                .ok_or_else(|| BookingError::not_found("payment", reference))?;
            let booking = state.booking(booking_id)?.clone();
            let existing = state.payments.get(&booking_id).cloned();
            let plan = plan_payment(&booking, existing.as_ref(), outcome)?;

            let payment = state
                .payments
                .get_mut(&booking_id)
                .ok_or_else(|| BookingError::not_found("payment", reference))?;
            payment.amount = plan.amount;
            payment.status = plan.status;
            payment.updated_at = now;
            let payment = payment.clone();

            let (booking_status, released) = match plan.booking_effect {
                BookingEffect::Confirm => {
                    let confirmed = state.set_status(booking_id, BookingStatus::Confirmed, None)?;
                    (confirmed.status, None)
                }
                BookingEffect::Release => {
                    let released = state.release(booking_id, ReleaseReason::PaymentFailed, now)?;
                    (released.booking.status, Some(released))
                }
                BookingEffect::Unchanged => (booking.status, None),
            };

            Ok(PaymentRecorded {
                payment,
                booking_status,
                released,
            })
        })
        .await
    }

    async fn event(&self, event_id: i64) -> BookingResult<Event> {
        let state = self.state.lock().await;
        state.event(event_id).cloned()
    }

    async fn seats_for_event(&self, event_id: i64) -> BookingResult<Vec<Seat>> {
        let state = self.state.lock().await;
        state.event(event_id)?;

        let seats = state
            .seats
            .values()
            .filter(|s| s.event_id == event_id)
            .map(|seat| {
                let held = state.booked_seats.iter().any(|bs| {
                    bs.seat_id == seat.id
                        && state
                            .bookings
                            .get(&bs.booking_id)
                            .is_some_and(|b| b.status.holds_seats())
                });
                Seat {
                    is_booked: held,
                    ..seat.clone()
                }
            })
            .collect();
        Ok(seats)
    }

    async fn booking(&self, booking_id: i64) -> BookingResult<BookingDetails> {
        let state = self.state.lock().await;
        let booking = state.booking(booking_id)?.clone();
        let mut seats: Vec<BookedSeat> = state
            .booked_seats
            .iter()
            .filter(|bs| bs.booking_id == booking_id)
            .cloned()
            .collect();
        seats.sort_by_key(|bs| bs.seat_id);
        Ok(BookingDetails { booking, seats })
    }

    async fn bookings_for_user(&self, user_id: i64, now: DateTime<Utc>) -> BookingResult<Vec<BookingSummary>> {
        let state = self.state.lock().await;
        let mut rows = Vec::new();
        for booking in state.bookings.values().filter(|b| b.user_id == user_id) {
            let event = state.event(booking.event_id)?;
            rows.push(BookingSummary {
                id: booking.id,
                event_id: booking.event_id,
                event_title: event.title.clone(),
                starts_at: event.starts_at,
                total_amount: booking.total_amount,
                status: booking.status,
                seat_count: state.booked_seat_ids(booking.id).len() as i64,
                created_at: booking.created_at,
            });
        }
        sort_user_bookings(&mut rows, now);
        Ok(rows)
    }

    async fn pending_bookings_before(&self, cutoff: DateTime<Utc>) -> BookingResult<Vec<i64>> {
        let state = self.state.lock().await;
        let mut pending: Vec<&Booking> = state
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.created_at <= cutoff)
            .collect();
        pending.sort_by_key(|b| (b.created_at, b.id));
        Ok(pending.into_iter().map(|b| b.id).collect())
    }

    async fn payment_for_booking(&self, booking_id: i64) -> BookingResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.payments.get(&booking_id).cloned())
    }

    async fn refunds_for_booking(&self, booking_id: i64) -> BookingResult<Vec<Refund>> {
        let state = self.state.lock().await;
        Ok(state
            .refunds
            .iter()
            .filter(|r| r.booking_id == booking_id)
            .cloned()
            .collect())
    }
}
