pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BookingResult;
use crate::models::{
    Booking, BookingDetails, BookingStatus, BookingSummary, Event, NewEvent, NewSeat, Payment,
    PaymentOutcome, Refund, Requester, Seat,
};
use crate::services::cancellation::{ReleaseReason, Released};
use crate::services::lifecycle::ConfirmOutcome;
use crate::services::reservation::ReservationRequest;

/// Результат обработки события платежа.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecorded {
    pub payment: Payment,
    pub booking_status: BookingStatus,
    pub released: Option<Released>,
}

/// Транзакционное хранилище мест и броней.
///
/// Каждый изменяющий метод - одна атомарная единица работы: предусловия
/// проверяются на заблокированных строках, и либо все записи видны после
/// коммита, либо ни одна.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn create_event(&self, event: NewEvent, layout: Vec<NewSeat>) -> BookingResult<(Event, Vec<Seat>)>;

    async fn reserve(&self, request: &ReservationRequest) -> BookingResult<BookingDetails>;

    async fn confirm(&self, booking_id: i64, requester: Requester) -> BookingResult<(Booking, ConfirmOutcome)>;

    async fn release(&self, booking_id: i64, reason: ReleaseReason, now: DateTime<Utc>) -> BookingResult<Released>;

    async fn open_payment(&self, booking_id: i64, requester: Requester) -> BookingResult<Payment>;

    /// Результат шлюза по ссылке платежа, выданной `open_payment`.
    async fn record_payment(
        &self,
        reference: Uuid,
        outcome: PaymentOutcome,
        now: DateTime<Utc>,
    ) -> BookingResult<PaymentRecorded>;

    async fn event(&self, event_id: i64) -> BookingResult<Event>;

    /// Места события; `is_booked` выводится из статуса брони-владельца.
    async fn seats_for_event(&self, event_id: i64) -> BookingResult<Vec<Seat>>;

    async fn booking(&self, booking_id: i64) -> BookingResult<BookingDetails>;

    async fn bookings_for_user(&self, user_id: i64, now: DateTime<Utc>) -> BookingResult<Vec<BookingSummary>>;

    /// Неподтверждённые брони, созданные не позже `cutoff`.
    async fn pending_bookings_before(&self, cutoff: DateTime<Utc>) -> BookingResult<Vec<i64>>;

    async fn payment_for_booking(&self, booking_id: i64) -> BookingResult<Option<Payment>>;

    async fn refunds_for_booking(&self, booking_id: i64) -> BookingResult<Vec<Refund>>;
}

/// Порядок списка "мои брони": предстоящие раньше прошедших, предстоящие по
/// возрастанию даты, прошедшие от последних к первым.
pub(crate) fn sort_user_bookings(bookings: &mut [BookingSummary], now: DateTime<Utc>) {
    bookings.sort_by(|a, b| {
        let a_upcoming = a.starts_at > now;
        let b_upcoming = b.starts_at > now;
        b_upcoming
            .cmp(&a_upcoming)
            .then_with(|| {
                if a_upcoming {
                    a.starts_at.cmp(&b.starts_at)
                } else {
                    b.starts_at.cmp(&a.starts_at)
                }
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}
