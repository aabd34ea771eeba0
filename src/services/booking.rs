use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BookingConfig;
use crate::error::{BookingError, BookingResult};
use crate::models::{
    AvailabilitySummary, Booking, BookingDetails, BookingStatus, BookingSummary, Event, NewEvent,
    NewSeat, Payment, PaymentOutcome, Requester, Seat,
};
use crate::services::availability;
use crate::services::cancellation::{ReleaseReason, Released};
use crate::services::catalog;
use crate::services::lifecycle::ConfirmOutcome;
use crate::services::reservation::{validate_selection, ReservationRequest};
use crate::store::{InventoryStore, PaymentRecorded};

/// Точка входа для контроллеров и фоновых задач.
///
/// Сам сервис состояния не хранит: единственный источник правды - хранилище,
/// каждая операция которого выполняется в отдельной транзакции.
#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn InventoryStore>,
    settings: BookingConfig,
}

fn log_rejection(operation: &str, id: impl std::fmt::Display, err: &BookingError) {
    match err {
        BookingError::SeatUnavailable { seat_ids } => {
            warn!("{} {}: seats {:?} are no longer available", operation, id, seat_ids)
        }
        e if e.is_internal() => tracing::error!("{} {} failed: {:?}", operation, id, e),
        e => debug!("{} {} rejected: {}", operation, id, e),
    }
}

impl BookingService {
    pub fn new(store: Arc<dyn InventoryStore>, settings: BookingConfig) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &BookingConfig {
        &self.settings
    }

    fn initial_status(&self) -> BookingStatus {
        if self.settings.direct_confirm {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        }
    }

    pub async fn create_event(
        &self,
        requester: Requester,
        event: NewEvent,
        layout: Vec<NewSeat>,
    ) -> BookingResult<(Event, Vec<Seat>)> {
        catalog::validate_layout(requester, &event, &layout, Utc::now())?;
        let (event, seats) = self.store.create_event(event, layout).await?;
        info!("Event {} created with {} seats", event.id, seats.len());
        Ok((event, seats))
    }

    /// Бронирует места. Победитель гонки за место - та транзакция, что
    /// закоммитилась первой; проигравший получает `SeatUnavailable`.
    /// Повторных попыток на сервере нет: клиент сам выбирает другие места.
    pub async fn reserve(
        &self,
        requester: Requester,
        event_id: i64,
        seat_ids: Vec<i64>,
    ) -> BookingResult<BookingDetails> {
        validate_selection(&seat_ids)?;

        let request = ReservationRequest {
            event_id,
            user_id: requester.user_id,
            seat_ids,
            initial_status: self.initial_status(),
        };

        match self.store.reserve(&request).await {
            Ok(details) => {
                info!(
                    "Booking {} created for user {} on event {}: seats {:?}, total {}, status {}",
                    details.booking.id,
                    requester.user_id,
                    event_id,
                    details.seat_ids(),
                    details.booking.total_amount,
                    details.booking.status
                );
                Ok(details)
            }
            Err(e) => {
                log_rejection("reserve on event", event_id, &e);
                Err(e)
            }
        }
    }

    pub async fn confirm(&self, requester: Requester, booking_id: i64) -> BookingResult<Booking> {
        let (booking, outcome) = self
            .store
            .confirm(booking_id, requester)
            .await
            .inspect_err(|e| log_rejection("confirm booking", booking_id, e))?;

        match outcome {
            ConfirmOutcome::Confirmed => info!("Booking {} confirmed", booking_id),
            ConfirmOutcome::AlreadyConfirmed => debug!("Booking {} was already confirmed", booking_id),
        }
        Ok(booking)
    }

    /// Отмена подтверждённой брони владельцем или администратором.
    pub async fn cancel(&self, requester: Requester, booking_id: i64) -> BookingResult<Released> {
        self.release(booking_id, ReleaseReason::Cancellation(requester)).await
    }

    /// Истечение неоплаченной брони (вызывается фоновой задачей).
    pub async fn expire(&self, booking_id: i64) -> BookingResult<Released> {
        self.release(booking_id, ReleaseReason::Expiry).await
    }

    async fn release(&self, booking_id: i64, reason: ReleaseReason) -> BookingResult<Released> {
        let released = self
            .store
            .release(booking_id, reason, Utc::now())
            .await
            .inspect_err(|e| log_rejection(reason.as_str(), booking_id, e))?;

        info!(
            "Booking {} cancelled ({}): released seats {:?}{}",
            booking_id,
            reason.as_str(),
            released.released_seat_ids,
            released
                .refund
                .as_ref()
                .map(|r| format!(", refund {} recorded", r.amount))
                .unwrap_or_default()
        );
        Ok(released)
    }

    pub async fn open_payment(&self, requester: Requester, booking_id: i64) -> BookingResult<Payment> {
        let payment = self
            .store
            .open_payment(booking_id, requester)
            .await
            .inspect_err(|e| log_rejection("open payment for booking", booking_id, e))?;
        info!("Payment {} open for booking {}", payment.id, booking_id);
        Ok(payment)
    }

    /// Результат платежа от внешнего шлюза по ссылке, выданной `open_payment`.
    pub async fn record_payment(&self, reference: Uuid, outcome: PaymentOutcome) -> BookingResult<PaymentRecorded> {
        let recorded = self
            .store
            .record_payment(reference, outcome, Utc::now())
            .await
            .inspect_err(|e| log_rejection("record payment", reference, e))?;

        info!(
            "Payment {} for booking {} is {:?}, booking is {}",
            recorded.payment.id, recorded.payment.booking_id, recorded.payment.status, recorded.booking_status
        );
        Ok(recorded)
    }

    pub async fn seats_for_event(&self, event_id: i64) -> BookingResult<Vec<Seat>> {
        self.store.seats_for_event(event_id).await
    }

    pub async fn available_count(&self, event_id: i64) -> BookingResult<i32> {
        Ok(self.store.event(event_id).await?.available_seats)
    }

    pub async fn availability(&self, event_id: i64) -> BookingResult<AvailabilitySummary> {
        let event = self.store.event(event_id).await?;
        Ok(availability::summarize(&event))
    }

    pub async fn booking(&self, requester: Requester, booking_id: i64) -> BookingResult<BookingDetails> {
        let details = self.store.booking(booking_id).await?;
        if !requester.may_manage(details.booking.user_id) {
            return Err(BookingError::forbidden(format!(
                "booking {booking_id} belongs to another user"
            )));
        }
        Ok(details)
    }

    pub async fn bookings_for_user(&self, requester: Requester) -> BookingResult<Vec<BookingSummary>> {
        self.store.bookings_for_user(requester.user_id, Utc::now()).await
    }

    /// Неподтверждённые брони старше окна ожидания оплаты.
    pub async fn stale_pending_bookings(&self, now: DateTime<Utc>) -> BookingResult<Vec<i64>> {
        let minutes = i64::from(self.settings.pending_ttl_minutes.max(1));
        let cutoff = TimeDelta::try_minutes(minutes)
            .and_then(|ttl| now.checked_sub_signed(ttl))
            .ok_or_else(|| BookingError::validation(format!("pending ttl of {minutes} minutes is out of range")))?;
        self.store.pending_bookings_before(cutoff).await
    }

    pub async fn payment_for_booking(&self, booking_id: i64) -> BookingResult<Option<Payment>> {
        self.store.payment_for_booking(booking_id).await
    }
}
