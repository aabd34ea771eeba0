use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{InventoryStore, PaymentRecorded};
use crate::database::Database;
use crate::error::{BookingError, BookingResult};
use crate::models::{
    BookedSeat, Booking, BookingDetails, BookingStatus, BookingSummary, Event, NewEvent, NewSeat,
    Payment, PaymentOutcome, Refund, Requester, Seat,
};
use crate::services::cancellation::{plan_release, ReleaseReason, Released};
use crate::services::lifecycle::{authorize_confirm, ConfirmOutcome};
use crate::services::payment::{plan_open_payment, plan_payment, BookingEffect, OpenPayment};
use crate::services::reservation::{plan_reservation, ReservationRequest};

/// Хранилище поверх Postgres.
///
/// Порядок блокировок во всех транзакциях один: бронь, платёж, событие,
/// места по возрастанию id. Транзакция `sqlx` откатывается при drop, поэтому
/// любой ранний выход через `?` не оставляет частичных изменений.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool.clone() }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn lock_event(conn: &mut PgConnection, event_id: i64) -> BookingResult<Event> {
    sqlx::query_as::<_, Event>(
        "SELECT id, title, price, total_seats, available_seats, is_cancelled, starts_at
         FROM events WHERE id = $1 FOR UPDATE",
    )
    .bind(event_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| BookingError::not_found("event", event_id))
}

async fn lock_booking(conn: &mut PgConnection, booking_id: i64) -> BookingResult<Booking> {
    sqlx::query_as::<_, Booking>(
        "SELECT id, user_id, event_id, total_amount, status, created_at, cancelled_at
         FROM bookings WHERE id = $1 FOR UPDATE",
    )
    .bind(booking_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| BookingError::not_found("booking", booking_id))
}

async fn lock_payment(conn: &mut PgConnection, booking_id: i64) -> BookingResult<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>(
        "SELECT id, reference, booking_id, amount, status, created_at, updated_at
         FROM payments WHERE booking_id = $1 FOR UPDATE",
    )
    .bind(booking_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(payment)
}

/// Освобождает места уже заблокированной брони внутри текущей транзакции.
async fn release_locked(
    conn: &mut PgConnection,
    booking: &Booking,
    reason: ReleaseReason,
    now: DateTime<Utc>,
) -> BookingResult<Released> {
    let payment = lock_payment(conn, booking.id).await?;
    let event = lock_event(conn, booking.event_id).await?;

    let seat_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT seat_id FROM booked_seats WHERE booking_id = $1 ORDER BY seat_id",
    )
    .bind(booking.id)
    .fetch_all(&mut *conn)
    .await?;

    let _locked: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM seats WHERE id = ANY($1) ORDER BY id FOR UPDATE",
    )
    .bind(&seat_ids)
    .fetch_all(&mut *conn)
    .await?;

    let plan = plan_release(booking, &event, seat_ids, payment.as_ref(), reason, now)?;

    let cancelled = sqlx::query_as::<_, Booking>(
        "UPDATE bookings SET status = $2, cancelled_at = $3
         WHERE id = $1
         RETURNING id, user_id, event_id, total_amount, status, created_at, cancelled_at",
    )
    .bind(plan.booking_id)
    .bind(BookingStatus::Cancelled)
    .bind(plan.cancelled_at)
    .fetch_one(&mut *conn)
    .await?;

    let freed = sqlx::query("UPDATE seats SET is_booked = FALSE WHERE id = ANY($1) AND is_booked = TRUE")
        .bind(&plan.seat_ids)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if freed != plan.seat_ids.len() as u64 {
        return Err(BookingError::Storage(format!(
            "booking {} holds {} seats but only {} were marked booked",
            plan.booking_id,
            plan.seat_ids.len(),
            freed
        )));
    }

    sqlx::query("UPDATE events SET available_seats = available_seats + $2 WHERE id = $1")
        .bind(plan.event_id)
        .bind(plan.seat_count())
        .execute(&mut *conn)
        .await?;

    let refund = match plan.refund {
        Some(refund) => {
            sqlx::query("UPDATE payments SET status = 'refunded', updated_at = $2 WHERE id = $1")
                .bind(refund.payment_id)
                .bind(now)
                .execute(&mut *conn)
                .await?;

            let entry = sqlx::query_as::<_, Refund>(
                "INSERT INTO refunds (id, payment_id, booking_id, amount, created_at)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING id, payment_id, booking_id, amount, created_at",
            )
            .bind(Uuid::new_v4())
            .bind(refund.payment_id)
            .bind(plan.booking_id)
            .bind(refund.amount)
            .bind(now)
            .fetch_one(&mut *conn)
            .await?;
            Some(entry)
        }
        None => None,
    };

    debug!(
        "booking {} released ({}), seats {:?}",
        plan.booking_id,
        reason.as_str(),
        plan.seat_ids
    );

    Ok(Released {
        booking: cancelled,
        released_seat_ids: plan.seat_ids,
        refund,
    })
}

async fn mark_confirmed(conn: &mut PgConnection, booking_id: i64) -> BookingResult<Booking> {
    let booking = sqlx::query_as::<_, Booking>(
        "UPDATE bookings SET status = 'confirmed'
         WHERE id = $1 AND status = 'pending'
         RETURNING id, user_id, event_id, total_amount, status, created_at, cancelled_at",
    )
    .bind(booking_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(booking)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn create_event(&self, event: NewEvent, layout: Vec<NewSeat>) -> BookingResult<(Event, Vec<Seat>)> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, Event>(
            "INSERT INTO events (title, price, total_seats, available_seats, starts_at)
             VALUES ($1, $2, $3, $3, $4)
             RETURNING id, title, price, total_seats, available_seats, is_cancelled, starts_at",
        )
        .bind(&event.title)
        .bind(event.price)
        .bind(layout.len() as i32)
        .bind(event.starts_at)
        .fetch_one(&mut *tx)
        .await?;

        let mut seats = Vec::with_capacity(layout.len());
        for seat in &layout {
            let row = sqlx::query_as::<_, Seat>(
                "INSERT INTO seats (event_id, seat_number, seat_type, price_multiplier)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id, event_id, seat_number, seat_type, price_multiplier, is_booked",
            )
            .bind(created.id)
            .bind(&seat.seat_number)
            .bind(&seat.seat_type)
            .bind(seat.price_multiplier)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    BookingError::validation(format!("seat number {} is duplicated", seat.seat_number))
                } else {
                    BookingError::Database(e)
                }
            })?;
            seats.push(row);
        }

        tx.commit().await?;
        Ok((created, seats))
    }

    async fn reserve(&self, request: &ReservationRequest) -> BookingResult<BookingDetails> {
        let mut tx = self.pool.begin().await?;

        let event = lock_event(&mut *tx, request.event_id).await?;

        // Чтение и проверка мест под блокировкой в той же транзакции, что и запись.
        // Места чужого события тоже читаются, чтобы отличить их от несуществующих.
        let seats = sqlx::query_as::<_, Seat>(
            "SELECT id, event_id, seat_number, seat_type, price_multiplier, is_booked
             FROM seats
             WHERE id = ANY($1)
             ORDER BY id
             FOR UPDATE",
        )
        .bind(&request.seat_ids)
        .fetch_all(&mut *tx)
        .await?;

        let plan = plan_reservation(request, &event, &seats)?;

        let booking = sqlx::query_as::<_, Booking>(
            "INSERT INTO bookings (user_id, event_id, total_amount, status)
             VALUES ($1, $2, $3, $4)
             RETURNING id, user_id, event_id, total_amount, status, created_at, cancelled_at",
        )
        .bind(plan.user_id)
        .bind(plan.event_id)
        .bind(plan.total_amount)
        .bind(plan.status)
        .fetch_one(&mut *tx)
        .await?;

        let mut booked = Vec::with_capacity(plan.lines.len());
        for line in &plan.lines {
            let row = sqlx::query_as::<_, BookedSeat>(
                "INSERT INTO booked_seats (booking_id, seat_id, price_paid)
                 VALUES ($1, $2, $3)
                 RETURNING booking_id, seat_id, price_paid",
            )
            .bind(booking.id)
            .bind(line.seat_id)
            .bind(line.price_paid)
            .fetch_one(&mut *tx)
            .await?;
            booked.push(row);
        }

        let seat_ids = plan.seat_ids();
        let marked = sqlx::query("UPDATE seats SET is_booked = TRUE WHERE id = ANY($1) AND is_booked = FALSE")
            .bind(&seat_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if marked != seat_ids.len() as u64 {
            return Err(BookingError::SeatUnavailable { seat_ids });
        }

        sqlx::query("UPDATE events SET available_seats = available_seats - $2 WHERE id = $1")
            .bind(plan.event_id)
            .bind(plan.seat_count())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(BookingDetails {
            booking,
            seats: booked,
        })
    }

    async fn confirm(&self, booking_id: i64, requester: Requester) -> BookingResult<(Booking, ConfirmOutcome)> {
        let mut tx = self.pool.begin().await?;

        let booking = lock_booking(&mut *tx, booking_id).await?;
        let outcome = authorize_confirm(&booking, requester)?;
        let booking = match outcome {
            ConfirmOutcome::Confirmed => mark_confirmed(&mut *tx, booking_id).await?,
            ConfirmOutcome::AlreadyConfirmed => booking,
        };

        tx.commit().await?;
        Ok((booking, outcome))
    }

    async fn release(&self, booking_id: i64, reason: ReleaseReason, now: DateTime<Utc>) -> BookingResult<Released> {
        let mut tx = self.pool.begin().await?;

        let booking = lock_booking(&mut *tx, booking_id).await?;
        let released = release_locked(&mut *tx, &booking, reason, now).await?;

        tx.commit().await?;
        Ok(released)
    }

    async fn open_payment(&self, booking_id: i64, requester: Requester) -> BookingResult<Payment> {
        let mut tx = self.pool.begin().await?;

        let booking = lock_booking(&mut *tx, booking_id).await?;
        let existing = lock_payment(&mut *tx, booking_id).await?;

        let payment = match plan_open_payment(&booking, existing.as_ref(), requester)? {
            OpenPayment::Create { amount } => {
                sqlx::query_as::<_, Payment>(
                    "INSERT INTO payments (reference, booking_id, amount, status)
                     VALUES ($1, $2, $3, 'created')
                     RETURNING id, reference, booking_id, amount, status, created_at, updated_at",
                )
                .bind(Uuid::new_v4())
                .bind(booking_id)
                .bind(amount)
                .fetch_one(&mut *tx)
                .await?
            }
            OpenPayment::Reuse => existing.ok_or_else(|| {
                BookingError::Storage(format!("payment for booking {booking_id} disappeared"))
            })?,
        };

        tx.commit().await?;
        Ok(payment)
    }

    async fn record_payment(
        &self,
        reference: Uuid,
        outcome: PaymentOutcome,
        now: DateTime<Utc>,
    ) -> BookingResult<PaymentRecorded> {
        let mut tx = self.pool.begin().await?;

        // Платёж ссылается на бронь, а блокировать надо сначала бронь.
        let booking_id: i64 = sqlx::query_scalar("SELECT booking_id FROM payments WHERE reference = $1")
            .bind(reference)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| BookingError::not_found("payment", reference))?;

        let booking = lock_booking(&mut *tx, booking_id).await?;
        let existing = lock_payment(&mut *tx, booking_id).await?;
        let plan = plan_payment(&booking, existing.as_ref(), outcome)?;

        let payment = sqlx::query_as::<_, Payment>(
            "UPDATE payments SET amount = $2, status = $3, updated_at = $4
             WHERE booking_id = $1
             RETURNING id, reference, booking_id, amount, status, created_at, updated_at",
        )
        .bind(booking_id)
        .bind(plan.amount)
        .bind(plan.status)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let (booking_status, released) = match plan.booking_effect {
            BookingEffect::Confirm => {
                let confirmed = mark_confirmed(&mut *tx, booking_id).await?;
                (confirmed.status, None)
            }
            BookingEffect::Release => {
                let released = release_locked(&mut *tx, &booking, ReleaseReason::PaymentFailed, now).await?;
                (released.booking.status, Some(released))
            }
            BookingEffect::Unchanged => (booking.status, None),
        };

        tx.commit().await?;

        Ok(PaymentRecorded {
            payment,
            booking_status,
            released,
        })
    }

    async fn event(&self, event_id: i64) -> BookingResult<Event> {
        sqlx::query_as::<_, Event>(
            "SELECT id, title, price, total_seats, available_seats, is_cancelled, starts_at
             FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BookingError::not_found("event", event_id))
    }

    async fn seats_for_event(&self, event_id: i64) -> BookingResult<Vec<Seat>> {
        self.event(event_id).await?;

        let seats = sqlx::query_as::<_, Seat>(
            r#"
            SELECT s.id, s.event_id, s.seat_number, s.seat_type, s.price_multiplier,
                   EXISTS (
                       SELECT 1
                       FROM booked_seats bs
                       JOIN bookings b ON b.id = bs.booking_id
                       WHERE bs.seat_id = s.id AND b.status IN ('pending', 'confirmed')
                   ) AS is_booked
            FROM seats s
            WHERE s.event_id = $1
            ORDER BY s.id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(seats)
    }

    async fn booking(&self, booking_id: i64) -> BookingResult<BookingDetails> {
        let booking = sqlx::query_as::<_, Booking>(
            "SELECT id, user_id, event_id, total_amount, status, created_at, cancelled_at
             FROM bookings WHERE id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BookingError::not_found("booking", booking_id))?;

        let seats = sqlx::query_as::<_, BookedSeat>(
            "SELECT booking_id, seat_id, price_paid FROM booked_seats WHERE booking_id = $1 ORDER BY seat_id",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(BookingDetails { booking, seats })
    }

    async fn bookings_for_user(&self, user_id: i64, now: DateTime<Utc>) -> BookingResult<Vec<BookingSummary>> {
        let rows = sqlx::query_as::<_, BookingSummary>(
            r#"
            SELECT b.id, b.event_id, e.title AS event_title, e.starts_at, b.total_amount,
                   b.status, COUNT(bs.seat_id) AS seat_count, b.created_at
            FROM bookings b
            JOIN events e ON e.id = b.event_id
            LEFT JOIN booked_seats bs ON bs.booking_id = b.id
            WHERE b.user_id = $1
            GROUP BY b.id, e.id
            ORDER BY (e.starts_at > $2) DESC,
                     CASE WHEN e.starts_at > $2 THEN e.starts_at END ASC,
                     CASE WHEN e.starts_at <= $2 THEN e.starts_at END DESC,
                     b.id
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn pending_bookings_before(&self, cutoff: DateTime<Utc>) -> BookingResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM bookings WHERE status = 'pending' AND created_at <= $1 ORDER BY created_at, id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn payment_for_booking(&self, booking_id: i64) -> BookingResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT id, reference, booking_id, amount, status, created_at, updated_at
             FROM payments WHERE booking_id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn refunds_for_booking(&self, booking_id: i64) -> BookingResult<Vec<Refund>> {
        let refunds = sqlx::query_as::<_, Refund>(
            "SELECT id, payment_id, booking_id, amount, created_at
             FROM refunds WHERE booking_id = $1 ORDER BY created_at",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(refunds)
    }
}
