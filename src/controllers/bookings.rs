use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::error::{BookingError, BookingResult};
use crate::middleware::AuthUser;
use crate::models::BookingStatus;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(get_user_bookings))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/cancel", put(cancel_booking))
        .route("/bookings/{id}/confirm", put(confirm_booking))
        .route("/bookings/{id}/payment", post(open_payment))
}

/* ---------- helpers ---------- */

fn positive_id(id: i64, name: &str) -> BookingResult<i64> {
    if id <= 0 {
        return Err(BookingError::validation(format!("{name} must be > 0")));
    }
    Ok(id)
}

/// Ошибки разбора тела запроса отдаём как 400, а не как 422 по умолчанию.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> BookingResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| BookingError::validation(rejection.body_text()))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
struct CreateBookingRequest {
    #[validate(range(min = 1, message = "event_id must be > 0"))]
    event_id: i64,
    #[validate(length(min = 1, max = 100, message = "seat_ids must contain 1..=100 seats"))]
    seat_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBookingResponse {
    booking_id: i64,
    total_amount: Decimal,
    status: BookingStatus,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> BookingResult<impl IntoResponse> {
    let req = json_body(payload)?;
    req.validate()?;

    let details = state
        .service
        .reserve(user.requester(), req.event_id, req.seat_ids)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse {
            booking_id: details.booking.id,
            total_amount: details.booking.total_amount,
            status: details.booking.status,
        }),
    ))
}

// GET /api/bookings
async fn get_user_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> BookingResult<impl IntoResponse> {
    let bookings = state.service.bookings_for_user(user.requester()).await?;
    Ok((StatusCode::OK, Json(bookings)))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> BookingResult<impl IntoResponse> {
    let details = state
        .service
        .booking(user.requester(), positive_id(id, "booking id")?)
        .await?;
    Ok((StatusCode::OK, Json(details)))
}

// PUT /api/bookings/{id}/cancel
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelBookingResponse {
    message: String,
    booking_id: i64,
    released_seat_ids: Vec<i64>,
    refunded_amount: Option<Decimal>,
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> BookingResult<impl IntoResponse> {
    let released = state
        .service
        .cancel(user.requester(), positive_id(id, "booking id")?)
        .await?;

    Ok((
        StatusCode::OK,
        Json(CancelBookingResponse {
            message: "Booking cancelled".to_string(),
            booking_id: released.booking.id,
            released_seat_ids: released.released_seat_ids,
            refunded_amount: released.refund.map(|r| r.amount),
        }),
    ))
}

// PUT /api/bookings/{id}/confirm
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmBookingResponse {
    booking_id: i64,
    status: BookingStatus,
}

async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> BookingResult<impl IntoResponse> {
    let booking = state
        .service
        .confirm(user.requester(), positive_id(id, "booking id")?)
        .await?;

    Ok((
        StatusCode::OK,
        Json(ConfirmBookingResponse {
            booking_id: booking.id,
            status: booking.status,
        }),
    ))
}

// POST /api/bookings/{id}/payment
async fn open_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> BookingResult<impl IntoResponse> {
    let payment = state
        .service
        .open_payment(user.requester(), positive_id(id, "booking id")?)
        .await?;
    Ok((StatusCode::OK, Json(payment)))
}
