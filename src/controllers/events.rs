use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::bookings::json_body;
use crate::error::{BookingError, BookingResult};
use crate::middleware::AuthUser;
use crate::models::{Event, NewEvent, NewSeat, Seat};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/{id}/seats", get(get_seats))
        .route("/events/{id}/availability", get(get_availability))
}

fn event_id(id: i64) -> BookingResult<i64> {
    if id <= 0 {
        return Err(BookingError::validation("event id must be > 0"));
    }
    Ok(id)
}

// POST /api/events
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEventRequest {
    #[serde(flatten)]
    event: NewEvent,
    seats: Vec<NewSeat>,
}

#[derive(Debug, Serialize)]
struct CreateEventResponse {
    event: Event,
    seats: Vec<Seat>,
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<CreateEventRequest>, JsonRejection>,
) -> BookingResult<impl IntoResponse> {
    let req = json_body(payload)?;
    let (event, seats) = state
        .service
        .create_event(user.requester(), req.event, req.seats)
        .await?;
    Ok((StatusCode::CREATED, Json(CreateEventResponse { event, seats })))
}

// GET /api/events/{id}/seats
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeatsResponse {
    event_id: i64,
    seats: Vec<Seat>,
}

async fn get_seats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> BookingResult<impl IntoResponse> {
    let event_id = event_id(id)?;
    let seats = state.service.seats_for_event(event_id).await?;
    Ok((StatusCode::OK, Json(SeatsResponse { event_id, seats })))
}

// GET /api/events/{id}/availability
async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> BookingResult<impl IntoResponse> {
    let summary = state.service.availability(event_id(id)?).await?;
    Ok((StatusCode::OK, Json(summary)))
}
