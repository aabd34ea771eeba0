use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::bookings::json_body;
use crate::error::{BookingError, BookingResult};
use crate::models::PaymentOutcome;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/payments/webhook", post(payment_webhook))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentWebhook {
    /// Ссылка платежа, выданная при его открытии.
    reference: Uuid,
    status: String,
    amount: Option<Decimal>,
}

fn outcome(hook: &PaymentWebhook) -> BookingResult<PaymentOutcome> {
    match hook.status.to_ascii_lowercase().as_str() {
        "captured" | "confirmed" | "completed" => {
            let amount = hook
                .amount
                .ok_or_else(|| BookingError::validation("amount is required for captured payments"))?;
            Ok(PaymentOutcome::Captured { amount })
        }
        "failed" | "cancelled" | "rejected" => Ok(PaymentOutcome::Failed),
        other => Err(BookingError::validation(format!("unknown payment status {other}"))),
    }
}

/// POST /api/payments/webhook
///
/// Подпись запроса проверяет шлюз перед нами. Платёж ищется по ссылке из
/// `open_payment`, а не по последовательному id брони.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PaymentWebhook>, JsonRejection>,
) -> BookingResult<impl IntoResponse> {
    let hook = json_body(payload)?;
    tracing::info!("Webhook: reference={}, status={}", hook.reference, hook.status);

    let recorded = state
        .service
        .record_payment(hook.reference, outcome(&hook)?)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "received": true,
            "bookingId": recorded.payment.booking_id,
            "paymentStatus": recorded.payment.status,
            "bookingStatus": recorded.booking_status,
        })),
    ))
}
