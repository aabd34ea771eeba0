use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub type BookingResult<T> = Result<T, BookingError>;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    /// Некорректный запрос: пустой или повторяющийся список мест, чужое событие и т.п.
    #[error("{0}")]
    Validation(String),

    /// Место уже занято (в том числе проигрыш в гонке с параллельным запросом).
    /// Клиент должен перечитать доступность и выбрать другие места.
    #[error("seats no longer available: {seat_ids:?}")]
    SeatUnavailable { seat_ids: Vec<i64> },

    #[error("{0}")]
    Forbidden(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Операция недопустима в текущем состоянии брони или события.
    #[error("{0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl BookingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BookingError::Validation(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        BookingError::InvalidState(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        BookingError::Forbidden(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        BookingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Стабильный код ошибки для клиента.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "validation_error",
            BookingError::SeatUnavailable { .. } => "seat_unavailable",
            BookingError::Forbidden(_) => "forbidden",
            BookingError::NotFound { .. } => "not_found",
            BookingError::InvalidState(_) => "invalid_state",
            BookingError::Database(_) | BookingError::Storage(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Validation(_)
            | BookingError::SeatUnavailable { .. }
            | BookingError::InvalidState(_) => StatusCode::BAD_REQUEST,
            BookingError::Forbidden(_) => StatusCode::FORBIDDEN,
            BookingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BookingError::Database(_) | BookingError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, BookingError::Database(_) | BookingError::Storage(_))
    }
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BookingError::Validation(errors.to_string())
    }
}

#[derive(Serialize)]
pub struct ApiError {
    success: bool,
    error: &'static str,
    message: String,
    #[serde(rename = "seatIds", skip_serializing_if = "Option::is_none")]
    seat_ids: Option<Vec<i64>>,
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        // Детали ошибок БД клиенту не отдаём, только в лог.
        let message = if self.is_internal() {
            tracing::error!("internal error: {:?}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let seat_ids = match self {
            BookingError::SeatUnavailable { seat_ids } => Some(seat_ids),
            _ => None,
        };

        let body = ApiError {
            success: false,
            error: kind,
            message,
            seat_ids,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(err: BookingError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn conflict_lists_taken_seats() {
        let (status, body) = body_of(BookingError::SeatUnavailable { seat_ids: vec![2, 5] }).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "seat_unavailable");
        assert_eq!(body["seatIds"], serde_json::json!([2, 5]));
    }

    #[tokio::test]
    async fn internal_details_stay_in_logs() {
        let (status, body) = body_of(BookingError::Storage("pool exhausted".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert!(body.get("seatIds").is_none());
    }

    #[test]
    fn status_codes() {
        assert_eq!(BookingError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(BookingError::invalid_state("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(BookingError::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(BookingError::not_found("booking", 1).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(BookingError::not_found("seat", 7).to_string(), "seat 7 not found");
    }
}
