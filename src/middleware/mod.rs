use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{Requester, Role};

/// Содержимое токена, выпущенного сервисом авторизации.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn new(requester: Requester, ttl: chrono::Duration) -> Self {
        Self {
            sub: requester.user_id,
            role: requester.role,
            exp: (chrono::Utc::now() + ttl).timestamp().max(0) as usize,
        }
    }

    pub fn encode(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::default(), self, &EncodingKey::from_secret(secret.as_bytes()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Requester);

impl AuthUser {
    pub fn requester(&self) -> Requester {
        self.0
    }
}

// Bearer JWT extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.config.jwt.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            tracing::debug!("rejected token: {}", e);
            StatusCode::UNAUTHORIZED
        })?;

        Ok(AuthUser(Requester {
            user_id: data.claims.sub,
            role: data.claims.role,
        }))
    }
}
