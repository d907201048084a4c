//! HS256 token verification and the REST principal extractor.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use ripple_common::ANONYMOUS_PRINCIPAL;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Mint a token binding `principal` for `ttl`. Used by tests and operational
/// tooling; the server itself only verifies.
pub fn issue_token(
    secret: &str,
    principal: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: principal.to_string(),
        exp: (Utc::now() + ttl).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
}

/// Caller identity for REST routes: the bearer token's subject when a token is
/// presented and valid, the anonymous sentinel otherwise. A malformed or
/// invalid token is rejected rather than downgraded.
#[derive(Debug, Clone)]
pub struct Principal(pub String);

impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match header {
            Some(value) => match value.strip_prefix("Bearer ") {
                Some(token) => token,
                None => {
                    return Err(ApiError::unauthorized(
                        "Invalid Authorization header format",
                    ))
                }
            },
            None => return Ok(Self(ANONYMOUS_PRINCIPAL.to_string())),
        };

        match state.config.auth_secret.as_deref() {
            Some(secret) => verify_token(secret, token)
                .map(|claims| Self(claims.sub))
                .map_err(|_| ApiError::unauthorized("Invalid or expired token")),
            // No secret configured: tokens cannot be validated.
            None => Ok(Self(ANONYMOUS_PRINCIPAL.to_string())),
        }
    }
}
