//! Staff authentication.
//!
//! Staff routes take an HS256 bearer token signed with `JWT_SECRET`. The
//! `StaffUser` extractor validates it; guests never carry a token and are
//! authorized by their booking code instead.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hotelops_common::error::AppError;

use crate::state::AppState;

/// JWT claims stored in the token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Staff member's UUID
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    /// Free-form role label (`front_desk`, `housekeeping`, `manager`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Authenticated staff member extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct StaffUser {
    pub staff_id: Uuid,
    pub claims: Claims,
}

/// Issue a token for a staff member.
///
/// The API never issues tokens itself; this is for ops tooling and tests that
/// mint staff credentials with the shared secret.
pub fn encode_jwt(
    staff_id: Uuid,
    role: Option<&str>,
    secret: &str,
    expiry_hours: u64,
) -> Result<String, AppError> {
    let now = Utc::now();
    let exp = now + Duration::hours(expiry_hours as i64);

    let claims = Claims {
        sub: staff_id.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
        role: role.map(str::to_string),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Auth(format!("Failed to encode JWT: {}", e)))
}

/// Decode and validate a token.
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

    Ok(token_data.claims)
}

impl FromRequestParts<AppState> for StaffUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let secret = state.config.jwt_secret.clone();
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        async move {
            let token = auth_header
                .as_deref()
                .and_then(|h| h.strip_prefix("Bearer "))
                .ok_or_else(|| {
                    AppError::Auth("Missing or invalid Authorization header".to_string())
                })?;

            let claims = decode_jwt(token, &secret)?;
            let staff_id = Uuid::parse_str(&claims.sub)
                .map_err(|_| AppError::Auth("Invalid staff ID in token".to_string()))?;
            Ok(StaffUser { staff_id, claims })
        }
    }
}
