//! Session verification.
//!
//! Sessions are HS256 JWTs carrying `{ userId, role, exp }`. The token is read
//! from the `authToken` cookie or an `Authorization: Bearer` header and kept
//! on the [`Session`] so it can be forwarded to a remote worker.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::AppError;
use crate::models::job::MatchJob;

pub const ROLE_ADMIN: &str = "ADMIN";
const SESSION_COOKIE: &str = "authToken";

/// JWT claims embedded in every session token.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub role: String,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
}

/// Signing and verification keys for session tokens.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl SessionKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding, &self.validation).map(|data| data.claims)
    }

    /// Issue a token for `user_id`, valid for `ttl`.
    pub fn issue(
        &self,
        user_id: &str,
        role: &str,
        ttl: chrono::Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            user_id: user_id.to_string(),
            role: role.to_string(),
            exp: (chrono::Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }
}

/// Authenticated caller.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub role: String,
    /// Raw bearer token, forwarded to the remote worker.
    pub token: String,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// Owner or admin may read a job and its sub-resources.
    pub fn authorize(&self, job: &MatchJob) -> Result<(), AppError> {
        if job.is_owned_by(&self.user_id) || self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You don't have permission to access this job".into(),
            ))
        }
    }
}

fn token_from_parts(parts: &Parts) -> Option<String> {
    let from_cookie = parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
    })
}

impl FromRequestParts<AppState> for Session {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized("No token provided".into()))?;

        let claims = state
            .sessions
            .verify(&token)
            .map_err(|_| AppError::Unauthorized("Invalid token".into()))?;

        Ok(Session {
            user_id: claims.user_id,
            role: claims.role,
            token,
        })
    }
}
