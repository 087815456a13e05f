use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::task;
use uuid::Uuid;

use docshare_protocol::{can_perform, Action, Role};

use crate::error::ApiError;
use crate::tokens::TokenError;
use crate::AppState;

/// The authenticated caller, taken from a session token in the
/// `Authorization: Bearer` header or, failing that, the `token` query
/// parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| {
                Query::<TokenQuery>::try_from_uri(&parts.uri)
                    .ok()
                    .and_then(|Query(q)| q.token)
                    .filter(|t| !t.is_empty())
            })
            .ok_or_else(|| ApiError::Unauthenticated("Not authorized, no token found.".to_string()))?;

        let grant = state.tokens.validate_session(&token).map_err(|e| match e {
            TokenError::Expired => {
                ApiError::Unauthenticated("Session expired, please log in again.".to_string())
            }
            _ => ApiError::Unauthenticated("Invalid token".to_string()),
        })?;

        Ok(Session {
            user_id: grant.user_id,
            role: grant.role,
        })
    }
}

impl Session {
    /// Applies the access policy to this caller.
    pub fn require(&self, action: Action) -> Result<(), ApiError> {
        if can_perform(self.role, action) {
            return Ok(());
        }
        tracing::warn!("Denied {} ({}) the right to {}", self.user_id, self.role, action);
        Err(ApiError::Forbidden(format!(
            "Access denied. {} users cannot {}.",
            self.role, action
        )))
    }
}

pub async fn hash_password(password: String) -> Result<String, ApiError> {
    task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|e| ApiError::internal("Password hashing worker failed", e))?
    .map_err(|e| ApiError::internal("Password hashing failed", e))
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    task::spawn_blocking(move || match PasswordHash::new(&hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    })
    .await
    .map_err(|e| ApiError::internal("Password verification worker failed", e))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Shape check only, not RFC 5322 validation. Deliverability is proven
/// by the verification mail.
pub fn is_reasonable_email(email: &str) -> bool {
    if email.len() < 5 || email.len() > 254 {
        return false;
    }
    let mut parts = email.split('@');
    let local = parts.next().unwrap_or_default();
    let domain = parts.next().unwrap_or_default();
    parts.next().is_none()
        && !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
