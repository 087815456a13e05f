use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::auth::{hash_password, is_reasonable_email, normalize_email, verify_password};
use crate::error::ApiError;
use crate::mail::MailJob;
use crate::models::{
    LoginRequest, LoginResponse, NewUser, ResendVerificationRequest, SignupRequest,
    SignupResponse, UserProfile, VerificationEmailStatus,
};
use crate::AppState;

const MAX_PASSWORD_LEN: usize = 128;
const MAX_USERNAME_CHARS: usize = 128;

fn verification_link(state: &AppState, token: &str) -> String {
    format!("{}/users/verify/{}", state.base_url, token)
}

/// Issues a verification token for `email` and queues the mail.
fn queue_verification(state: &AppState, email: &str) -> Result<VerificationEmailStatus, ApiError> {
    let issued = state.tokens.issue_verification(email)?;
    let job = MailJob {
        to: email.to_string(),
        link: verification_link(state, &issued.token),
    };
    Ok(match state.outbox.enqueue(job) {
        Ok(()) => VerificationEmailStatus::Queued,
        Err(_) => VerificationEmailStatus::Deferred,
    })
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;

    let email = normalize_email(&payload.email);
    if !is_reasonable_email(&email) {
        return Err(ApiError::Validation("Invalid email format".to_string()));
    }
    if payload.password.is_empty() || payload.password.len() > MAX_PASSWORD_LEN {
        return Err(ApiError::Validation(
            "Password must be between 1 and 128 characters".to_string(),
        ));
    }
    tracing::info!("Signup request received for email: {}", email);

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::Validation("Email already exists.".to_string()));
    }

    let password_hash = hash_password(payload.password).await?;
    let username = payload
        .username
        .map(|name| name.trim().chars().take(MAX_USERNAME_CHARS).collect::<String>())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| email.clone());

    // The record is committed before any mail is attempted; a mail problem
    // from here on never undoes the signup.
    let user = state
        .store
        .create_user(NewUser {
            username,
            email,
            password_hash,
            role: payload.role,
        })
        .await?;
    tracing::info!("Created unverified {} account {}", user.role, user.id);

    let status = queue_verification(&state, &user.email).unwrap_or_else(|e| {
        tracing::error!("Could not prepare verification email for {}: {}", user.email, e);
        VerificationEmailStatus::Deferred
    });

    let message = match status {
        VerificationEmailStatus::Queued => {
            "User registered successfully. Please verify your email by checking inbox."
        }
        VerificationEmailStatus::Deferred => {
            "User registered successfully, but the verification email could not be sent yet. Request a new link via /users/verify/resend."
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: message.to_string(),
            verification_email: status,
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(payload) = payload?;
    let email = normalize_email(&payload.email);

    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    // Checked before the password so an unverified account never learns
    // whether the password was right.
    if !user.is_verified {
        return Err(ApiError::Unauthenticated(
            "Please verify your email before logging in".to_string(),
        ));
    }

    if payload.password.len() > MAX_PASSWORD_LEN
        || !verify_password(payload.password, user.password_hash.clone()).await?
    {
        return Err(ApiError::Validation("Invalid email or password".to_string()));
    }

    let issued = state.tokens.issue_session(user.id, user.role)?;
    tracing::info!("Login successful for {} ({})", user.id, user.role);

    Ok(Json(LoginResponse {
        message: "Login successful".to_string(),
        token: issued.token,
        user: UserProfile {
            id: user.id,
            email: user.email,
            role: user.role,
        },
    }))
}

pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let grant = state.tokens.validate_verification(&token)?;

    let user = state
        .store
        .find_user_by_email(&grant.email)
        .await?
        .ok_or_else(|| ApiError::InvalidToken("Invalid or expired token.".to_string()))?;
    if user.is_verified {
        return Err(ApiError::Validation("User already verified.".to_string()));
    }

    // A concurrent verification may win between the read and the update.
    if !state.store.mark_verified(&grant.email).await? {
        return Err(ApiError::Validation("User already verified.".to_string()));
    }
    tracing::info!("Email verified for {}", user.id);

    Ok(Json(serde_json::json!({ "message": "Email verified successfully." })))
}

pub async fn resend_verification(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ResendVerificationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let email = normalize_email(&payload.email);

    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    if user.is_verified {
        return Err(ApiError::Validation("User already verified.".to_string()));
    }

    match queue_verification(&state, &user.email)? {
        VerificationEmailStatus::Queued => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "message": "Verification email queued." })),
        )),
        VerificationEmailStatus::Deferred => Err(ApiError::internal(
            "Verification resend",
            "mail queue unavailable",
        )),
    }
}
