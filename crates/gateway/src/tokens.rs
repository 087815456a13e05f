use chrono::{DateTime, Duration, SubsecRound, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroize;

use docshare_protocol::{
    DownloadGrant, Grant, GrantKind, Role, SessionGrant, VerificationGrant,
};

/// Lifetime shared by session, verification and download tokens.
pub const TOKEN_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("token is malformed or its signature is invalid")]
    Invalid,

    #[error("expected a {expected} token but received a {actual} token")]
    WrongKind { expected: GrantKind, actual: GrantKind },

    #[error("failed to sign token: {0}")]
    Signing(String),
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    grant: Grant,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and checks every token the service hands out. One HS256 key is
/// used for all kinds; the grant's `kind` tag keeps them apart.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self::with_clock(secret, Arc::new(SystemClock))
    }

    pub fn with_clock(secret: &str, clock: Arc<dyn Clock>) -> Self {
        let mut key = secret.as_bytes().to_vec();
        let encoding_key = EncodingKey::from_secret(&key);
        let decoding_key = DecodingKey::from_secret(&key);
        key.zeroize();

        // Expiry is checked against our own clock, without leeway.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding_key,
            decoding_key,
            validation,
            ttl: Duration::seconds(TOKEN_TTL_SECS),
            clock,
        }
    }

    pub fn issue(&self, grant: Grant) -> Result<IssuedToken, TokenError> {
        // Whole seconds, so the reported expiry is exactly the signed `exp`.
        let issued_at = self.clock.now().trunc_subsecs(0);
        let expires_at = issued_at + self.ttl;
        let claims = Claims {
            grant,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    pub fn issue_session(&self, user_id: Uuid, role: Role) -> Result<IssuedToken, TokenError> {
        self.issue(Grant::Session(SessionGrant { user_id, role }))
    }

    pub fn issue_verification(&self, email: &str) -> Result<IssuedToken, TokenError> {
        self.issue(Grant::Verification(VerificationGrant {
            email: email.to_owned(),
        }))
    }

    pub fn issue_download(&self, file_id: &str, user_id: Uuid) -> Result<IssuedToken, TokenError> {
        self.issue(Grant::Download(DownloadGrant {
            file_id: file_id.to_owned(),
            user_id,
        }))
    }

    /// Checks signature and expiry and returns whatever grant the token holds.
    pub fn validate(&self, token: &str) -> Result<Grant, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| TokenError::Invalid)?;

        let expires_at =
            DateTime::from_timestamp(data.claims.exp, 0).ok_or(TokenError::Invalid)?;
        if self.clock.now() > expires_at {
            return Err(TokenError::Expired);
        }

        Ok(data.claims.grant)
    }

    pub fn validate_session(&self, token: &str) -> Result<SessionGrant, TokenError> {
        match self.validate(token)? {
            Grant::Session(grant) => Ok(grant),
            other => Err(wrong_kind(GrantKind::Session, &other)),
        }
    }

    pub fn validate_verification(&self, token: &str) -> Result<VerificationGrant, TokenError> {
        match self.validate(token)? {
            Grant::Verification(grant) => Ok(grant),
            other => Err(wrong_kind(GrantKind::Verification, &other)),
        }
    }

    pub fn validate_download(&self, token: &str) -> Result<DownloadGrant, TokenError> {
        match self.validate(token)? {
            Grant::Download(grant) => Ok(grant),
            other => Err(wrong_kind(GrantKind::Download, &other)),
        }
    }
}

fn wrong_kind(expected: GrantKind, actual: &Grant) -> TokenError {
    TokenError::WrongKind {
        expected,
        actual: actual.kind(),
    }
}
