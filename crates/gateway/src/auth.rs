use std::sync::Arc;

use {
    axum::{
        extract::{Request, State},
        http::{HeaderValue, StatusCode, header},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::RngCore,
    secrecy::{ExposeSecret, SecretString},
    sha2::{Digest, Sha256},
    subtle::ConstantTimeEq,
    tracing::debug,
};

use crate::error::ApiError;

/// Entropy of a session token, in bytes.
pub const TOKEN_BYTES: usize = 32;

const BEARER_PREFIX: &str = "Bearer ";

// ── Types ────────────────────────────────────────────────────────────────────

/// Bearer secret for one gateway session. Never logged, never persisted.
pub struct SessionToken(SecretString);

impl SessionToken {
    /// The raw token, for handing to the orchestrator.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Compare against a presented token without leaking content or length
    /// through timing: both sides are hashed to fixed-size digests first.
    pub fn matches(&self, candidate: &str) -> bool {
        let expected = Sha256::digest(self.expose().as_bytes());
        let given = Sha256::digest(candidate.as_bytes());
        expected.as_slice().ct_eq(given.as_slice()).into()
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// No `Authorization` header.
    TokenMissing,
    /// Header present but not a UTF-8 `Bearer` credential.
    SchemeInvalid,
    /// Bearer token does not belong to this session.
    TokenMismatch,
}

impl AuthRejection {
    pub fn status(self) -> StatusCode {
        match self {
            Self::TokenMissing | Self::SchemeInvalid => StatusCode::UNAUTHORIZED,
            Self::TokenMismatch => StatusCode::FORBIDDEN,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::TokenMissing => "token_missing",
            Self::SchemeInvalid => "scheme_invalid",
            Self::TokenMismatch => "token_mismatch",
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (code, message) = match self {
            Self::TokenMismatch => ("forbidden", "bearer token does not match this session"),
            Self::TokenMissing | Self::SchemeInvalid => ("unauthorized", "bearer token required"),
        };
        ApiError::new(self.status(), code, message).into_response()
    }
}

// ── Token issuing ────────────────────────────────────────────────────────────

/// Generate a fresh session token: 32 random bytes, URL-safe base64.
pub fn issue_token() -> SessionToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    SessionToken(SecretString::new(URL_SAFE_NO_PAD.encode(bytes)))
}

// ── Auth logic ───────────────────────────────────────────────────────────────

/// Check an `Authorization` header value against the session token.
pub fn authorize_bearer(
    header: Option<&HeaderValue>,
    token: &SessionToken,
) -> Result<(), AuthRejection> {
    let header = header.ok_or(AuthRejection::TokenMissing)?;
    let given = header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .ok_or(AuthRejection::SchemeInvalid)?;
    if !token.matches(given) {
        return Err(AuthRejection::TokenMismatch);
    }
    Ok(())
}

/// Middleware guarding every cache route.
pub async fn require_bearer(
    State(token): State<Arc<SessionToken>>,
    request: Request,
    next: Next,
) -> Response {
    match authorize_bearer(request.headers().get(header::AUTHORIZATION), &token) {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            debug!(
                reason = rejection.reason(),
                method = %request.method(),
                path = request.uri().path(),
                "rejected cache request"
            );
            rejection.into_response()
        },
    }
}
