//! Error taxonomy shared by the fetchers and the session controller.
//!
//! Remote operations never raise for control flow. They return a [`FetchError`] whose variant
//! tells the caller what to do next:
//!
//! - [`FetchError::Transient`]: the network or the server misbehaved and the backoff policy has
//!   already given up. Show a dismissible notice and keep the previous view.
//! - [`FetchError::RecoverableAuth`]: the user has to take part (consent, sign in again) before
//!   the operation can succeed. The session controller drives the recovery.
//! - [`FetchError::Permanent`]: the API answered in a way retrying will not fix.
//!
//! Startup problems are reported separately as [`ConfigurationError`].

use crate::config::MissingConfig;
use std::fmt;

/// Why the current credential cannot be used without user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChallenge {
    /// No token has been granted for the account, or the granted scopes are insufficient.
    ConsentRequired,
    /// The token was rejected or could not be refreshed; the user must authorize again.
    Reauthorize,
}

impl fmt::Display for AuthChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthChallenge::ConsentRequired => f.write_str("consent required"),
            AuthChallenge::Reauthorize => f.write_str("reauthorization required"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transient failure: {0:#}")]
    Transient(eyre::Report),
    #[error("user interaction needed: {0}")]
    RecoverableAuth(AuthChallenge),
    #[error("request failed: {0:#}")]
    Permanent(eyre::Report),
}

impl FetchError {
    pub fn transient(msg: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        FetchError::Transient(eyre::eyre!(msg))
    }

    pub fn permanent(msg: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        FetchError::Permanent(eyre::eyre!(msg))
    }

    /// Whether the transport layer may retry this failure on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn auth_challenge(&self) -> Option<AuthChallenge> {
        match self {
            FetchError::RecoverableAuth(challenge) => Some(*challenge),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Permanent(eyre::Report::new(e))
        } else {
            // connect, timeout, reset and body read failures are all worth another attempt
            FetchError::Transient(eyre::Report::new(e))
        }
    }
}

/// Required developer configuration is missing, so the normal workflow cannot start.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} configuration item(s) missing", .missing.len())]
pub struct ConfigurationError {
    pub missing: Vec<MissingConfig>,
}

/// Error reasons Google attaches to 403 responses that mean "slow down".
const RATE_LIMIT_REASONS: &[&str] = &[
    "quotaExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
];

/// Error reasons on 403 responses that more consent can fix.
const CONSENT_REASONS: &[&str] = &[
    "insufficientPermissions",
    "ACCESS_TOKEN_SCOPE_INSUFFICIENT",
    "forbidden",
];

/// Maps a failed Google API response onto the error taxonomy.
///
/// `reasons` are the `error.errors[].reason` (or `error.details[].reason`) values from the
/// response body, if it could be decoded.
pub fn classify_status(status: http::StatusCode, reasons: &[String], message: &str) -> FetchError {
    let described = || format!("status {status}: {message}");

    if status == http::StatusCode::UNAUTHORIZED {
        return FetchError::RecoverableAuth(AuthChallenge::Reauthorize);
    }
    if status == http::StatusCode::FORBIDDEN {
        if reasons
            .iter()
            .any(|r| RATE_LIMIT_REASONS.contains(&r.as_str()))
        {
            return FetchError::transient(described());
        }
        if reasons.iter().any(|r| CONSENT_REASONS.contains(&r.as_str())) {
            return FetchError::RecoverableAuth(AuthChallenge::ConsentRequired);
        }
        return FetchError::permanent(described());
    }
    if status == http::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return FetchError::transient(described());
    }
    FetchError::permanent(described())
}
