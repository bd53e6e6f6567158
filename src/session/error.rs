//! Error taxonomy for session operations.

use std::fmt;
use thiserror::Error;

/// Why a security alert was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityAlertKind {
    /// An already-superseded refresh token was presented again.
    RefreshReuse,
    /// A revoked session's token was presented.
    RevokedTokenReplay,
}

impl SecurityAlertKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RefreshReuse => "refresh_reuse",
            Self::RevokedTokenReplay => "revoked_token_replay",
        }
    }
}

impl fmt::Display for SecurityAlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures surfaced by the session engine.
///
/// Every variant reaches the external caller as the same generic rejection;
/// the distinctions exist for operator logging and the event bus only.
/// Store failures and timeouts fail closed: an unreachable revocation store
/// must reject, never silently skip the check.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("security alert: {0}")]
    SecurityAlert(SecurityAlertKind),
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),
    #[error("store timeout")]
    Timeout,
    /// Invariant violation inside the gateway itself, e.g. token issuance
    /// failing. Not an authentication outcome.
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}
