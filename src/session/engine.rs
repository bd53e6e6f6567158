//! Session engine: the login/refresh/logout state machine.
//!
//! The engine is the only component with cross-cutting invariants. It holds
//! no per-session state between calls, so any number of gateway instances can
//! run against the same ledger and revocation store; the only serialization
//! point is the ledger's compare-and-advance.
//!
//! Every ledger/revocation/directory call runs under a configured timeout and
//! fails closed: an unreachable store rejects the operation rather than
//! skipping the check.

use anyhow::Error as AnyError;
use secrecy::SecretString;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use super::clock::Clock;
use super::credential::{CredentialDirectory, CredentialVerifier};
use super::error::{AuthError, SecurityAlertKind};
use super::events::{EventPublisher, SessionEvent, SessionEventKind};
use super::ledger::{RefreshOutcome, Session, SessionLedger};
use super::revocation::RevocationStore;
use crate::token::{self, SigningKeySet, TOKEN_VERSION, TokenClaims, TokenUse, VerifyOptions};

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_MAX_CONCURRENT_HASHES: usize = 8;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    store_timeout: Duration,
    revoke_all_on_reuse: bool,
    max_concurrent_hashes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            revoke_all_on_reuse: false,
            max_concurrent_hashes: DEFAULT_MAX_CONCURRENT_HASHES,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Whether a detected refresh reuse revokes every live session of the
    /// identity instead of only the affected chain.
    #[must_use]
    pub fn with_revoke_all_on_reuse(mut self, enabled: bool) -> Self {
        self.revoke_all_on_reuse = enabled;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_hashes(mut self, max: usize) -> Self {
        self.max_concurrent_hashes = max;
        self
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn revoke_all_on_reuse(&self) -> bool {
        self.revoke_all_on_reuse
    }

    #[must_use]
    pub fn max_concurrent_hashes(&self) -> usize {
        self.max_concurrent_hashes
    }
}

/// Freshly issued token pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
}

/// How a caller points at the session to log out.
pub enum SessionRef {
    Id(Uuid),
    AccessToken(String),
}

pub struct SessionEngine {
    config: EngineConfig,
    keys: SigningKeySet,
    verifier: CredentialVerifier,
    credentials: Arc<dyn CredentialDirectory>,
    ledger: Arc<dyn SessionLedger>,
    revocations: Arc<dyn RevocationStore>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl SessionEngine {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        keys: SigningKeySet,
        credentials: Arc<dyn CredentialDirectory>,
        ledger: Arc<dyn SessionLedger>,
        revocations: Arc<dyn RevocationStore>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let verifier = CredentialVerifier::new(config.max_concurrent_hashes());
        Self {
            config,
            keys,
            verifier,
            credentials,
            ledger,
            revocations,
            events,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Verify a credential and open a new session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] for a wrong secret and for an
    /// unknown identity alike; nothing in the result reveals which it was.
    pub async fn login(
        &self,
        identity: &str,
        secret: &SecretString,
    ) -> Result<TokenPair, AuthError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(AuthError::Unauthenticated);
        }
        let now = self.clock.now_unix();

        let record = self.guard(self.credentials.lookup(identity)).await?;
        let Some(record) = record else {
            // Burn a hash so the miss costs the same as a mismatch.
            self.verifier.burn(secret).await;
            return Err(AuthError::Unauthenticated);
        };
        if !self.verifier.verify(secret, &record.secret_hash).await {
            return Err(AuthError::Unauthenticated);
        }

        let expires_at = now + self.config.refresh_ttl_seconds();
        let session = self
            .guard(self.ledger.record_login(identity, now, expires_at))
            .await?;

        let pair = self.issue_pair(&session, now)?;
        self.emit(SessionEventKind::Issued, &session).await;
        Ok(pair)
    }

    /// Rotate a session: consume a refresh token, advance the chain, issue a
    /// new pair.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SecurityAlert`] when the token belongs to a
    /// revoked session or was already superseded; the latter also revokes the
    /// entire chain. All other failures are the generic rejection.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let now = self.clock.now_unix();
        let claims = match token::verify(
            refresh_token,
            &self.keys,
            &VerifyOptions {
                expected_use: TokenUse::Refresh,
                now_unix_seconds: now,
                allow_expired: false,
            },
        ) {
            Ok(claims) => claims,
            Err(err) => {
                warn!(class = err.class().as_str(), "refresh token rejected");
                return Err(AuthError::Unauthenticated);
            }
        };
        let (Some(chain_id), Some(sequence)) = (claims.chain, claims.seq) else {
            return Err(AuthError::Unauthenticated);
        };

        // A valid signature does not imply an unrevoked session.
        if self.guard(self.revocations.is_revoked(claims.sid, now)).await?
            || self.guard(self.revocations.is_revoked(chain_id, now)).await?
        {
            self.alert(
                SecurityAlertKind::RevokedTokenReplay,
                claims.sid,
                Some(chain_id),
                &claims.sub,
                now,
            )
            .await;
            return Err(AuthError::SecurityAlert(
                SecurityAlertKind::RevokedTokenReplay,
            ));
        }

        let horizon = now + self.config.refresh_ttl_seconds();
        let outcome = self
            .guard(
                self.ledger
                    .record_refresh(chain_id, sequence, now, horizon),
            )
            .await?;

        match outcome {
            RefreshOutcome::Advanced(session) => {
                let pair = self.issue_pair(&session, now)?;
                self.emit(SessionEventKind::Refreshed, &session).await;
                Ok(pair)
            }
            RefreshOutcome::ReuseDetected => {
                self.quarantine_chain(claims.sid, chain_id, &claims.sub, now)
                    .await?;
                Err(AuthError::SecurityAlert(SecurityAlertKind::RefreshReuse))
            }
            RefreshOutcome::Rejected => Err(AuthError::Unauthenticated),
        }
    }

    /// Revoke a session and its chain. Idempotent: logging out an unknown or
    /// already-revoked session succeeds silently.
    ///
    /// # Errors
    ///
    /// Returns an error when the reference does not parse or a store write
    /// fails (which must not be reported as a successful logout).
    pub async fn logout(&self, reference: SessionRef) -> Result<(), AuthError> {
        let now = self.clock.now_unix();
        let session_id = match reference {
            SessionRef::Id(id) => id,
            SessionRef::AccessToken(access_token) => {
                // A client must always be able to end its session, even with
                // a stale token; only the signature has to hold.
                match token::verify(
                    &access_token,
                    &self.keys,
                    &VerifyOptions {
                        expected_use: TokenUse::Access,
                        now_unix_seconds: now,
                        allow_expired: true,
                    },
                ) {
                    Ok(claims) => claims.sid,
                    Err(err) => {
                        warn!(class = err.class().as_str(), "logout token rejected");
                        return Err(AuthError::Unauthenticated);
                    }
                }
            }
        };

        let Some(session) = self
            .guard(self.ledger.record_revocation(session_id))
            .await?
        else {
            return Ok(());
        };

        let until = self.revocation_horizon(&session, now);
        self.revoke_ids(session.session_id, session.chain_id, until)
            .await?;
        self.emit(SessionEventKind::Revoked, &session).await;
        Ok(())
    }

    /// Validate an access token for a protected check: signature, expiry, and
    /// revocation.
    ///
    /// # Errors
    ///
    /// Returns the generic rejection for any invalid token; a revoked
    /// session's token additionally raises a security alert.
    pub async fn authenticate(&self, access_token: &str) -> Result<TokenClaims, AuthError> {
        let now = self.clock.now_unix();
        let claims = match token::verify(
            access_token,
            &self.keys,
            &VerifyOptions {
                expected_use: TokenUse::Access,
                now_unix_seconds: now,
                allow_expired: false,
            },
        ) {
            Ok(claims) => claims,
            Err(err) => {
                warn!(class = err.class().as_str(), "access token rejected");
                return Err(AuthError::Unauthenticated);
            }
        };

        if self.guard(self.revocations.is_revoked(claims.sid, now)).await? {
            self.alert(
                SecurityAlertKind::RevokedTokenReplay,
                claims.sid,
                claims.chain,
                &claims.sub,
                now,
            )
            .await;
            return Err(AuthError::SecurityAlert(
                SecurityAlertKind::RevokedTokenReplay,
            ));
        }

        Ok(claims)
    }

    fn issue_pair(&self, session: &Session, now: i64) -> Result<TokenPair, AuthError> {
        let access_expires_at = now + self.config.access_ttl_seconds();
        let access_token = token::issue(
            &self.keys,
            &TokenClaims {
                v: TOKEN_VERSION,
                act: TokenUse::Access,
                sid: session.session_id,
                sub: session.identity.clone(),
                chain: None,
                seq: None,
                iat: now,
                exp: access_expires_at,
            },
        )
        .map_err(|err| AuthError::Internal(AnyError::new(err)))?;

        let refresh_token = token::issue(
            &self.keys,
            &TokenClaims {
                v: TOKEN_VERSION,
                act: TokenUse::Refresh,
                sid: session.session_id,
                sub: session.identity.clone(),
                chain: Some(session.chain_id),
                seq: Some(session.sequence),
                iat: now,
                exp: session.expires_at,
            },
        )
        .map_err(|err| AuthError::Internal(AnyError::new(err)))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            session_id: session.session_id,
            access_expires_at,
            refresh_expires_at: session.expires_at,
        })
    }

    // The reuse defense: kill the chain in the ledger, blocklist both ids
    // until no descendant token can still be alive, optionally widen to every
    // live session of the identity, then raise the alert.
    async fn quarantine_chain(
        &self,
        session_id: Uuid,
        chain_id: Uuid,
        identity: &str,
        now: i64,
    ) -> Result<(), AuthError> {
        let session = self.guard(self.ledger.revoke_chain(chain_id)).await?;
        let until = session
            .as_ref()
            .map_or(now + self.config.refresh_ttl_seconds(), |session| {
                self.revocation_horizon(session, now)
            });
        self.revoke_ids(session_id, chain_id, until).await?;

        if self.config.revoke_all_on_reuse() {
            let others = self.guard(self.ledger.live_sessions(identity, now)).await?;
            for other in others {
                self.guard(self.ledger.record_revocation(other.session_id))
                    .await?;
                let until = self.revocation_horizon(&other, now);
                self.revoke_ids(other.session_id, other.chain_id, until)
                    .await?;
            }
        }

        self.alert(
            SecurityAlertKind::RefreshReuse,
            session_id,
            Some(chain_id),
            identity,
            now,
        )
        .await;
        Ok(())
    }

    // An entry must outlive every outstanding token of the session: the chain
    // horizon covers refresh tokens, one access TTL covers tokens minted just
    // before the revocation landed.
    fn revocation_horizon(&self, session: &Session, now: i64) -> i64 {
        session.expires_at.max(now + self.config.access_ttl_seconds())
    }

    async fn revoke_ids(
        &self,
        session_id: Uuid,
        chain_id: Uuid,
        until: i64,
    ) -> Result<(), AuthError> {
        self.guard(self.revocations.revoke(session_id, until)).await?;
        self.guard(self.revocations.revoke(chain_id, until)).await?;
        Ok(())
    }

    async fn guard<T, F>(&self, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.config.store_timeout(), call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(AuthError::StoreUnavailable(err)),
            Err(_) => Err(AuthError::Timeout),
        }
    }

    async fn emit(&self, kind: SessionEventKind, session: &Session) {
        self.publish(SessionEvent {
            event: kind,
            session_id: session.session_id,
            chain_id: Some(session.chain_id),
            identity: session.identity.clone(),
            at: self.clock.now_unix(),
            reason: None,
        })
        .await;
    }

    async fn alert(
        &self,
        kind: SecurityAlertKind,
        session_id: Uuid,
        chain_id: Option<Uuid>,
        identity: &str,
        now: i64,
    ) {
        self.publish(SessionEvent {
            event: SessionEventKind::SecurityAlert,
            session_id,
            chain_id,
            identity: identity.to_string(),
            at: now,
            reason: Some(kind.as_str().to_string()),
        })
        .await;
    }

    // Events are a side channel: failures are logged and swallowed, never
    // propagated into the triggering operation.
    async fn publish(&self, event: SessionEvent) {
        if let Err(err) = self.events.publish(&event).await {
            warn!(
                subject = event.event.subject(),
                "failed to publish session event: {err:#}"
            );
        }
    }
}
