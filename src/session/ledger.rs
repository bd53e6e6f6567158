//! Session ledger: durable record of issued sessions and refresh lineage.
//!
//! One row per login. A refresh advances the row's sequence number in place
//! with an atomic conditional update, so two concurrent presentations of the
//! same refresh token resolve to exactly one success; the loser surfaces
//! [`RefreshOutcome::ReuseDetected`]. The conditional update lives at the
//! storage layer, not behind an in-process lock, because multiple gateway
//! instances run against the same ledger.
//!
//! Status only moves forward: `active -> rotated -> revoked`, or straight to
//! `revoked` on logout. Nothing leaves `revoked`.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Rotated,
    Revoked,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Rotated => "rotated",
            Self::Revoked => "revoked",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(Self::Active),
            "rotated" => Ok(Self::Rotated),
            "revoked" => Ok(Self::Revoked),
            other => Err(anyhow!("unknown session status: {other}")),
        }
    }
}

/// One authenticated login lifetime.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub identity: String,
    /// Links every token descended from this login; revoking the chain kills
    /// all of them at once.
    pub chain_id: Uuid,
    /// Latest refresh sequence recorded for the chain. Starts at 0,
    /// advances by exactly 1 per successful refresh, gapless.
    pub sequence: i64,
    pub status: SessionStatus,
    pub issued_at: i64,
    /// Refresh horizon: no token of this chain outlives it.
    pub expires_at: i64,
    pub refreshed_at: Option<i64>,
}

/// Outcome of a compare-and-advance refresh attempt.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The presented sequence matched the latest; the chain advanced.
    Advanced(Session),
    /// The presented sequence was already superseded: a rotated token came
    /// back. Security event, not a transient error.
    ReuseDetected,
    /// Unknown, revoked, or otherwise dead chain.
    Rejected,
}

#[async_trait]
pub trait SessionLedger: Send + Sync {
    /// Create a session for a fresh login, sequence 0.
    async fn record_login(
        &self,
        identity: &str,
        now_unix: i64,
        expires_at_unix: i64,
    ) -> Result<Session>;

    /// Atomically compare the presented sequence against the latest recorded
    /// one and advance on a match.
    async fn record_refresh(
        &self,
        chain_id: Uuid,
        presented_sequence: i64,
        now_unix: i64,
        new_expires_at_unix: i64,
    ) -> Result<RefreshOutcome>;

    /// Mark a session revoked. Permanent and idempotent; returns the session
    /// so callers can size the revocation entry, `None` if it never existed.
    async fn record_revocation(&self, session_id: Uuid) -> Result<Option<Session>>;

    /// Mark the session owning a refresh chain revoked. Same semantics as
    /// [`Self::record_revocation`].
    async fn revoke_chain(&self, chain_id: Uuid) -> Result<Option<Session>>;

    /// Fetch a session by id.
    async fn session(&self, session_id: Uuid) -> Result<Option<Session>>;

    /// Sessions for an identity that are neither revoked nor past their
    /// refresh horizon. Used by the revoke-all-on-reuse policy.
    async fn live_sessions(&self, identity: &str, now_unix: i64) -> Result<Vec<Session>>;
}

const SESSION_COLUMNS: &str =
    "id, identity, chain_id, sequence, status, issued_at, expires_at, refreshed_at";

fn session_from_row(row: &PgRow) -> Result<Session> {
    let status: String = row.get("status");
    Ok(Session {
        session_id: row.get("id"),
        identity: row.get("identity"),
        chain_id: row.get("chain_id"),
        sequence: row.get("sequence"),
        status: SessionStatus::parse(&status)?,
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
        refreshed_at: row.get("refreshed_at"),
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Postgres-backed session ledger.
pub struct PgSessionLedger {
    pool: PgPool,
}

impl PgSessionLedger {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn revoke_where(&self, column: &str, id: Uuid) -> Result<Option<Session>> {
        let query = format!(
            "UPDATE sessions SET status = 'revoked' WHERE {column} = $1 RETURNING {SESSION_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to record revocation")?;

        row.as_ref().map(session_from_row).transpose()
    }
}

#[async_trait]
impl SessionLedger for PgSessionLedger {
    async fn record_login(
        &self,
        identity: &str,
        now_unix: i64,
        expires_at_unix: i64,
    ) -> Result<Session> {
        let query = format!(
            r"
        INSERT INTO sessions (id, identity, chain_id, sequence, status, issued_at, expires_at)
        VALUES ($1, $2, $3, 0, 'active', $4, $5)
        RETURNING {SESSION_COLUMNS}
    "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );

        // Collisions on random v4 ids are vanishingly rare; retry a few times
        // rather than fail a login on one.
        for _ in 0..3 {
            let result = sqlx::query(&query)
                .bind(Uuid::new_v4())
                .bind(identity)
                .bind(Uuid::new_v4())
                .bind(now_unix)
                .bind(expires_at_unix)
                .fetch_one(&self.pool)
                .instrument(span.clone())
                .await;

            match result {
                Ok(row) => return session_from_row(&row),
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err).context("failed to record login"),
            }
        }

        Err(anyhow!("failed to allocate a unique session id"))
    }

    async fn record_refresh(
        &self,
        chain_id: Uuid,
        presented_sequence: i64,
        now_unix: i64,
        new_expires_at_unix: i64,
    ) -> Result<RefreshOutcome> {
        // The WHERE clause is the compare half of compare-and-advance: it only
        // matches while the presented sequence is still the latest.
        let query = format!(
            r"
        UPDATE sessions
        SET sequence = sequence + 1,
            status = 'rotated',
            refreshed_at = $3,
            expires_at = $4
        WHERE chain_id = $1
          AND sequence = $2
          AND status <> 'revoked'
          AND expires_at > $3
        RETURNING {SESSION_COLUMNS}
    "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(chain_id)
            .bind(presented_sequence)
            .bind(now_unix)
            .bind(new_expires_at_unix)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to record refresh")?;

        if let Some(row) = row {
            return Ok(RefreshOutcome::Advanced(session_from_row(&row)?));
        }

        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE chain_id = $1 LIMIT 1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(chain_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to inspect refresh chain")?;

        let Some(row) = row else {
            return Ok(RefreshOutcome::Rejected);
        };
        let session = session_from_row(&row)?;
        if session.status != SessionStatus::Revoked && presented_sequence < session.sequence {
            return Ok(RefreshOutcome::ReuseDetected);
        }
        Ok(RefreshOutcome::Rejected)
    }

    async fn record_revocation(&self, session_id: Uuid) -> Result<Option<Session>> {
        self.revoke_where("id", session_id).await
    }

    async fn revoke_chain(&self, chain_id: Uuid) -> Result<Option<Session>> {
        self.revoke_where("chain_id", chain_id).await
    }

    async fn session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn live_sessions(&self, identity: &str, now_unix: i64) -> Result<Vec<Session>> {
        let query = format!(
            r"
        SELECT {SESSION_COLUMNS}
        FROM sessions
        WHERE identity = $1
          AND status <> 'revoked'
          AND expires_at > $2
    "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .bind(identity)
            .bind(now_unix)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list live sessions")?;

        rows.iter().map(session_from_row).collect()
    }
}

/// In-memory ledger with the same compare-and-advance semantics, for tests
/// and single-node runs. The mutex plays the role of the database's atomic
/// conditional update.
#[derive(Default)]
pub struct MemorySessionLedger {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl MemorySessionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn revoke_matching<F>(&self, matches: F) -> Option<Session>
    where
        F: Fn(&Session) -> bool,
    {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions.values_mut().find(|session| matches(session))?;
        session.status = SessionStatus::Revoked;
        Some(session.clone())
    }
}

#[async_trait]
impl SessionLedger for MemorySessionLedger {
    async fn record_login(
        &self,
        identity: &str,
        now_unix: i64,
        expires_at_unix: i64,
    ) -> Result<Session> {
        let session = Session {
            session_id: Uuid::new_v4(),
            identity: identity.to_string(),
            chain_id: Uuid::new_v4(),
            sequence: 0,
            status: SessionStatus::Active,
            issued_at: now_unix,
            expires_at: expires_at_unix,
            refreshed_at: None,
        };
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.session_id, session.clone());
        Ok(session)
    }

    async fn record_refresh(
        &self,
        chain_id: Uuid,
        presented_sequence: i64,
        now_unix: i64,
        new_expires_at_unix: i64,
    ) -> Result<RefreshOutcome> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(session) = sessions
            .values_mut()
            .find(|session| session.chain_id == chain_id)
        else {
            return Ok(RefreshOutcome::Rejected);
        };

        if session.status == SessionStatus::Revoked || session.expires_at <= now_unix {
            if session.status != SessionStatus::Revoked && presented_sequence < session.sequence {
                return Ok(RefreshOutcome::ReuseDetected);
            }
            return Ok(RefreshOutcome::Rejected);
        }

        if presented_sequence == session.sequence {
            session.sequence += 1;
            session.status = SessionStatus::Rotated;
            session.refreshed_at = Some(now_unix);
            session.expires_at = new_expires_at_unix;
            return Ok(RefreshOutcome::Advanced(session.clone()));
        }

        if presented_sequence < session.sequence {
            return Ok(RefreshOutcome::ReuseDetected);
        }
        Ok(RefreshOutcome::Rejected)
    }

    async fn record_revocation(&self, session_id: Uuid) -> Result<Option<Session>> {
        Ok(self.revoke_matching(|session| session.session_id == session_id))
    }

    async fn revoke_chain(&self, chain_id: Uuid) -> Result<Option<Session>> {
        Ok(self.revoke_matching(|session| session.chain_id == chain_id))
    }

    async fn session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.get(&session_id).cloned())
    }

    async fn live_sessions(&self, identity: &str, now_unix: i64) -> Result<Vec<Session>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions
            .values()
            .filter(|session| {
                session.identity == identity
                    && session.status != SessionStatus::Revoked
                    && session.expires_at > now_unix
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const HORIZON: i64 = NOW + 604_800;

    #[tokio::test]
    async fn login_starts_chain_at_sequence_zero() -> Result<()> {
        let ledger = MemorySessionLedger::new();
        let session = ledger.record_login("u1", NOW, HORIZON).await?;

        assert_eq!(session.sequence, 0);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.issued_at, NOW);
        assert!(ledger.session(session.session_id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_advances_by_exactly_one() -> Result<()> {
        let ledger = MemorySessionLedger::new();
        let session = ledger.record_login("u1", NOW, HORIZON).await?;

        let outcome = ledger
            .record_refresh(session.chain_id, 0, NOW + 10, HORIZON + 10)
            .await?;
        let RefreshOutcome::Advanced(advanced) = outcome else {
            panic!("expected advance, got {outcome:?}");
        };
        assert_eq!(advanced.sequence, 1);
        assert_eq!(advanced.status, SessionStatus::Rotated);
        assert_eq!(advanced.refreshed_at, Some(NOW + 10));
        assert_eq!(advanced.expires_at, HORIZON + 10);

        let outcome = ledger
            .record_refresh(session.chain_id, 1, NOW + 20, HORIZON + 20)
            .await?;
        let RefreshOutcome::Advanced(advanced) = outcome else {
            panic!("expected advance, got {outcome:?}");
        };
        assert_eq!(advanced.sequence, 2);
        Ok(())
    }

    #[tokio::test]
    async fn stale_sequence_signals_reuse() -> Result<()> {
        let ledger = MemorySessionLedger::new();
        let session = ledger.record_login("u1", NOW, HORIZON).await?;
        ledger
            .record_refresh(session.chain_id, 0, NOW + 10, HORIZON)
            .await?;

        let outcome = ledger
            .record_refresh(session.chain_id, 0, NOW + 20, HORIZON)
            .await?;
        assert!(matches!(outcome, RefreshOutcome::ReuseDetected));
        Ok(())
    }

    #[tokio::test]
    async fn ahead_of_chain_sequence_is_rejected_not_reuse() -> Result<()> {
        let ledger = MemorySessionLedger::new();
        let session = ledger.record_login("u1", NOW, HORIZON).await?;

        let outcome = ledger
            .record_refresh(session.chain_id, 5, NOW + 10, HORIZON)
            .await?;
        assert!(matches!(outcome, RefreshOutcome::Rejected));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_chain_is_rejected() -> Result<()> {
        let ledger = MemorySessionLedger::new();
        let outcome = ledger
            .record_refresh(Uuid::from_u128(99), 0, NOW, HORIZON)
            .await?;
        assert!(matches!(outcome, RefreshOutcome::Rejected));
        Ok(())
    }

    #[tokio::test]
    async fn revoked_chain_never_advances_again() -> Result<()> {
        let ledger = MemorySessionLedger::new();
        let session = ledger.record_login("u1", NOW, HORIZON).await?;

        let revoked = ledger.record_revocation(session.session_id).await?;
        assert_eq!(
            revoked.map(|session| session.status),
            Some(SessionStatus::Revoked)
        );

        let outcome = ledger
            .record_refresh(session.chain_id, 0, NOW + 10, HORIZON)
            .await?;
        assert!(matches!(outcome, RefreshOutcome::Rejected));

        // Revoking again is a quiet no-op, status stays revoked.
        let revoked = ledger.revoke_chain(session.chain_id).await?;
        assert_eq!(
            revoked.map(|session| session.status),
            Some(SessionStatus::Revoked)
        );
        Ok(())
    }

    #[tokio::test]
    async fn expired_chain_is_rejected() -> Result<()> {
        let ledger = MemorySessionLedger::new();
        let session = ledger.record_login("u1", NOW, NOW + 60).await?;

        let outcome = ledger
            .record_refresh(session.chain_id, 0, NOW + 61, NOW + 120)
            .await?;
        assert!(matches!(outcome, RefreshOutcome::Rejected));
        Ok(())
    }

    #[tokio::test]
    async fn live_sessions_excludes_revoked_and_expired() -> Result<()> {
        let ledger = MemorySessionLedger::new();
        let keep = ledger.record_login("u1", NOW, HORIZON).await?;
        let revoke = ledger.record_login("u1", NOW, HORIZON).await?;
        ledger.record_login("u1", NOW, NOW + 1).await?;
        ledger.record_login("someone-else", NOW, HORIZON).await?;

        ledger.record_revocation(revoke.session_id).await?;

        let live = ledger.live_sessions("u1", NOW + 10).await?;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].session_id, keep.session_id);
        Ok(())
    }
}
