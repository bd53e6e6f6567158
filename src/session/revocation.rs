//! Revocation store: identifiers rejected until their entries expire.
//!
//! An entry exists only for the remaining lifetime of the longest-lived token
//! it invalidates and expires on its own afterward; absence means "not known
//! revoked". No sweep is required for correctness. The store sits on the hot
//! path of every authenticated request, so lookups are single key reads.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Mark an identifier revoked until `until_unix`. Idempotent: a later
    /// `until` extends the entry, an earlier or equal one leaves it unchanged.
    async fn revoke(&self, id: Uuid, until_unix: i64) -> Result<()>;

    /// Whether the identifier is currently revoked.
    async fn is_revoked(&self, id: Uuid, now_unix: i64) -> Result<bool>;
}

/// Redis-backed revocation store.
///
/// Entries are written with `EXAT` so Redis drops them at `until` without any
/// cleanup process on our side.
pub struct RedisRevocationStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisRevocationStore {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            prefix: "gate:revoked:".to_string(),
        }
    }

    fn key(&self, id: Uuid) -> String {
        format!("{}{id}", self.prefix)
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn revoke(&self, id: Uuid, until_unix: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(id);

        let existing: Option<i64> = conn
            .get(&key)
            .await
            .context("failed to read revocation entry")?;
        if existing.is_some_and(|current| current >= until_unix) {
            return Ok(());
        }

        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(until_unix)
            .arg("EXAT")
            .arg(until_unix)
            .query_async(&mut conn)
            .await
            .context("failed to write revocation entry")?;
        Ok(())
    }

    async fn is_revoked(&self, id: Uuid, _now_unix: i64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(self.key(id))
            .await
            .context("failed to check revocation entry")?;
        Ok(exists)
    }
}

/// In-memory revocation store with the same expiry semantics, for tests and
/// single-node runs.
#[derive(Default)]
pub struct MemoryRevocationStore {
    entries: Mutex<HashMap<Uuid, i64>>,
}

impl MemoryRevocationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop naturally expired entries. Memory hygiene only; lookups already
    /// treat expired entries as absent.
    pub fn compact(&self, now_unix: i64) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, until| *until > now_unix);
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, id: Uuid, until_unix: i64) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(id).or_insert(until_unix);
        if *entry < until_unix {
            *entry = until_unix;
        }
        Ok(())
    }

    async fn is_revoked(&self, id: Uuid, now_unix: i64) -> Result<bool> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(&id).is_some_and(|until| *until > now_unix))
    }
}
