//! Credential verification against stored Argon2 hashes.
//!
//! The verifier is a pure check: secret in, boolean out. Malformed stored
//! hashes verify false rather than surfacing a distinct error, so callers
//! cannot tell "wrong password" apart from "broken record". The presented
//! secret is wrapped in [`SecretString`] and never logged.

use anyhow::{Context, Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::Instrument;

/// A credential record: identity plus PHC-format secret hash.
///
/// Owned by the external identity store; this core only reads it.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub identity: String,
    pub secret_hash: String,
}

#[async_trait]
pub trait CredentialDirectory: Send + Sync {
    /// Look up the credential record for an identity.
    async fn lookup(&self, identity: &str) -> Result<Option<StoredCredential>>;
}

/// Read-only Postgres credential directory.
pub struct PgCredentialDirectory {
    pool: PgPool,
}

impl PgCredentialDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialDirectory for PgCredentialDirectory {
    async fn lookup(&self, identity: &str) -> Result<Option<StoredCredential>> {
        let query = "SELECT identity, secret_hash FROM credentials WHERE identity = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identity)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup credential record")?;

        Ok(row.map(|row| StoredCredential {
            identity: row.get("identity"),
            secret_hash: row.get("secret_hash"),
        }))
    }
}

/// In-memory credential directory for tests and local runs.
#[derive(Default)]
pub struct MemoryCredentialDirectory {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: &str, secret_hash: &str) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.to_string(), secret_hash.to_string());
    }
}

#[async_trait]
impl CredentialDirectory for MemoryCredentialDirectory {
    async fn lookup(&self, identity: &str) -> Result<Option<StoredCredential>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(identity).map(|hash| StoredCredential {
            identity: identity.to_string(),
            secret_hash: hash.clone(),
        }))
    }
}

// Hash burned for unknown identities so a lookup miss costs the same as a
// mismatch and response timing does not reveal whether the identity exists.
static UNKNOWN_IDENTITY_HASH: Lazy<String> = Lazy::new(|| {
    SaltString::encode_b64(b"gate-unknown-identity")
        .ok()
        .and_then(|salt| {
            Argon2::default()
                .hash_password(b"gate-unknown-identity", &salt)
                .ok()
                .map(|hash| hash.to_string())
        })
        .unwrap_or_default()
});

/// Bounded-concurrency Argon2 verifier.
///
/// Hashing is CPU-expensive on purpose; the semaphore caps how many
/// verifications run at once so credential checks cannot be used as a
/// denial-of-service amplifier.
pub struct CredentialVerifier {
    permits: Arc<Semaphore>,
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Check a presented secret against a stored hash.
    ///
    /// Always a plain boolean; hashing failures and malformed hashes verify
    /// false.
    pub async fn verify(&self, presented: &SecretString, stored_hash: &str) -> bool {
        let Ok(_permit) = self.permits.acquire().await else {
            return false;
        };
        let secret = presented.expose_secret().to_string();
        let stored_hash = stored_hash.to_string();
        tokio::task::spawn_blocking(move || verify_blocking(&secret, &stored_hash))
            .await
            .unwrap_or(false)
    }

    /// Burn a verification against a fixed throwaway hash. Called when the
    /// identity does not exist, keeping timing flat across both failure paths.
    pub async fn burn(&self, presented: &SecretString) {
        let _ = self.verify(presented, &UNKNOWN_IDENTITY_HASH).await;
    }
}

fn verify_blocking(secret: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

/// Hash a secret into PHC format. Used by provisioning tooling and tests; the
/// gateway itself never writes credential records.
///
/// # Errors
///
/// Returns an error if hashing fails.
pub fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash secret: {err}"))?;
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_accepts_matching_secret() -> Result<()> {
        let verifier = CredentialVerifier::new(2);
        let hash = hash_secret("correct horse")?;
        let secret = SecretString::from("correct horse");
        assert!(verifier.verify(&secret, &hash).await);
        Ok(())
    }

    #[tokio::test]
    async fn verify_rejects_wrong_secret() -> Result<()> {
        let verifier = CredentialVerifier::new(2);
        let hash = hash_secret("correct horse")?;
        let secret = SecretString::from("battery staple");
        assert!(!verifier.verify(&secret, &hash).await);
        Ok(())
    }

    #[tokio::test]
    async fn verify_rejects_malformed_hash_without_error() {
        let verifier = CredentialVerifier::new(2);
        let secret = SecretString::from("anything");
        assert!(!verifier.verify(&secret, "not-a-phc-hash").await);
        assert!(!verifier.verify(&secret, "").await);
    }

    #[tokio::test]
    async fn burn_runs_against_valid_dummy_hash() {
        // The throwaway hash must parse, otherwise the burn would short-circuit
        // and the timing defense would be lost.
        assert!(PasswordHash::new(&UNKNOWN_IDENTITY_HASH).is_ok());
        let verifier = CredentialVerifier::new(2);
        verifier.burn(&SecretString::from("probe")).await;
    }

    #[tokio::test]
    async fn memory_directory_round_trip() -> Result<()> {
        let directory = MemoryCredentialDirectory::new();
        directory.insert("u1", "$argon2id$stub");

        let record = directory.lookup("u1").await?;
        assert_eq!(record.map(|r| r.secret_hash), Some("$argon2id$stub".into()));
        assert!(directory.lookup("missing").await?.is_none());
        Ok(())
    }
}
