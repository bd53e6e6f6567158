//! # Gate (Authentication & Session Gateway)
//!
//! `gate` is the credential-and-session authority fronting the rest of the
//! mesh. It verifies credentials, mints and rotates signed token pairs, and
//! propagates session lifecycle to the other services.
//!
//! ## Sessions & Refresh Chains
//!
//! A login opens a **session**: one row in the ledger, one refresh chain. The
//! short-lived access token is verified statelessly (signature + expiry +
//! revocation lookup); the longer-lived refresh token carries a sequence
//! number that must match the latest one recorded for its chain. Rotation
//! advances the sequence with an atomic conditional update, so a stolen
//! refresh token replayed after the legitimate client already rotated is
//! detected as **reuse** and the whole chain is revoked.
//!
//! ## Revocation
//!
//! Revoked session and chain ids live in a low-latency cache until the last
//! descendant token would have expired anyway, then the entries lapse on
//! their own. Absence means "not known revoked"; an unreachable cache fails
//! closed.
//!
//! ## Failure Shape
//!
//! Wrong credential, expired token, bad signature, revoked session: callers
//! see one undifferentiated `401`. The distinctions go to the logs and, for
//! reuse and revoked-token replay, to the `session.security_alert` subject on
//! the bus.

pub mod cli;
pub mod gate;
pub mod session;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
