//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary executes. Seed and TTL
//! validation happens here so a misconfigured deployment dies at startup.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{session, stores};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let stores = stores::Options::parse(matches)?;
    let session = session::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn: stores.dsn,
        cache_url: stores.cache_url,
        events_url: stores.events_url,
        access_ttl_seconds: session.access_ttl_seconds,
        refresh_ttl_seconds: session.refresh_ttl_seconds,
        store_timeout_ms: session.store_timeout_ms,
        revoke_all_on_reuse: session.revoke_all_on_reuse,
        max_concurrent_hashes: session.max_concurrent_hashes,
        signing_seed: session.signing_seed,
        previous_signing_seed: session.previous_signing_seed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc=";

    #[test]
    fn builds_server_action_from_env() {
        temp_env::with_vars(
            [
                ("GATE_DSN", Some("postgres://gate@localhost:5432/gate")),
                ("GATE_CACHE_URL", Some("redis://localhost:6379/0")),
                ("GATE_SIGNING_SEED", Some(SEED)),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["gate"]);
                let action = handler(&matches).expect("server action");
                let Action::Server(args) = action;
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, "postgres://gate@localhost:5432/gate");
                assert!(args.events_url.is_none());
            },
        );
    }

    #[test]
    fn invalid_seed_fails_dispatch() {
        temp_env::with_vars(
            [
                ("GATE_DSN", Some("postgres://gate@localhost:5432/gate")),
                ("GATE_CACHE_URL", Some("redis://localhost:6379/0")),
                ("GATE_SIGNING_SEED", Some("short")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["gate"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("GATE_SIGNING_SEED"));
                }
            },
        );
    }
}
