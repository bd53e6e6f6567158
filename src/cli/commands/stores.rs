use anyhow::{Context, Result};
use clap::{Arg, Command};

pub const ARG_DSN: &str = "dsn";
pub const ARG_CACHE_URL: &str = "cache-url";
pub const ARG_EVENTS_URL: &str = "events-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string for the session ledger and credential directory")
                .env("GATE_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CACHE_URL)
                .long(ARG_CACHE_URL)
                .help("Redis connection string for the revocation store")
                .env("GATE_CACHE_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_EVENTS_URL)
                .long(ARG_EVENTS_URL)
                .help("NATS URL for session lifecycle events; events are log-only when unset")
                .env("GATE_EVENTS_URL"),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub dsn: String,
    pub cache_url: String,
    pub events_url: Option<String>,
}

impl Options {
    /// Extract store options from parsed CLI matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            dsn: matches
                .get_one::<String>(ARG_DSN)
                .cloned()
                .context("missing required argument: --dsn")?,
            cache_url: matches
                .get_one::<String>(ARG_CACHE_URL)
                .cloned()
                .context("missing required argument: --cache-url")?,
            events_url: matches.get_one::<String>(ARG_EVENTS_URL).cloned(),
        })
    }
}
