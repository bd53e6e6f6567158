use anyhow::{Context, Result, anyhow};
use base64ct::{Base64, Encoding};
use clap::{Arg, ArgAction, Command};
use std::fmt;

pub const ARG_ACCESS_TTL: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-ttl-seconds";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";
pub const ARG_REVOKE_ALL_ON_REUSE: &str = "revoke-all-on-reuse";
pub const ARG_MAX_CONCURRENT_HASHES: &str = "max-concurrent-hashes";
pub const ARG_SIGNING_SEED: &str = "signing-seed";
pub const ARG_PREVIOUS_SIGNING_SEED: &str = "previous-signing-seed";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token TTL in seconds")
                .env("GATE_ACCESS_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token TTL in seconds")
                .env("GATE_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Timeout for ledger/cache calls in milliseconds; operations fail closed on expiry")
                .env("GATE_STORE_TIMEOUT_MS")
                .default_value("3000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REVOKE_ALL_ON_REUSE)
                .long(ARG_REVOKE_ALL_ON_REUSE)
                .help("On refresh reuse, revoke every live session of the identity instead of only the affected chain")
                .env("GATE_REVOKE_ALL_ON_REUSE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_MAX_CONCURRENT_HASHES)
                .long(ARG_MAX_CONCURRENT_HASHES)
                .help("Cap on simultaneous credential hash verifications")
                .env("GATE_MAX_CONCURRENT_HASHES")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_SIGNING_SEED)
                .long(ARG_SIGNING_SEED)
                .help("Base64 32-byte Ed25519 seed for the active token signing key")
                .env("GATE_SIGNING_SEED")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_PREVIOUS_SIGNING_SEED)
                .long(ARG_PREVIOUS_SIGNING_SEED)
                .help("Base64 seed of the previous signing key, honored for verification during rotation")
                .env("GATE_SIGNING_SEED_PREVIOUS")
                .hide_env_values(true),
        )
}

/// Raw Ed25519 seed. Redacted in Debug output; key material never hits logs.
#[derive(Clone)]
pub struct SigningSeed([u8; 32]);

impl SigningSeed {
    /// Decode a base64-encoded 32-byte seed.
    ///
    /// # Errors
    /// Returns an error if the value is not base64 or not 32 bytes long.
    pub fn from_base64(value: &str) -> Result<Self> {
        let bytes =
            Base64::decode_vec(value.trim()).map_err(|_| anyhow!("signing seed must be base64"))?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("signing seed must decode to exactly 32 bytes"))?;
        Ok(Self(seed))
    }

    #[must_use]
    pub fn into_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Debug for SigningSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSeed(REDACTED)")
    }
}

#[derive(Debug)]
pub struct Options {
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub store_timeout_ms: u64,
    pub revoke_all_on_reuse: bool,
    pub max_concurrent_hashes: usize,
    pub signing_seed: SigningSeed,
    pub previous_signing_seed: Option<SigningSeed>,
}

impl Options {
    /// Extract session options from parsed CLI matches, decoding the signing
    /// seeds so misconfiguration fails at startup rather than at first login.
    ///
    /// # Errors
    /// Returns an error if a TTL is not positive or a seed does not decode.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let access_ttl_seconds = matches
            .get_one::<i64>(ARG_ACCESS_TTL)
            .copied()
            .unwrap_or(1800);
        let refresh_ttl_seconds = matches
            .get_one::<i64>(ARG_REFRESH_TTL)
            .copied()
            .unwrap_or(604_800);
        if access_ttl_seconds <= 0 || refresh_ttl_seconds <= 0 {
            return Err(anyhow!("token TTLs must be positive"));
        }
        if refresh_ttl_seconds < access_ttl_seconds {
            return Err(anyhow!(
                "refresh TTL must not be shorter than the access TTL"
            ));
        }

        let signing_seed = matches
            .get_one::<String>(ARG_SIGNING_SEED)
            .context("missing required argument: --signing-seed")
            .and_then(|value| SigningSeed::from_base64(value))
            .context("invalid GATE_SIGNING_SEED")?;
        let previous_signing_seed = matches
            .get_one::<String>(ARG_PREVIOUS_SIGNING_SEED)
            .map(|value| SigningSeed::from_base64(value))
            .transpose()
            .context("invalid GATE_SIGNING_SEED_PREVIOUS")?;

        Ok(Self {
            access_ttl_seconds,
            refresh_ttl_seconds,
            store_timeout_ms: matches
                .get_one::<u64>(ARG_STORE_TIMEOUT_MS)
                .copied()
                .unwrap_or(3000),
            revoke_all_on_reuse: matches.get_flag(ARG_REVOKE_ALL_ON_REUSE),
            max_concurrent_hashes: matches
                .get_one::<usize>(ARG_MAX_CONCURRENT_HASHES)
                .copied()
                .unwrap_or(8),
            signing_seed,
            previous_signing_seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64 of 32 bytes of 0x07 / 0x09
    const SEED_A: &str = "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc=";
    const SEED_B: &str = "CQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQk=";

    fn matches_from(args: Vec<&str>) -> clap::ArgMatches {
        with_args(Command::new("gate")).get_matches_from(args)
    }

    #[test]
    fn seed_decodes_to_raw_bytes() -> Result<()> {
        let seed = SigningSeed::from_base64(SEED_A)?;
        assert_eq!(seed.into_bytes(), [7u8; 32]);
        Ok(())
    }

    #[test]
    fn seed_rejects_wrong_length_and_garbage() {
        assert!(SigningSeed::from_base64("AAECAw==").is_err());
        assert!(SigningSeed::from_base64("not base64 at all").is_err());
    }

    #[test]
    fn seed_debug_is_redacted() -> Result<()> {
        let seed = SigningSeed::from_base64(SEED_A)?;
        assert_eq!(format!("{seed:?}"), "SigningSeed(REDACTED)");
        Ok(())
    }

    #[test]
    fn defaults_apply_without_flags() -> Result<()> {
        let matches = matches_from(vec!["gate", "--signing-seed", SEED_A]);
        let options = Options::parse(&matches)?;

        assert_eq!(options.access_ttl_seconds, 1800);
        assert_eq!(options.refresh_ttl_seconds, 604_800);
        assert_eq!(options.store_timeout_ms, 3000);
        assert!(!options.revoke_all_on_reuse);
        assert_eq!(options.max_concurrent_hashes, 8);
        assert!(options.previous_signing_seed.is_none());
        Ok(())
    }

    #[test]
    fn rotation_keeps_both_seeds() -> Result<()> {
        let matches = matches_from(vec![
            "gate",
            "--signing-seed",
            SEED_B,
            "--previous-signing-seed",
            SEED_A,
            "--revoke-all-on-reuse",
        ]);
        let options = Options::parse(&matches)?;

        assert_eq!(options.signing_seed.clone().into_bytes(), [9u8; 32]);
        assert_eq!(
            options.previous_signing_seed.map(SigningSeed::into_bytes),
            Some([7u8; 32])
        );
        assert!(options.revoke_all_on_reuse);
        Ok(())
    }

    #[test]
    fn inverted_ttls_are_rejected() {
        let matches = matches_from(vec![
            "gate",
            "--signing-seed",
            SEED_A,
            "--access-ttl-seconds",
            "3600",
            "--refresh-ttl-seconds",
            "60",
        ]);
        assert!(Options::parse(&matches).is_err());
    }
}
