//! Signed session tokens.
//!
//! Tokens are compact `header.claims.signature` strings: base64url JSON
//! segments signed with Ed25519. The header carries the key id (`kid`) of the
//! signing key so verification keeps working across a key rotation window.
//! Claims use numeric unix-second timestamps.
//!
//! Verification failures are typed so callers can log `BadSignature`,
//! `Expired`, and `Malformed` differently; clients must still receive one
//! undifferentiated rejection regardless of the class.

mod keys;

pub use keys::SigningKeySet;

use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{Signature, Signer, Verifier};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const TOKEN_VERSION: u8 = 1;

const ALG_EDDSA: &str = "EdDSA";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
    pub kid: String,
}

impl TokenHeader {
    fn eddsa(kid: impl Into<String>) -> Self {
        Self {
            alg: ALG_EDDSA.to_string(),
            typ: "JWT".to_string(),
            kid: kid.into(),
        }
    }
}

/// What a token is good for. Access tokens authenticate requests; refresh
/// tokens rotate sessions. A token presented for the wrong purpose is invalid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub v: u8,
    pub act: TokenUse,
    /// Session id this token descends from.
    pub sid: Uuid,
    /// Identity the session was issued to.
    pub sub: String,
    /// Refresh chain id. Refresh tokens only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<Uuid>,
    /// Position in the refresh chain. Refresh tokens only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token issued in the future")]
    InvalidIat,
    #[error("invalid token version")]
    InvalidVersion,
    #[error("unexpected token use")]
    UnexpectedUse,
    #[error("invalid ttl")]
    InvalidTtl,
}

/// Coarse failure classes for security logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    BadSignature,
    Expired,
    Malformed,
}

impl FailureClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadSignature => "bad_signature",
            Self::Expired => "expired",
            Self::Malformed => "malformed",
        }
    }
}

impl Error {
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::InvalidSignature | Self::UnknownKid(_) => FailureClass::BadSignature,
            Self::Expired => FailureClass::Expired,
            _ => FailureClass::Malformed,
        }
    }
}

/// Options for verifying a session token.
pub struct VerifyOptions {
    pub expected_use: TokenUse,
    pub now_unix_seconds: i64,
    /// Accept an expired token if everything else checks out. Used by logout,
    /// where a client must be able to end a session with a stale token.
    pub allow_expired: bool,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Issue a signed token with the keyset's active key, tagging it with the
/// key id so verification survives rotation.
///
/// # Errors
///
/// Returns an error if the claims are inconsistent (`exp <= iat`) or JSON
/// encoding fails.
pub fn issue(keys: &SigningKeySet, claims: &TokenClaims) -> Result<String, Error> {
    if claims.exp <= claims.iat {
        return Err(Error::InvalidTtl);
    }

    let header = TokenHeader::eddsa(keys.active_kid());
    let header_b64 = b64e_json(&header)?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let signature = keys.signer().sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_bytes());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify a token and return its decoded claims.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the `kid` is neither the active nor the previous signing key,
/// - the signature is invalid,
/// - the claims fail validation (`v`, `act`, `iat`, `exp`).
pub fn verify(
    token: &str,
    keys: &SigningKeySet,
    options: &VerifyOptions,
) -> Result<TokenClaims, Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() {
        return Err(Error::TokenFormat);
    }

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != ALG_EDDSA {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let verifier = keys
        .verifier_for(&header.kid)
        .ok_or_else(|| Error::UnknownKid(header.kid.clone()))?;

    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let signature =
        Signature::from_slice(signature_bytes.as_slice()).map_err(|_| Error::InvalidSignature)?;
    verifier
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: TokenClaims = b64d_json(claims_b64)?;
    if claims.v != TOKEN_VERSION {
        return Err(Error::InvalidVersion);
    }
    if claims.act != options.expected_use {
        return Err(Error::UnexpectedUse);
    }
    if claims.exp <= claims.iat {
        return Err(Error::InvalidTtl);
    }
    if claims.iat > options.now_unix_seconds {
        return Err(Error::InvalidIat);
    }
    if !options.allow_expired && claims.exp <= options.now_unix_seconds {
        return Err(Error::Expired);
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn access_claims(now: i64) -> TokenClaims {
        TokenClaims {
            v: TOKEN_VERSION,
            act: TokenUse::Access,
            sid: Uuid::from_u128(1),
            sub: "u1".to_string(),
            chain: None,
            seq: None,
            iat: now,
            exp: now + 1800,
        }
    }

    fn refresh_claims(now: i64) -> TokenClaims {
        TokenClaims {
            v: TOKEN_VERSION,
            act: TokenUse::Refresh,
            sid: Uuid::from_u128(1),
            sub: "u1".to_string(),
            chain: Some(Uuid::from_u128(2)),
            seq: Some(0),
            iat: now,
            exp: now + 604_800,
        }
    }

    fn verify_access(token: &str, keys: &SigningKeySet, now: i64) -> Result<TokenClaims, Error> {
        verify(
            token,
            keys,
            &VerifyOptions {
                expected_use: TokenUse::Access,
                now_unix_seconds: now,
                allow_expired: false,
            },
        )
    }

    #[test]
    fn sign_and_verify_round_trip() -> Result<(), Error> {
        let keys = SigningKeySet::from_seeds([7u8; 32], None);
        let claims = refresh_claims(NOW);
        let token = issue(&keys, &claims)?;

        let verified = verify(
            &token,
            &keys,
            &VerifyOptions {
                expected_use: TokenUse::Refresh,
                now_unix_seconds: NOW,
                allow_expired: false,
            },
        )?;
        assert_eq!(verified, claims);
        Ok(())
    }

    #[test]
    fn previous_key_still_verifies_after_rotation() -> Result<(), Error> {
        let old = SigningKeySet::from_seeds([7u8; 32], None);
        let token = issue(&old, &access_claims(NOW))?;

        let rotated = SigningKeySet::from_seeds([9u8; 32], Some([7u8; 32]));
        let verified = verify_access(&token, &rotated, NOW)?;
        assert_eq!(verified.sub, "u1");

        // Two rotations later the original key is gone.
        let rotated_twice = SigningKeySet::from_seeds([11u8; 32], Some([9u8; 32]));
        let result = verify_access(&token, &rotated_twice, NOW);
        assert!(matches!(result, Err(Error::UnknownKid(_))));
        Ok(())
    }

    #[test]
    fn issuance_uses_active_key_only() -> Result<(), Error> {
        let rotated = SigningKeySet::from_seeds([9u8; 32], Some([7u8; 32]));
        let token = issue(&rotated, &access_claims(NOW))?;

        let header: TokenHeader =
            b64d_json(token.split('.').next().ok_or(Error::TokenFormat)?)?;
        assert_eq!(header.kid, rotated.active_kid());
        Ok(())
    }

    #[test]
    fn rejects_expired_token() -> Result<(), Error> {
        let keys = SigningKeySet::from_seeds([7u8; 32], None);
        let token = issue(&keys, &access_claims(NOW))?;

        assert!(verify_access(&token, &keys, NOW).is_ok());
        let result = verify_access(&token, &keys, NOW + 1801);
        assert!(matches!(result, Err(Error::Expired)));
        Ok(())
    }

    #[test]
    fn allow_expired_accepts_stale_token() -> Result<(), Error> {
        let keys = SigningKeySet::from_seeds([7u8; 32], None);
        let token = issue(&keys, &access_claims(NOW))?;

        let verified = verify(
            &token,
            &keys,
            &VerifyOptions {
                expected_use: TokenUse::Access,
                now_unix_seconds: NOW + 9999,
                allow_expired: true,
            },
        )?;
        assert_eq!(verified.sid, Uuid::from_u128(1));
        Ok(())
    }

    #[test]
    fn rejects_wrong_use() -> Result<(), Error> {
        let keys = SigningKeySet::from_seeds([7u8; 32], None);
        let token = issue(&keys, &refresh_claims(NOW))?;

        let result = verify_access(&token, &keys, NOW);
        assert!(matches!(result, Err(Error::UnexpectedUse)));
        Ok(())
    }

    #[test]
    fn rejects_tampered_claims() -> Result<(), Error> {
        let keys = SigningKeySet::from_seeds([7u8; 32], None);
        let token = issue(&keys, &access_claims(NOW))?;

        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let sig_b64 = parts.nth(1).ok_or(Error::TokenFormat)?;

        let mut forged = access_claims(NOW);
        forged.sub = "someone-else".to_string();
        let forged_b64 = b64e_json(&forged)?;

        let result = verify_access(&format!("{header_b64}.{forged_b64}.{sig_b64}"), &keys, NOW);
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn rejects_malformed_structure() {
        let keys = SigningKeySet::from_seeds([7u8; 32], None);
        assert!(matches!(
            verify_access("not-a-token", &keys, NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            verify_access("a.b.c.d", &keys, NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            verify_access("!!!.@@@.###", &keys, NOW),
            Err(Error::Base64)
        ));
    }

    #[test]
    fn rejects_inverted_ttl_on_issue() {
        let keys = SigningKeySet::from_seeds([7u8; 32], None);
        let mut claims = access_claims(NOW);
        claims.exp = claims.iat;
        assert!(matches!(issue(&keys, &claims), Err(Error::InvalidTtl)));
    }

    #[test]
    fn failure_classes_for_logging() {
        assert_eq!(
            Error::InvalidSignature.class(),
            FailureClass::BadSignature
        );
        assert_eq!(
            Error::UnknownKid("k".to_string()).class(),
            FailureClass::BadSignature
        );
        assert_eq!(Error::Expired.class(), FailureClass::Expired);
        assert_eq!(Error::TokenFormat.class(), FailureClass::Malformed);
        assert_eq!(Error::UnexpectedUse.class(), FailureClass::Malformed);
        assert_eq!(FailureClass::BadSignature.as_str(), "bad_signature");
    }
}
