use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

const KID_DIGEST_BYTES: usize = 8;

/// Ed25519 keyset for token issuance and verification.
///
/// At most two keys are honored at a time: the active key (issuance and
/// verification) and the immediately previous key (verification only), so a
/// rotation never invalidates outstanding tokens mid-window. Anything older
/// is unknown and tokens signed with it are rejected.
pub struct SigningKeySet {
    active: SigningKey,
    active_verifier: VerifyingKey,
    active_kid: String,
    previous: Option<(String, VerifyingKey)>,
}

impl SigningKeySet {
    /// Build a keyset from raw 32-byte Ed25519 seeds.
    #[must_use]
    pub fn from_seeds(active_seed: [u8; 32], previous_seed: Option<[u8; 32]>) -> Self {
        let active = SigningKey::from_bytes(&active_seed);
        let active_verifier = active.verifying_key();
        let active_kid = derive_kid(&active_verifier);

        let previous = previous_seed.map(|seed| {
            let verifier = SigningKey::from_bytes(&seed).verifying_key();
            (derive_kid(&verifier), verifier)
        });

        Self {
            active,
            active_verifier,
            active_kid,
            previous,
        }
    }

    /// Key id tagged onto newly issued tokens.
    #[must_use]
    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    #[must_use]
    pub fn previous_kid(&self) -> Option<&str> {
        self.previous.as_ref().map(|(kid, _)| kid.as_str())
    }

    pub(crate) fn signer(&self) -> &SigningKey {
        &self.active
    }

    pub(crate) fn verifier_for(&self, kid: &str) -> Option<&VerifyingKey> {
        if kid == self.active_kid {
            return Some(&self.active_verifier);
        }
        match &self.previous {
            Some((previous_kid, verifier)) if previous_kid == kid => Some(verifier),
            _ => None,
        }
    }
}

/// Derive a stable key id from the public key bytes.
fn derive_kid(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest
        .iter()
        .take(KID_DIGEST_BYTES)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kid_is_stable_per_seed() {
        let first = SigningKeySet::from_seeds([7u8; 32], None);
        let second = SigningKeySet::from_seeds([7u8; 32], None);
        assert_eq!(first.active_kid(), second.active_kid());
        assert_eq!(first.active_kid().len(), KID_DIGEST_BYTES * 2);
    }

    #[test]
    fn kid_differs_per_seed() {
        let first = SigningKeySet::from_seeds([7u8; 32], None);
        let second = SigningKeySet::from_seeds([9u8; 32], None);
        assert_ne!(first.active_kid(), second.active_kid());
    }

    #[test]
    fn verifier_lookup_covers_active_and_previous_only() {
        let rotated = SigningKeySet::from_seeds([9u8; 32], Some([7u8; 32]));
        let old = SigningKeySet::from_seeds([7u8; 32], None);
        let unrelated = SigningKeySet::from_seeds([1u8; 32], None);

        assert!(rotated.verifier_for(rotated.active_kid()).is_some());
        assert!(rotated.verifier_for(old.active_kid()).is_some());
        assert!(rotated.verifier_for(unrelated.active_kid()).is_none());
        assert_eq!(rotated.previous_kid(), Some(old.active_kid()));
    }
}
