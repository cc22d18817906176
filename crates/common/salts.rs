//! Campaign salt derivation.
//!
//! A deployment campaign is named by a human-chosen `systemSaltString`
//! (e.g. `"Harbor-v1"`). Every logically distinct deployment inside the
//! campaign derives its salt from that string plus a per-entry suffix, so
//! addresses are stable across chains and deployment order but never
//! collide between entries.

use sha3::{Digest, Keccak256};

use crate::H256;

/// Per-entry suffix appended to the campaign salt string before hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltSuffix {
    /// Plain contract or library, no suffix.
    None,
    /// Bootstrap stub of a proxy deployment.
    Stub,
    /// The proxy itself.
    Proxy,
}

impl SaltSuffix {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaltSuffix::None => "",
            SaltSuffix::Stub => "/stub",
            SaltSuffix::Proxy => "/proxy",
        }
    }
}

/// Derives a 32-byte salt as `keccak(system_salt_string || suffix)`.
///
/// Identical inputs produce byte-identical output regardless of call
/// order, chain or wall-clock time. The whole deterministic-address
/// guarantee rests on this.
pub fn derive_salt(system_salt_string: &str, suffix: SaltSuffix) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(system_salt_string.as_bytes());
    hasher.update(suffix.as_str().as_bytes());
    H256(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::keccak;

    #[test]
    fn derive_salt_is_deterministic() {
        let first = derive_salt("Harbor-v1", SaltSuffix::Proxy);
        let second = derive_salt("Harbor-v1", SaltSuffix::Proxy);
        assert_eq!(first, second);
    }

    #[test]
    fn derive_salt_matches_concatenated_keccak() {
        assert_eq!(
            derive_salt("Harbor-v1", SaltSuffix::Stub),
            keccak(b"Harbor-v1/stub")
        );
        assert_eq!(derive_salt("Harbor-v1", SaltSuffix::None), keccak(b"Harbor-v1"));
    }

    #[test]
    fn suffixes_never_collide() {
        let none = derive_salt("campaign", SaltSuffix::None);
        let stub = derive_salt("campaign", SaltSuffix::Stub);
        let proxy = derive_salt("campaign", SaltSuffix::Proxy);
        assert_ne!(none, stub);
        assert_ne!(none, proxy);
        assert_ne!(stub, proxy);
    }

    #[test]
    fn campaigns_never_collide() {
        assert_ne!(
            derive_salt("Harbor-v1", SaltSuffix::Proxy),
            derive_salt("Harbor-v2", SaltSuffix::Proxy)
        );
    }
}
