use bytes::Bytes;
use hex::FromHexError;
use sha3::{Digest, Keccak256};

use crate::H256;

/// Computes the keccak-256 hash of the given bytes.
pub fn keccak(data: impl AsRef<[u8]>) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(data.as_ref());
    H256(hasher.finalize().into())
}

/// Decodes a hex string with or without a `0x` prefix.
pub fn parse_hex(s: &str) -> Result<Bytes, FromHexError> {
    match s.strip_prefix("0x") {
        Some(s) => hex::decode(s).map(Into::into),
        None => hex::decode(s).map(Into::into),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn keccak_of_empty_input() {
        // keccak256("") is a well-known constant.
        assert_eq!(
            keccak([]),
            H256(hex!(
                "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
            ))
        );
    }

    #[test]
    fn parse_hex_accepts_optional_prefix() {
        let with_prefix = parse_hex("0xdeadbeef").expect("valid hex");
        let without_prefix = parse_hex("deadbeef").expect("valid hex");
        assert_eq!(with_prefix, without_prefix);
        assert_eq!(with_prefix.as_ref(), &hex!("deadbeef"));
    }

    #[test]
    fn parse_hex_rejects_garbage() {
        assert!(parse_hex("0xzz").is_err());
    }
}
