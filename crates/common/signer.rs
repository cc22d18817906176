use secp256k1::{SECP256K1, SecretKey};

use crate::{Address, utils::keccak};

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("failed to derive address from public key")]
    AddressDerivation,
}

/// Derives the 20-byte account address controlled by a secret key.
pub fn address_from_secret_key(secret_key: &SecretKey) -> Result<Address, SignerError> {
    let public_key = secret_key.public_key(SECP256K1);
    let hash = keccak(
        public_key
            .serialize_uncompressed()
            .get(1..)
            .ok_or(SignerError::AddressDerivation)?,
    );
    let bytes = hash
        .as_bytes()
        .get(12..)
        .ok_or(SignerError::AddressDerivation)?;
    Ok(Address::from_slice(bytes))
}
