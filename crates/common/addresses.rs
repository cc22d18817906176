//! Deterministic contract address prediction.
//!
//! Pure functions only. Three derivation rules are involved, all fixed by
//! the execution environment rather than by this crate:
//!
//! * CREATE: `keccak(rlp([sender, nonce]))[12..]`
//! * CREATE2: `keccak(0xff ++ deployer ++ salt ++ keccak(init_code))[12..]`
//! * CREATE3 (two hops): a fixed shim is placed with CREATE2, then the
//!   final contract is created by the shim with nonce 1, making the final
//!   address independent of the init code.

use hex_literal::hex;

use crate::{Address, H160, H256, utils::keccak};

/// Address of the canonical deterministic CREATE2 factory present on all
/// supported chains.
pub const DEFAULT_CREATE2_FACTORY: Address =
    H160(hex!("4e59b44847b379578588920ca78fbf26c0b4956c"));

/// Keccak hash of the fixed CREATE3 shim init code
/// (`0x67363d3d37363d34f03d5260086018f3`). Constant across all chains.
pub const SHIM_INIT_CODE_HASH: H256 = H256(hex!(
    "21c35dbe1b344a2488cf3321d6ce542f8e9f305544ff09e4993a62319a497c1f"
));

/// CREATE2 address: where `factory` places code for a given salt and init
/// code hash.
pub fn factory_deployed_address(factory: Address, salt: H256, init_code_hash: H256) -> Address {
    let mut preimage = [0u8; 85];
    preimage[0] = 0xff;
    preimage[1..21].copy_from_slice(factory.as_bytes());
    preimage[21..53].copy_from_slice(salt.as_bytes());
    preimage[53..85].copy_from_slice(init_code_hash.as_bytes());
    Address::from_slice(&keccak(preimage).as_bytes()[12..])
}

/// Plain CREATE address for `sender` at the given nonce.
pub fn create_address(sender: Address, nonce: u64) -> Address {
    // rlp([sender, nonce]); the payload is always < 56 bytes so a short
    // list header suffices.
    let nonce_rlp: Vec<u8> = match nonce {
        0 => vec![0x80],
        n if n < 0x80 => vec![n as u8],
        n => {
            let be = n.to_be_bytes();
            let first = be.iter().position(|b| *b != 0).unwrap_or(7);
            let mut out = Vec::with_capacity(9);
            out.push(0x80 + (8 - first) as u8);
            out.extend_from_slice(&be[first..]);
            out
        }
    };
    let mut payload = Vec::with_capacity(22 + nonce_rlp.len());
    payload.push(0xc0 + 21 + nonce_rlp.len() as u8);
    payload.push(0x94);
    payload.extend_from_slice(sender.as_bytes());
    payload.extend_from_slice(&nonce_rlp);
    Address::from_slice(&keccak(payload).as_bytes()[12..])
}

/// CREATE3-style address: depends only on the deployer identity and the
/// salt, never on the init code. This is what allows swapping the
/// implementation behind an address without moving it.
pub fn deployer_relative_address(deployer: Address, salt: H256) -> Address {
    let shim = factory_deployed_address(deployer, salt, SHIM_INIT_CODE_HASH);
    create_address(shim, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::salts::{SaltSuffix, derive_salt};
    use hex_literal::hex;

    #[test]
    fn create2_matches_eip1014_vector() {
        // EIP-1014 example: deployer 0x0, salt 0x0, init code 0x00.
        let predicted = factory_deployed_address(
            Address::zero(),
            H256::zero(),
            keccak([0x00]),
        );
        assert_eq!(
            predicted,
            Address::from_slice(&hex!("4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38"))
        );
    }

    #[test]
    fn create2_is_order_independent() {
        let factory = Address::from_low_u64_be(0xbeef);
        let a = factory_deployed_address(factory, H256::from_low_u64_be(1), keccak(b"code-a"));
        let b = factory_deployed_address(factory, H256::from_low_u64_be(2), keccak(b"code-b"));
        // Recomputing in reverse order yields the same addresses.
        let b2 = factory_deployed_address(factory, H256::from_low_u64_be(2), keccak(b"code-b"));
        let a2 = factory_deployed_address(factory, H256::from_low_u64_be(1), keccak(b"code-a"));
        assert_eq!(a, a2);
        assert_eq!(b, b2);
        assert_ne!(a, b);
    }

    #[test]
    fn create_address_distinguishes_nonces() {
        let sender = Address::from_low_u64_be(0xcafe);
        assert_ne!(create_address(sender, 0), create_address(sender, 1));
        assert_ne!(create_address(sender, 1), create_address(sender, 0x80));
        assert_ne!(create_address(sender, 0x80), create_address(sender, 0x1_0000));
    }

    #[test]
    fn deployer_relative_address_ignores_init_code() {
        // No init code parameter at all: the same (deployer, salt) pair
        // must pin the same address no matter what ends up deployed there.
        let deployer = Address::from_low_u64_be(0xd00d);
        let salt = derive_salt("Harbor-v1", SaltSuffix::Proxy);
        assert_eq!(
            deployer_relative_address(deployer, salt),
            deployer_relative_address(deployer, salt)
        );
    }

    #[test]
    fn deployer_relative_address_depends_on_both_inputs() {
        let salt = derive_salt("Harbor-v1", SaltSuffix::None);
        let a = deployer_relative_address(Address::from_low_u64_be(1), salt);
        let b = deployer_relative_address(Address::from_low_u64_be(2), salt);
        assert_ne!(a, b);

        let deployer = Address::from_low_u64_be(1);
        let c = deployer_relative_address(deployer, derive_salt("Harbor-v1", SaltSuffix::Stub));
        let d = deployer_relative_address(deployer, derive_salt("Harbor-v1", SaltSuffix::Proxy));
        assert_ne!(c, d);
    }
}
