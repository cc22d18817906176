//! Shared primitives for the harbor deployment framework: keccak hashing,
//! campaign salt derivation and deterministic address computation.

pub mod addresses;
pub mod salts;
pub mod signer;
pub mod utils;

pub use ethereum_types::{Address, H160, H256, U256};
