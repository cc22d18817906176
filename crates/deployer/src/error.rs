use ethereum_types::{Address, H256};

use crate::chain::ChainError;

/// Protocol violations surfaced by the canonical deployer and the
/// bootstrap stub. None of these are recoverable in place: every one
/// aborts the enclosing operation with state rolled back.
#[derive(Debug, thiserror::Error)]
pub enum DeployerError {
    #[error("caller {caller:#x} is not the {role}")]
    Unauthorized {
        caller: Address,
        role: &'static str,
    },
    #[error("operator is unset; the owner must delegate one first")]
    OperatorUnset,
    #[error("commitment {0:#x} already present")]
    AlreadyCommitted(H256),
    #[error("no commitment {0:#x} owned by this sender")]
    NoCommitmentOrWrongSender(H256),
    #[error("predicted address {predicted:#x} does not match deployed address {actual:#x}")]
    AddressMismatch { predicted: Address, actual: Address },
    #[error("stub at {0:#x} was already upgraded")]
    AlreadyUpgraded(Address),
    #[error("proxy {proxy:#x} does not delegate to stub {stub:#x}")]
    StubNotActive { proxy: Address, stub: Address },
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}
