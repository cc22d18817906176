use ethereum_types::Address;
use harbor_deployer::{DeployerError, chain::ChainError};

use crate::registry::DeploymentKey;
use crate::store::StoreError;

/// Session-level failures. Every variant aborts the enclosing operation;
/// partial application of a deployment step would corrupt the
/// deterministic-address record for all future resumes.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("lifecycle violation: operation requires the {expected} state but the session is {found}")]
    LifecycleViolation {
        expected: &'static str,
        found: &'static str,
    },
    #[error("duplicate deployment key {0}")]
    DuplicateKey(DeploymentKey),
    #[error("resume state is missing required field {0}")]
    MissingRequiredField(String),
    #[error("bootstrap stubs still pending for {0:?}")]
    PendingStubsRemain(Vec<DeploymentKey>),
    #[error("address mismatch for {key}: predicted {predicted:#x}, got {actual:#x}")]
    AddressMismatch {
        key: DeploymentKey,
        predicted: Address,
        actual: Address,
    },
    #[error("unknown deployment key {0}")]
    UnknownKey(DeploymentKey),
    #[error("unknown implementation key {0}")]
    UnknownImplementation(DeploymentKey),
    #[error("implementation {0} has no deployed address")]
    ImplementationNotDeployed(DeploymentKey),
    #[error("entry {0} is not a proxy")]
    NotAProxy(DeploymentKey),
    #[error("deployer error: {0}")]
    Deployer(#[from] DeployerError),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
