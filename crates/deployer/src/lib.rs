//! On-chain side of the harbor deployment protocol: a minimal serial
//! chain model, the canonical commit-reveal deployer with owner/operator
//! separation, and the one-shot bootstrap stub that gates the first proxy
//! upgrade.

pub mod chain;
pub mod error;
pub mod factory;
pub mod stub;

pub use chain::ChainState;
pub use error::DeployerError;
pub use factory::CanonicalDeployer;
pub use stub::BootstrapStub;
