//! Deployment session orchestration: the lifecycle state machine, the
//! named deployment registry and JSON-persisted, resumable session state.

pub mod error;
pub mod registry;
pub mod session;
pub mod store;
pub mod store_backend;

pub use error::SessionError;
pub use registry::{DeploymentEntry, DeploymentKey, DeploymentKind, DeploymentRegistry};
pub use session::{Environment, SessionMachine, SessionMetadata, SessionStatus};
pub use store::{
    PersistedDeployment, PersistedSession, RunAction, RunRecord, StoreEngine, StoreError,
};
pub use store_backend::{FileStore, InMemoryStore};
