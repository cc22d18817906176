//! Persisted session state and the pluggable store trait behind it.
//!
//! The on-disk shape is a stable JSON document: camelCase keys, one
//! `deployment` object keyed by deployment key, and an append-only `runs`
//! history. Fields this version does not understand are preserved
//! verbatim so older tooling can read files written by newer versions.

use std::collections::BTreeMap;

use ethereum_types::{Address, H256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::DeploymentKind;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed session state: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Backend that loads and saves a whole session document. Implementations
/// must make `save` atomic with respect to concurrent readers of the same
/// location.
pub trait StoreEngine: std::fmt::Debug + Send {
    /// Returns `None` when no session has been persisted yet.
    fn load(&self) -> Result<Option<PersistedSession>, StoreError>;
    fn save(&self, session: &PersistedSession) -> Result<(), StoreError>;
}

pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// The full session document. Required fields are optional here; resume
/// validation reports which one is missing instead of a generic parse
/// failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployer: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub deployment: BTreeMap<String, PersistedDeployment>,
    #[serde(default)]
    pub runs: Vec<RunRecord>,
    /// Keys written by other versions of the tooling. Round-tripped
    /// untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDeployment {
    pub kind: DeploymentKind,
    pub address: Address,
    pub salt: H256,
    pub salt_string: String,
    pub deployer: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
    /// Proxy flavor; always `"bootstrap"` for entries this tooling
    /// writes, absent for plain contracts and libraries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stub: Option<Address>,
    #[serde(default)]
    pub stub_upgraded: bool,
    /// Keys written by other versions of the tooling. Round-tripped
    /// untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunAction {
    Start,
    Resume,
    Finish,
}

/// One line of the append-only run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub action: RunAction,
    /// Unix timestamp, seconds.
    pub at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reveal_confirmations: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_round_trip() {
        let raw = r#"{
            "schemaVersion": 1,
            "owner": "0x000000000000000000000000000000000000abcd",
            "saltString": "Harbor-v1",
            "futureKnob": {"nested": true},
            "deployment": {}
        }"#;
        let parsed: PersistedSession = serde_json::from_str(raw).expect("parses");
        assert_eq!(parsed.salt_string.as_deref(), Some("Harbor-v1"));
        assert!(parsed.extra.contains_key("futureKnob"));

        let reserialized = serde_json::to_value(&parsed).expect("serializes");
        assert_eq!(
            reserialized["futureKnob"],
            serde_json::json!({"nested": true})
        );
    }

    #[test]
    fn missing_optional_sections_default() {
        let parsed: PersistedSession =
            serde_json::from_str(r#"{"saltString": "s"}"#).expect("parses");
        assert_eq!(parsed.schema_version, SCHEMA_VERSION);
        assert!(parsed.deployment.is_empty());
        assert!(parsed.runs.is_empty());
        assert!(!parsed.finished);
    }

    #[test]
    fn deployment_keys_serialize_camel_case() {
        let deployment = PersistedDeployment {
            kind: DeploymentKind::Proxy,
            address: Address::from_low_u64_be(1),
            salt: H256::zero(),
            salt_string: "Harbor-v1/proxies.core/proxy".into(),
            deployer: Address::from_low_u64_be(2),
            implementation: Some("contracts.core".into()),
            proxy_type: Some("bootstrap".into()),
            stub: Some(Address::from_low_u64_be(3)),
            stub_upgraded: true,
            extra: BTreeMap::new(),
        };
        let value = serde_json::to_value(&deployment).expect("serializes");
        assert_eq!(value["saltString"], "Harbor-v1/proxies.core/proxy");
        assert_eq!(value["stubUpgraded"], true);
        assert_eq!(value["kind"], "proxy");
        assert_eq!(value["proxyType"], "bootstrap");
    }
}
