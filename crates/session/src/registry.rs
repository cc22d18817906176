//! The deployment registry: one entry per logical deployment key.
//!
//! Entries are created when a deployment operation first runs for a key
//! and are never deleted; resumed sessions only append new keys. The one
//! permitted result update is completing a proxy's bootstrap.

use std::collections::BTreeMap;
use std::fmt;

use ethereum_types::Address;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Hierarchical identifier naming one deployable unit within a session,
/// e.g. `"contracts.token"`. Unique per session, stable across resume.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentKey(String);

impl DeploymentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeploymentKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    Contract,
    Proxy,
    Library,
}

#[derive(Debug, Clone)]
pub struct DeploymentEntry {
    pub key: DeploymentKey,
    pub kind: DeploymentKind,
    pub predicted_address: Address,
    /// Set once the on-chain create has run; must then equal
    /// `predicted_address`.
    pub actual_address: Option<Address>,
    pub implementation_key: Option<DeploymentKey>,
    /// Entry-level salt string: `<systemSaltString>/<key>`.
    pub salt_string: String,
    pub stub_address: Option<Address>,
    /// Whether the proxy's first (and only) stub upgrade has completed.
    pub stub_upgraded: bool,
    pub deployer_of_record: Address,
}

impl DeploymentEntry {
    /// A proxy entry whose stub has not completed its upgrade yet.
    pub fn has_pending_stub(&self) -> bool {
        self.kind == DeploymentKind::Proxy && !self.stub_upgraded
    }
}

/// Ordered map of entries, keyed by deployment key. Ordering keeps the
/// serialized form stable across runs.
#[derive(Debug, Default, Clone)]
pub struct DeploymentRegistry {
    entries: BTreeMap<DeploymentKey, DeploymentEntry>,
}

impl DeploymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: DeploymentEntry) -> Result<(), SessionError> {
        if self.entries.contains_key(&entry.key) {
            return Err(SessionError::DuplicateKey(entry.key));
        }
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    pub fn contains(&self, key: &DeploymentKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &DeploymentKey) -> Option<&DeploymentEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &DeploymentKey) -> Option<&mut DeploymentEntry> {
        self.entries.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeploymentEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys of proxy entries whose bootstrap has not completed.
    pub fn pending_stubs(&self) -> Vec<DeploymentKey> {
        self.entries
            .values()
            .filter(|entry| entry.has_pending_stub())
            .map(|entry| entry.key.clone())
            .collect()
    }
}
