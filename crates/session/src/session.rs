//! The deployment session state machine.
//!
//! A session walks `Uninitialized -> Active -> Finished`, exactly once.
//! While active it drives the canonical deployer through commit-reveal
//! for every artifact, records each result in the registry, and persists
//! the whole document through the injected store after every mutation.
//! Resuming replays nothing: it restores the record, re-derives every
//! address from the persisted salt strings and refuses to continue if
//! any byte differs.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use ethereum_types::{Address, U256};
use harbor_common::{
    addresses::{DEFAULT_CREATE2_FACTORY, deployer_relative_address, factory_deployed_address},
    salts::{SaltSuffix, derive_salt},
    utils::keccak,
};
use harbor_deployer::{
    BootstrapStub, CanonicalDeployer, ChainState,
    chain::proxy_init_code,
    factory::deployer_init_code,
    stub::stub_init_code,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::registry::{DeploymentEntry, DeploymentKey, DeploymentKind, DeploymentRegistry};
use crate::store::{
    PersistedDeployment, PersistedSession, RunAction, RunRecord, SCHEMA_VERSION, StoreEngine,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Active,
    Finished,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Active => "active",
            SessionStatus::Finished => "finished",
        }
    }
}

/// Execution context the machine operates against. Owned by the machine
/// for its lifetime; `into_environment` releases it so a successor
/// session (a resume against the same chain) can take over.
#[derive(Debug)]
pub struct Environment {
    pub chain: ChainState,
    /// On-chain identity of the deployment harness. Owns every stub and
    /// every artifact until the final handover.
    pub harness: Address,
    /// The delegated operator executing commits and reveals.
    pub operator: Address,
    /// Whether start/resume performs the owner-side operator delegation.
    pub delegate_operator: bool,
    /// Caller-side wait between commit and reveal, in blocks. There is
    /// no in-protocol timer; an abandoned commitment simply stays.
    pub reveal_confirmations: u64,
}

impl Environment {
    pub fn new(harness: Address, operator: Address) -> Self {
        Self {
            chain: ChainState::new(),
            harness,
            operator,
            delegate_operator: true,
            reveal_confirmations: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub system_salt_string: String,
    /// Final owner of every artifact, handed over at finish.
    pub owner: Address,
    pub network: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

pub struct SessionMachine {
    status: SessionStatus,
    metadata: Option<SessionMetadata>,
    registry: DeploymentRegistry,
    deployer: Option<CanonicalDeployer>,
    stubs: HashMap<DeploymentKey, BootstrapStub>,
    runs: Vec<RunRecord>,
    env: Environment,
    store: Box<dyn StoreEngine>,
    /// Unknown top-level fields carried over from a resumed document.
    extra: BTreeMap<String, Value>,
    /// Unknown per-deployment fields, keyed by deployment key.
    deployment_extra: HashMap<String, BTreeMap<String, Value>>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

impl SessionMachine {
    pub fn new(env: Environment, store: Box<dyn StoreEngine>) -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            metadata: None,
            registry: DeploymentRegistry::new(),
            deployer: None,
            stubs: HashMap::new(),
            runs: Vec::new(),
            env,
            store,
            extra: BTreeMap::new(),
            deployment_extra: HashMap::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn registry(&self) -> &DeploymentRegistry {
        &self.registry
    }

    pub fn deployer_address(&self) -> Option<Address> {
        self.deployer.as_ref().map(CanonicalDeployer::address)
    }

    /// Releases the execution context, consuming the machine. Used to
    /// hand the same chain to a successor session.
    pub fn into_environment(self) -> Environment {
        self.env
    }

    fn require_status(&self, expected: SessionStatus) -> Result<(), SessionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(SessionError::LifecycleViolation {
                expected: expected.as_str(),
                found: self.status.as_str(),
            })
        }
    }

    fn metadata(&self) -> Result<&SessionMetadata, SessionError> {
        self.metadata
            .as_ref()
            .ok_or(SessionError::LifecycleViolation {
                expected: SessionStatus::Active.as_str(),
                found: self.status.as_str(),
            })
    }

    /// The canonical deployer's deterministic identity: CREATE2 through
    /// the well-known factory, salted with the bare campaign string. Pure
    /// in (owner, campaign string), so every chain agrees on it.
    pub fn derive_deployer_address(system_salt_string: &str, owner: Address) -> Address {
        factory_deployed_address(
            DEFAULT_CREATE2_FACTORY,
            derive_salt(system_salt_string, SaltSuffix::None),
            keccak(deployer_init_code(owner)),
        )
    }

    /// Begins a fresh session. Places the canonical deployer on chain if
    /// no code is there yet (another campaign run may have placed the
    /// byte-identical contract already) and delegates the operator.
    pub fn start(
        &mut self,
        network: Option<String>,
        system_salt_string: String,
        owner: Address,
    ) -> Result<(), SessionError> {
        self.require_status(SessionStatus::Uninitialized)?;

        let deployer_address = Self::derive_deployer_address(&system_salt_string, owner);
        if !self.env.chain.has_code(deployer_address) {
            self.env
                .chain
                .deploy(deployer_address, &deployer_init_code(owner), U256::zero())?;
        }
        let mut deployer = CanonicalDeployer::new(deployer_address, owner);
        if self.env.delegate_operator {
            deployer.set_operator(owner, self.env.operator)?;
        }

        let now = unix_now();
        info!(
            deployer = %format!("{deployer_address:#x}"),
            salt_string = %system_salt_string,
            network = ?network,
            "session started"
        );
        self.deployer = Some(deployer);
        self.metadata = Some(SessionMetadata {
            system_salt_string,
            owner,
            network: network.clone(),
            created_at: now,
            updated_at: now,
        });
        self.runs.push(RunRecord {
            action: RunAction::Start,
            at: now,
            network,
            reveal_confirmations: Some(self.env.reveal_confirmations),
        });
        self.status = SessionStatus::Active;
        self.persist()
    }

    /// Restores a session from the store. Nothing is re-executed: the
    /// registry is rebuilt from the document and every address in it is
    /// re-derived from its salt string and compared byte for byte.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        self.require_status(SessionStatus::Uninitialized)?;

        let persisted = self
            .store
            .load()?
            .ok_or_else(|| SessionError::MissingRequiredField("session document".into()))?;
        // A finished document is frozen; expanding a campaign later means
        // starting a new session, never thawing a sealed record.
        if persisted.finished {
            return Err(SessionError::LifecycleViolation {
                expected: SessionStatus::Active.as_str(),
                found: SessionStatus::Finished.as_str(),
            });
        }
        let owner = persisted
            .owner
            .ok_or_else(|| SessionError::MissingRequiredField("owner".into()))?;
        let system_salt_string = persisted
            .salt_string
            .clone()
            .ok_or_else(|| SessionError::MissingRequiredField("saltString".into()))?;

        let deployer_address = Self::derive_deployer_address(&system_salt_string, owner);
        if let Some(recorded) = persisted.deployer {
            if recorded != deployer_address {
                return Err(SessionError::AddressMismatch {
                    key: DeploymentKey::new("deployer"),
                    predicted: deployer_address,
                    actual: recorded,
                });
            }
        }
        if !self.env.chain.has_code(deployer_address) {
            self.env
                .chain
                .deploy(deployer_address, &deployer_init_code(owner), U256::zero())?;
        }
        let mut deployer = CanonicalDeployer::new(deployer_address, owner);
        if self.env.delegate_operator {
            deployer.set_operator(owner, self.env.operator)?;
        }

        let mut registry = DeploymentRegistry::new();
        let mut stubs = HashMap::new();
        let mut deployment_extra = HashMap::new();
        for (raw_key, record) in &persisted.deployment {
            let key = DeploymentKey::new(raw_key.clone());
            let predicted = match record.kind {
                DeploymentKind::Proxy => deployer_relative_address(
                    deployer_address,
                    keccak(format!("{}/proxy", record.salt_string).as_bytes()),
                ),
                DeploymentKind::Contract | DeploymentKind::Library => deployer_relative_address(
                    deployer_address,
                    keccak(record.salt_string.as_bytes()),
                ),
            };
            if predicted != record.address {
                return Err(SessionError::AddressMismatch {
                    key,
                    predicted,
                    actual: record.address,
                });
            }

            let stub_address = match record.kind {
                DeploymentKind::Proxy => {
                    let stub = record.stub.ok_or_else(|| {
                        SessionError::MissingRequiredField(format!("deployment.{raw_key}.stub"))
                    })?;
                    // The stub address is part of the deterministic
                    // record too; a recorded value that does not fall
                    // out of the salt derivation is tampering.
                    let derived_stub = deployer_relative_address(
                        deployer_address,
                        keccak(format!("{}/stub", record.salt_string).as_bytes()),
                    );
                    if stub != derived_stub {
                        return Err(SessionError::AddressMismatch {
                            key,
                            predicted: derived_stub,
                            actual: stub,
                        });
                    }
                    stubs.insert(
                        key.clone(),
                        BootstrapStub::restore(stub, self.env.harness, record.stub_upgraded),
                    );
                    Some(stub)
                }
                _ => None,
            };

            // Materialize the recorded account into the local chain model
            // when it is absent, as for the deployer above. Proxies are
            // reconstructed pointing at whatever the record says they
            // delegate to.
            if let Some(stub) = stub_address {
                if !self.env.chain.has_code(stub) {
                    self.env
                        .chain
                        .deploy(stub, &stub_init_code(self.env.harness), U256::zero())?;
                }
            }
            if !self.env.chain.has_code(record.address) {
                let code = match (record.kind, stub_address) {
                    (DeploymentKind::Proxy, Some(stub)) => {
                        let target = record
                            .implementation
                            .as_ref()
                            .filter(|_| record.stub_upgraded)
                            .and_then(|impl_key| persisted.deployment.get(impl_key))
                            .map(|impl_record| impl_record.address)
                            .unwrap_or(stub);
                        proxy_init_code(target)
                    }
                    _ => Bytes::from(record.salt_string.as_bytes().to_vec()),
                };
                self.env.chain.deploy(record.address, &code, U256::zero())?;
            }
            if !record.extra.is_empty() {
                deployment_extra.insert(raw_key.clone(), record.extra.clone());
            }
            registry.insert(DeploymentEntry {
                key,
                kind: record.kind,
                predicted_address: predicted,
                actual_address: Some(record.address),
                implementation_key: record.implementation.as_deref().map(DeploymentKey::from),
                salt_string: record.salt_string.clone(),
                stub_address,
                stub_upgraded: record.stub_upgraded,
                deployer_of_record: record.deployer,
            })?;
        }

        let pending = registry.pending_stubs();
        if !pending.is_empty() {
            warn!(?pending, "resumed session has proxies awaiting upgrade");
        }

        let now = unix_now();
        info!(
            deployer = %format!("{deployer_address:#x}"),
            entries = registry.len(),
            "session resumed"
        );
        self.deployer = Some(deployer);
        self.registry = registry;
        self.stubs = stubs;
        self.runs = persisted.runs.clone();
        self.runs.push(RunRecord {
            action: RunAction::Resume,
            at: now,
            network: persisted.network.clone(),
            reveal_confirmations: Some(self.env.reveal_confirmations),
        });
        self.extra = persisted.extra.clone();
        self.deployment_extra = deployment_extra;
        self.metadata = Some(SessionMetadata {
            system_salt_string,
            owner,
            network: persisted.network,
            created_at: persisted
                .runs
                .first()
                .map(|run| run.at)
                .unwrap_or(now),
            updated_at: now,
        });
        self.status = SessionStatus::Active;
        self.persist()
    }

    fn entry_salt_string(&self, key: &DeploymentKey) -> Result<String, SessionError> {
        Ok(format!("{}/{key}", self.metadata()?.system_salt_string))
    }

    /// Full commit-reveal round for one user salt string.
    fn commit_and_reveal(
        &mut self,
        user_salt_string: &str,
        init_code: &Bytes,
        init_data: &Bytes,
        value: U256,
    ) -> Result<Address, SessionError> {
        let operator = self.env.operator;
        let confirmations = self.env.reveal_confirmations;
        let user_salt = Bytes::from(user_salt_string.as_bytes().to_vec());
        let hash = CanonicalDeployer::commitment_hash(init_code, &user_salt, init_data);

        let deployer = self
            .deployer
            .as_mut()
            .ok_or(SessionError::LifecycleViolation {
                expected: SessionStatus::Active.as_str(),
                found: self.status.as_str(),
            })?;
        deployer.commit(operator, hash, &user_salt)?;
        debug!(
            salt = %user_salt_string,
            confirmations,
            "commitment placed, revealing after confirmation distance"
        );
        let deployed = deployer.reveal(
            operator,
            &mut self.env.chain,
            init_code,
            &user_salt,
            init_data,
            value,
        )?;
        Ok(deployed)
    }

    fn record_runtime_entry(
        &mut self,
        key: DeploymentKey,
        kind: DeploymentKind,
        init_code: &Bytes,
        value: U256,
    ) -> Result<Address, SessionError> {
        self.require_status(SessionStatus::Active)?;
        if self.registry.contains(&key) {
            return Err(SessionError::DuplicateKey(key));
        }

        let salt_string = self.entry_salt_string(&key)?;
        let predicted = self.predict_entry_address(&salt_string)?;
        let actual = self.commit_and_reveal(&salt_string, init_code, &Bytes::new(), value)?;
        if actual != predicted {
            return Err(SessionError::AddressMismatch {
                key,
                predicted,
                actual,
            });
        }
        self.env.chain.set_owner(actual, self.env.harness)?;

        let deployer_of_record = self.env.operator;
        self.registry.insert(DeploymentEntry {
            key: key.clone(),
            kind,
            predicted_address: predicted,
            actual_address: Some(actual),
            implementation_key: None,
            salt_string,
            stub_address: None,
            stub_upgraded: false,
            deployer_of_record,
        })?;
        info!(key = %key, address = %format!("{actual:#x}"), "contract deployed");
        self.persist()?;
        Ok(actual)
    }

    fn predict_entry_address(&self, user_salt_string: &str) -> Result<Address, SessionError> {
        let deployer = self
            .deployer
            .as_ref()
            .ok_or(SessionError::LifecycleViolation {
                expected: SessionStatus::Active.as_str(),
                found: self.status.as_str(),
            })?;
        let user_salt = Bytes::from(user_salt_string.as_bytes().to_vec());
        Ok(deployer.predict(&user_salt))
    }

    pub fn deploy_contract(
        &mut self,
        key: impl Into<DeploymentKey>,
        init_code: &Bytes,
        value: U256,
    ) -> Result<Address, SessionError> {
        self.record_runtime_entry(key.into(), DeploymentKind::Contract, init_code, value)
    }

    pub fn deploy_library(
        &mut self,
        key: impl Into<DeploymentKey>,
        init_code: &Bytes,
    ) -> Result<Address, SessionError> {
        self.record_runtime_entry(key.into(), DeploymentKind::Library, init_code, U256::zero())
    }

    /// Predicts where a deployment under `key` will land, without
    /// touching the chain. Usable for any not-yet-deployed key.
    pub fn predict_address(&self, key: impl Into<DeploymentKey>) -> Result<Address, SessionError> {
        let key = key.into();
        let salt_string = self.entry_salt_string(&key)?;
        self.predict_entry_address(&salt_string)
    }

    fn prepare_proxy_inner(&mut self, key: &DeploymentKey) -> Result<Address, SessionError> {
        let salt_string = self.entry_salt_string(key)?;
        let harness = self.env.harness;

        let stub_address = self.commit_and_reveal(
            &format!("{salt_string}/stub"),
            &stub_init_code(harness),
            &Bytes::new(),
            U256::zero(),
        )?;
        let proxy_address = self.commit_and_reveal(
            &format!("{salt_string}/proxy"),
            &proxy_init_code(stub_address),
            &Bytes::new(),
            U256::zero(),
        )?;
        self.env.chain.set_owner(proxy_address, harness)?;

        self.stubs
            .insert(key.clone(), BootstrapStub::new(stub_address, harness));
        self.registry.insert(DeploymentEntry {
            key: key.clone(),
            kind: DeploymentKind::Proxy,
            predicted_address: proxy_address,
            actual_address: Some(proxy_address),
            implementation_key: None,
            salt_string,
            stub_address: Some(stub_address),
            stub_upgraded: false,
            deployer_of_record: self.env.operator,
        })?;
        info!(
            key = %key,
            proxy = %format!("{proxy_address:#x}"),
            stub = %format!("{stub_address:#x}"),
            "proxy parked on bootstrap stub"
        );
        Ok(proxy_address)
    }

    /// Deploys the stub and the proxy for `key`, leaving the proxy parked
    /// on the stub. The entry stays pending until `upgrade_proxy` runs.
    pub fn prepare_proxy(
        &mut self,
        key: impl Into<DeploymentKey>,
    ) -> Result<Address, SessionError> {
        let key = key.into();
        self.require_status(SessionStatus::Active)?;
        if self.registry.contains(&key) {
            return Err(SessionError::DuplicateKey(key));
        }
        let proxy = self.prepare_proxy_inner(&key)?;
        self.persist()?;
        Ok(proxy)
    }

    fn upgrade_proxy_inner(
        &mut self,
        key: &DeploymentKey,
        implementation_key: &DeploymentKey,
        init_data: &Bytes,
    ) -> Result<(), SessionError> {
        let proxy_address = {
            let entry = self
                .registry
                .get(key)
                .ok_or_else(|| SessionError::UnknownKey(key.clone()))?;
            if entry.kind != DeploymentKind::Proxy {
                return Err(SessionError::NotAProxy(key.clone()));
            }
            entry
                .actual_address
                .ok_or_else(|| SessionError::NotAProxy(key.clone()))?
        };
        let implementation = {
            let entry = self
                .registry
                .get(implementation_key)
                .ok_or_else(|| SessionError::UnknownImplementation(implementation_key.clone()))?;
            entry.actual_address.ok_or_else(|| {
                SessionError::ImplementationNotDeployed(implementation_key.clone())
            })?
        };

        let harness = self.env.harness;
        let stub = self.stubs.get_mut(key).ok_or_else(|| {
            SessionError::MissingRequiredField(format!("deployment.{key}.stub"))
        })?;
        stub.upgrade_to_and_call(
            harness,
            &mut self.env.chain,
            proxy_address,
            implementation,
            init_data,
        )?;

        let entry = self
            .registry
            .get_mut(key)
            .ok_or_else(|| SessionError::UnknownKey(key.clone()))?;
        entry.implementation_key = Some(implementation_key.clone());
        entry.stub_upgraded = true;
        info!(
            key = %key,
            implementation = %implementation_key,
            "proxy upgraded to implementation"
        );
        Ok(())
    }

    /// Completes a prepared proxy: repoints it from the stub to the real
    /// implementation and runs the initializer atomically.
    pub fn upgrade_proxy(
        &mut self,
        key: impl Into<DeploymentKey>,
        implementation_key: impl Into<DeploymentKey>,
        init_data: &Bytes,
    ) -> Result<(), SessionError> {
        self.require_status(SessionStatus::Active)?;
        self.upgrade_proxy_inner(&key.into(), &implementation_key.into(), init_data)?;
        self.persist()
    }

    /// Stub deploy, proxy deploy and upgrade as one logical unit of work.
    /// Any failure restores the chain, the deployer and the record, so no
    /// half-initialized proxy is ever observable or persisted.
    pub fn deploy_proxy(
        &mut self,
        key: impl Into<DeploymentKey>,
        implementation_key: impl Into<DeploymentKey>,
        init_data: &Bytes,
    ) -> Result<Address, SessionError> {
        let key = key.into();
        let implementation_key = implementation_key.into();
        self.require_status(SessionStatus::Active)?;
        if self.registry.contains(&key) {
            return Err(SessionError::DuplicateKey(key));
        }

        let chain_snapshot = self.env.chain.clone();
        let deployer_snapshot = self.deployer.clone();
        let registry_snapshot = self.registry.clone();
        let stubs_snapshot = self.stubs.clone();

        let outcome = self
            .prepare_proxy_inner(&key)
            .and_then(|proxy| {
                self.upgrade_proxy_inner(&key, &implementation_key, init_data)?;
                Ok(proxy)
            });
        match outcome {
            Ok(proxy) => {
                self.persist()?;
                Ok(proxy)
            }
            Err(err) => {
                self.env.chain = chain_snapshot;
                self.deployer = deployer_snapshot;
                self.registry = registry_snapshot;
                self.stubs = stubs_snapshot;
                Err(err)
            }
        }
    }

    /// Ends the session. Refuses while any proxy is still parked on its
    /// stub, then hands every artifact to the final owner and moves to
    /// the terminal state.
    pub fn finish(&mut self) -> Result<(), SessionError> {
        self.require_status(SessionStatus::Active)?;
        let pending = self.registry.pending_stubs();
        if !pending.is_empty() {
            return Err(SessionError::PendingStubsRemain(pending));
        }

        let owner = self.metadata()?.owner;
        let deployed: Vec<Address> = self
            .registry
            .iter()
            .filter_map(|entry| entry.actual_address)
            .collect();
        for address in deployed {
            self.env.chain.set_owner(address, owner)?;
        }

        let now = unix_now();
        let network = self.metadata()?.network.clone();
        self.runs.push(RunRecord {
            action: RunAction::Finish,
            at: now,
            network,
            reveal_confirmations: None,
        });
        if let Some(metadata) = self.metadata.as_mut() {
            metadata.updated_at = now;
        }
        self.status = SessionStatus::Finished;
        info!(
            owner = %format!("{owner:#x}"),
            entries = self.registry.len(),
            "session finished, ownership handed over"
        );
        self.persist()
    }

    /// Serializes the current record. Addresses, salts and stub state go
    /// to the document exactly as registered; unknown fields from a
    /// resumed document ride along untouched.
    pub fn to_persisted(&self) -> Result<PersistedSession, SessionError> {
        let metadata = self.metadata()?;
        let mut deployment = BTreeMap::new();
        for entry in self.registry.iter() {
            let address = entry.actual_address.unwrap_or(entry.predicted_address);
            let salt = match entry.kind {
                DeploymentKind::Proxy => {
                    keccak(format!("{}/proxy", entry.salt_string).as_bytes())
                }
                _ => keccak(entry.salt_string.as_bytes()),
            };
            deployment.insert(
                entry.key.as_str().to_owned(),
                PersistedDeployment {
                    kind: entry.kind,
                    address,
                    salt,
                    salt_string: entry.salt_string.clone(),
                    deployer: entry.deployer_of_record,
                    implementation: entry
                        .implementation_key
                        .as_ref()
                        .map(|key| key.as_str().to_owned()),
                    proxy_type: (entry.kind == DeploymentKind::Proxy)
                        .then(|| "bootstrap".to_owned()),
                    stub: entry.stub_address,
                    stub_upgraded: entry.stub_upgraded,
                    extra: self
                        .deployment_extra
                        .get(entry.key.as_str())
                        .cloned()
                        .unwrap_or_default(),
                },
            );
        }
        Ok(PersistedSession {
            schema_version: SCHEMA_VERSION,
            owner: Some(metadata.owner),
            deployer: self.deployer_address(),
            salt_string: Some(metadata.system_salt_string.clone()),
            network: metadata.network.clone(),
            finished: self.status == SessionStatus::Finished,
            deployment,
            runs: self.runs.clone(),
            extra: self.extra.clone(),
        })
    }

    fn persist(&mut self) -> Result<(), SessionError> {
        if let Some(metadata) = self.metadata.as_mut() {
            metadata.updated_at = unix_now();
        }
        let document = self.to_persisted()?;
        self.store.save(&document)?;
        Ok(())
    }
}
