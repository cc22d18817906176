//! Bootstrap stub: the one-shot upgrade gate behind a fresh proxy.
//!
//! A proxy address can be predicted and deployed long before its real
//! implementation exists, but the proxy must never expose a callable
//! `initialize` to outsiders in the meantime. The stub is the proxy's
//! first delegate target; its only entrypoints are owner-gated upgrades,
//! and the owner is the deploying harness itself. After the first
//! successful upgrade the proxy delegates elsewhere and the stub is never
//! invoked again, but its address stays in the permanent record because
//! resuming a session must re-derive exactly the same salts.
//!
//! One stub per proxy. A single shared stub per chain would leak upgrade
//! state across unrelated proxies through delegatecall storage, or force
//! the stub itself to become upgradeable.

use bytes::Bytes;
use ethereum_types::Address;
use tracing::{debug, info};

use crate::chain::ChainState;
use crate::error::DeployerError;

/// Marker init code for a stub owned by `owner`. The owner is baked into
/// the constructor, never settable afterwards.
pub fn stub_init_code(owner: Address) -> Bytes {
    let mut code = Vec::with_capacity(15 + 20);
    code.extend_from_slice(b"harbor-stub-v1:");
    code.extend_from_slice(owner.as_bytes());
    code.into()
}

#[derive(Debug, Clone)]
pub struct BootstrapStub {
    address: Address,
    /// The deploying harness, fixed at construction. Not a human signer.
    owner: Address,
    upgraded: bool,
}

impl BootstrapStub {
    pub fn new(address: Address, owner: Address) -> Self {
        Self {
            address,
            owner,
            upgraded: false,
        }
    }

    /// Rebuilds a stub record from persisted session state.
    pub fn restore(address: Address, owner: Address, upgraded: bool) -> Self {
        Self {
            address,
            owner,
            upgraded,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }

    /// Repoints `proxy` from this stub to `implementation`.
    pub fn upgrade_to(
        &mut self,
        caller: Address,
        chain: &mut ChainState,
        proxy: Address,
        implementation: Address,
    ) -> Result<(), DeployerError> {
        self.upgrade_to_and_call(caller, chain, proxy, implementation, &Bytes::new())
    }

    /// Repoints `proxy` to `implementation` and, when `init_data` is
    /// non-empty, runs the initializer in the same unit of work. A failed
    /// initializer rolls the upgrade back entirely: no caller may ever
    /// observe a proxy on its real implementation but uninitialized.
    pub fn upgrade_to_and_call(
        &mut self,
        caller: Address,
        chain: &mut ChainState,
        proxy: Address,
        implementation: Address,
        init_data: &Bytes,
    ) -> Result<(), DeployerError> {
        if caller != self.owner {
            return Err(DeployerError::Unauthorized {
                caller,
                role: "stub owner",
            });
        }
        if self.upgraded {
            return Err(DeployerError::AlreadyUpgraded(self.address));
        }
        let current = chain.proxy_target(proxy)?;
        if current != self.address {
            return Err(DeployerError::StubNotActive {
                proxy,
                stub: self.address,
            });
        }

        let snapshot = chain.clone();
        chain.set_proxy_target(proxy, implementation)?;
        if !init_data.is_empty() {
            if let Err(err) = chain.call(proxy, init_data) {
                *chain = snapshot;
                return Err(err.into());
            }
        }
        self.upgraded = true;
        info!(
            proxy = %format!("{proxy:#x}"),
            implementation = %format!("{implementation:#x}"),
            "proxy upgraded through bootstrap stub"
        );
        debug!(stub = %format!("{:#x}", self.address), "stub retired");
        Ok(())
    }
}
