//! Minimal model of the execution environment the deployer runs against.
//!
//! Transactions on the target platform execute strictly serially, so a
//! plain mutable map of accounts is an accurate model. The state is
//! cheaply cloneable; callers that need all-or-nothing semantics take a
//! snapshot and restore it on failure.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use harbor_common::utils::keccak;
use tracing::trace;

/// Marker prefix the simulated chain recognizes as proxy constructor
/// code. The 20 bytes that follow it are the initial delegate target.
const PROXY_CODE_PREFIX: &[u8] = b"harbor-proxy-v1:";

/// Builds init code for a proxy pointed at `initial_target`.
pub fn proxy_init_code(initial_target: Address) -> Bytes {
    let mut code = Vec::with_capacity(PROXY_CODE_PREFIX.len() + 20);
    code.extend_from_slice(PROXY_CODE_PREFIX);
    code.extend_from_slice(initial_target.as_bytes());
    code.into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountKind {
    /// Plain runtime code.
    Runtime,
    /// Delegating proxy with a mutable target.
    Proxy { target: Address },
}

#[derive(Debug, Clone)]
pub struct Account {
    pub code_hash: H256,
    pub kind: AccountKind,
    /// Value forwarded with the creating transaction.
    pub endowment: U256,
    /// Whether the atomic post-create init call has run.
    pub initialized: bool,
    /// Governance owner of the artifact, if any has been recorded.
    pub owner: Option<Address>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("address {0:#x} already has code")]
    AddressOccupied(Address),
    #[error("no contract at {0:#x}")]
    AccountMissing(Address),
    #[error("call to {0:#x} reverted")]
    CallReverted(Address),
    #[error("contract at {0:#x} is not a proxy")]
    NotAProxy(Address),
    #[error("contract at {0:#x} is already initialized")]
    AlreadyInitialized(Address),
}

/// Serial, in-memory chain state.
#[derive(Debug, Default, Clone)]
pub struct ChainState {
    accounts: HashMap<Address, Account>,
    /// Addresses whose calls are forced to revert. Environment policy for
    /// exercising failure paths; never set on a production chain.
    reverting: HashSet<Address>,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places code at `address`, failing if the address is occupied.
    ///
    /// Constructor execution is simulated: init code carrying the proxy
    /// marker produces a proxy account, anything else runtime code.
    pub fn deploy(
        &mut self,
        address: Address,
        init_code: &Bytes,
        value: U256,
    ) -> Result<(), ChainError> {
        if self.accounts.contains_key(&address) {
            return Err(ChainError::AddressOccupied(address));
        }
        let kind = match init_code.strip_prefix(PROXY_CODE_PREFIX) {
            Some(rest) if rest.len() == 20 => AccountKind::Proxy {
                target: Address::from_slice(rest),
            },
            _ => AccountKind::Runtime,
        };
        trace!(address = %format!("{address:#x}"), ?kind, "placing code");
        self.accounts.insert(
            address,
            Account {
                code_hash: keccak(init_code),
                kind,
                endowment: value,
                initialized: false,
                owner: None,
            },
        );
        Ok(())
    }

    /// Performs a call into `to`. The only calls this model needs are
    /// one-shot initializers, so a successful call marks the account
    /// initialized; a second init call reverts like a guarded
    /// `initialize` would.
    pub fn call(&mut self, to: Address, _calldata: &Bytes) -> Result<(), ChainError> {
        if self.reverting.contains(&to) {
            return Err(ChainError::CallReverted(to));
        }
        let account = self
            .accounts
            .get_mut(&to)
            .ok_or(ChainError::AccountMissing(to))?;
        if account.initialized {
            return Err(ChainError::AlreadyInitialized(to));
        }
        account.initialized = true;
        Ok(())
    }

    pub fn has_code(&self, address: Address) -> bool {
        self.accounts.contains_key(&address)
    }

    pub fn code_hash(&self, address: Address) -> Option<H256> {
        self.accounts.get(&address).map(|account| account.code_hash)
    }

    pub fn is_initialized(&self, address: Address) -> bool {
        self.accounts
            .get(&address)
            .is_some_and(|account| account.initialized)
    }

    pub fn proxy_target(&self, proxy: Address) -> Result<Address, ChainError> {
        match self.accounts.get(&proxy) {
            Some(Account {
                kind: AccountKind::Proxy { target },
                ..
            }) => Ok(*target),
            Some(_) => Err(ChainError::NotAProxy(proxy)),
            None => Err(ChainError::AccountMissing(proxy)),
        }
    }

    pub fn set_proxy_target(&mut self, proxy: Address, target: Address) -> Result<(), ChainError> {
        match self.accounts.get_mut(&proxy) {
            Some(Account {
                kind: AccountKind::Proxy { target: current },
                ..
            }) => {
                *current = target;
                Ok(())
            }
            Some(_) => Err(ChainError::NotAProxy(proxy)),
            None => Err(ChainError::AccountMissing(proxy)),
        }
    }

    pub fn owner_of(&self, address: Address) -> Result<Option<Address>, ChainError> {
        self.accounts
            .get(&address)
            .map(|account| account.owner)
            .ok_or(ChainError::AccountMissing(address))
    }

    pub fn set_owner(&mut self, address: Address, owner: Address) -> Result<(), ChainError> {
        let account = self
            .accounts
            .get_mut(&address)
            .ok_or(ChainError::AccountMissing(address))?;
        account.owner = Some(owner);
        Ok(())
    }

    /// Forces every subsequent call into `address` to revert. Test
    /// environment policy for exercising rollback paths.
    pub fn force_revert_on_call(&mut self, address: Address) {
        self.reverting.insert(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn deploy_rejects_occupied_address() {
        let mut chain = ChainState::new();
        let code: Bytes = Bytes::from_static(b"runtime");
        chain.deploy(addr(1), &code, U256::zero()).expect("first deploy");
        assert!(matches!(
            chain.deploy(addr(1), &code, U256::zero()),
            Err(ChainError::AddressOccupied(_))
        ));
    }

    #[test]
    fn proxy_init_code_round_trips_target() {
        let mut chain = ChainState::new();
        let target = addr(0xaa);
        chain
            .deploy(addr(2), &proxy_init_code(target), U256::zero())
            .expect("proxy deploys");
        assert_eq!(chain.proxy_target(addr(2)).expect("is a proxy"), target);
    }

    #[test]
    fn runtime_account_is_not_a_proxy() {
        let mut chain = ChainState::new();
        chain
            .deploy(addr(3), &Bytes::from_static(b"runtime"), U256::zero())
            .expect("deploys");
        assert!(matches!(
            chain.proxy_target(addr(3)),
            Err(ChainError::NotAProxy(_))
        ));
    }

    #[test]
    fn init_call_is_single_use() {
        let mut chain = ChainState::new();
        chain
            .deploy(addr(4), &Bytes::from_static(b"runtime"), U256::zero())
            .expect("deploys");
        let data = Bytes::from_static(b"init");
        chain.call(addr(4), &data).expect("first init");
        assert!(matches!(
            chain.call(addr(4), &data),
            Err(ChainError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn forced_revert_surfaces_as_call_reverted() {
        let mut chain = ChainState::new();
        chain
            .deploy(addr(5), &Bytes::from_static(b"runtime"), U256::zero())
            .expect("deploys");
        chain.force_revert_on_call(addr(5));
        assert!(matches!(
            chain.call(addr(5), &Bytes::new()),
            Err(ChainError::CallReverted(_))
        ));
    }
}
