//! The canonical deployer contract: commit-reveal ledger plus operator
//! registry.
//!
//! Commit-reveal exists because creation bytecode and salt are visible in
//! the mempool; anyone could copy them into a higher-gas transaction and
//! claim the address first. Committing to `keccak(init_code || user_salt
//! || init_data)` hides the payload until the committer reveals it, and
//! the wrong-sender check stops reveal hijacking.
//!
//! The owner (a governance multisig, baked in at construction) only
//! delegates; the operator executes routine deployments. Rotating the
//! operator never moves any derived address: addresses depend on the
//! deployer contract identity and the salt alone.

use std::collections::HashMap;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use harbor_common::{addresses, utils::keccak};
use tracing::{debug, info};

use crate::chain::ChainState;
use crate::error::DeployerError;

/// Marker init code for a canonical deployer instance. The governance
/// owner is baked into the bytecode, so a byte-identical replay on
/// another chain carries the same owner.
pub fn deployer_init_code(owner: Address) -> Bytes {
    let mut code = Vec::with_capacity(19 + 20);
    code.extend_from_slice(b"harbor-deployer-v1:");
    code.extend_from_slice(owner.as_bytes());
    code.into()
}

/// Events recorded by the deployer for off-chain tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployerEvent {
    Committed {
        hash: H256,
        user_salt: Bytes,
        committer: Address,
    },
    Deployed {
        address: Address,
        user_salt: Bytes,
        deployer: Address,
    },
    OperatorChanged {
        old: Option<Address>,
        new: Address,
    },
}

#[derive(Debug, Clone)]
pub struct CanonicalDeployer {
    /// The deployer contract's own deterministic identity. All derived
    /// addresses hang off this.
    address: Address,
    /// Fixed at construction; may rotate the operator, may never deploy.
    owner: Address,
    /// Starts unset on every fresh chain. An adversary who replays the
    /// deployer bytecode elsewhere gets a contract they cannot delegate.
    operator: Option<Address>,
    /// One-shot commitments: hash -> committer at commit time.
    commitments: HashMap<H256, Address>,
    events: Vec<DeployerEvent>,
}

impl CanonicalDeployer {
    pub fn new(address: Address, owner: Address) -> Self {
        Self {
            address,
            owner,
            operator: None,
            commitments: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn operator(&self) -> Option<Address> {
        self.operator
    }

    pub fn events(&self) -> &[DeployerEvent] {
        &self.events
    }

    /// Rotates the operator. Owner-gated; has zero effect on any derived
    /// address, which is what makes rotation safe at any time.
    pub fn set_operator(
        &mut self,
        caller: Address,
        new_operator: Address,
    ) -> Result<(), DeployerError> {
        if caller != self.owner {
            return Err(DeployerError::Unauthorized {
                caller,
                role: "owner",
            });
        }
        let old = self.operator.replace(new_operator);
        info!(
            old = ?old.map(|a| format!("{a:#x}")),
            new = %format!("{new_operator:#x}"),
            "operator rotated"
        );
        self.events.push(DeployerEvent::OperatorChanged {
            old,
            new: new_operator,
        });
        Ok(())
    }

    /// The commitment preimage: `keccak(init_code || user_salt || init_data)`.
    pub fn commitment_hash(init_code: &Bytes, user_salt: &Bytes, init_data: &Bytes) -> H256 {
        let mut preimage =
            Vec::with_capacity(init_code.len() + user_salt.len() + init_data.len());
        preimage.extend_from_slice(init_code);
        preimage.extend_from_slice(user_salt);
        preimage.extend_from_slice(init_data);
        keccak(preimage)
    }

    /// Predicts where a reveal with this user salt will deploy. Pure in
    /// (deployer identity, user salt); notably independent of init code
    /// and of the current operator.
    pub fn predict(&self, user_salt: &Bytes) -> Address {
        addresses::deployer_relative_address(self.address, keccak(user_salt))
    }

    fn require_operator(&self, caller: Address) -> Result<(), DeployerError> {
        // The owner is deliberately excluded: governance never executes
        // routine deployments.
        match self.operator {
            None => Err(DeployerError::OperatorUnset),
            Some(operator) if operator == caller => Ok(()),
            Some(_) => Err(DeployerError::Unauthorized {
                caller,
                role: "operator",
            }),
        }
    }

    /// Phase one: publish the hash, hiding the payload.
    pub fn commit(
        &mut self,
        caller: Address,
        hash: H256,
        user_salt: &Bytes,
    ) -> Result<(), DeployerError> {
        self.require_operator(caller)?;
        if self.commitments.contains_key(&hash) {
            return Err(DeployerError::AlreadyCommitted(hash));
        }
        self.commitments.insert(hash, caller);
        debug!(hash = %format!("{hash:#x}"), committer = %format!("{caller:#x}"), "committed");
        self.events.push(DeployerEvent::Committed {
            hash,
            user_salt: user_salt.clone(),
            committer: caller,
        });
        Ok(())
    }

    /// Phase two: disclose the payload and perform the create, plus the
    /// init call in the same unit of work when `init_data` is non-empty.
    ///
    /// Check, delete, act — in that order. Any failure restores both the
    /// commitment and the chain, so a transient failure can be retried
    /// and a permanent one leaves no partial deployment behind.
    pub fn reveal(
        &mut self,
        caller: Address,
        chain: &mut ChainState,
        init_code: &Bytes,
        user_salt: &Bytes,
        init_data: &Bytes,
        value: U256,
    ) -> Result<Address, DeployerError> {
        self.require_operator(caller)?;
        let hash = Self::commitment_hash(init_code, user_salt, init_data);
        match self.commitments.get(&hash) {
            Some(committer) if *committer == caller => {}
            _ => return Err(DeployerError::NoCommitmentOrWrongSender(hash)),
        }

        let target = self.predict(user_salt);
        let snapshot = chain.clone();
        self.commitments.remove(&hash);

        let outcome = chain
            .deploy(target, init_code, value)
            .map_err(DeployerError::from)
            .and_then(|()| {
                if init_data.is_empty() {
                    Ok(())
                } else {
                    chain.call(target, init_data).map_err(DeployerError::from)
                }
            });

        if let Err(err) = outcome {
            *chain = snapshot;
            self.commitments.insert(hash, caller);
            return Err(err);
        }

        info!(
            address = %format!("{target:#x}"),
            deployer = %format!("{caller:#x}"),
            "contract deployed via reveal"
        );
        self.events.push(DeployerEvent::Deployed {
            address: target,
            user_salt: user_salt.clone(),
            deployer: caller,
        });
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    const OWNER: u64 = 0x0123;
    const OPERATOR: u64 = 0x0456;

    fn deployer_with_operator() -> CanonicalDeployer {
        let mut deployer = CanonicalDeployer::new(addr(0xdee0), addr(OWNER));
        deployer
            .set_operator(addr(OWNER), addr(OPERATOR))
            .expect("owner delegates");
        deployer
    }

    fn commit_and_reveal(
        deployer: &mut CanonicalDeployer,
        chain: &mut ChainState,
        user_salt: &Bytes,
    ) -> Address {
        let init_code = Bytes::from_static(b"runtime-code");
        let init_data = Bytes::from_static(b"init-data");
        let hash = CanonicalDeployer::commitment_hash(&init_code, user_salt, &init_data);
        deployer
            .commit(addr(OPERATOR), hash, user_salt)
            .expect("commit succeeds");
        deployer
            .reveal(
                addr(OPERATOR),
                chain,
                &init_code,
                user_salt,
                &init_data,
                U256::zero(),
            )
            .expect("reveal succeeds")
    }

    #[test]
    fn owner_cannot_commit_or_reveal() {
        let mut deployer = deployer_with_operator();
        let mut chain = ChainState::new();
        let salt = Bytes::from_static(b"token");
        let hash = CanonicalDeployer::commitment_hash(&Bytes::new(), &salt, &Bytes::new());
        assert!(matches!(
            deployer.commit(addr(OWNER), hash, &salt),
            Err(DeployerError::Unauthorized { .. })
        ));
        assert!(matches!(
            deployer.reveal(
                addr(OWNER),
                &mut chain,
                &Bytes::new(),
                &salt,
                &Bytes::new(),
                U256::zero()
            ),
            Err(DeployerError::Unauthorized { .. })
        ));
    }

    #[test]
    fn commit_requires_delegated_operator() {
        let mut deployer = CanonicalDeployer::new(addr(0xdee0), addr(OWNER));
        let salt = Bytes::from_static(b"token");
        let hash = CanonicalDeployer::commitment_hash(&Bytes::new(), &salt, &Bytes::new());
        assert!(matches!(
            deployer.commit(addr(OPERATOR), hash, &salt),
            Err(DeployerError::OperatorUnset)
        ));
    }

    #[test]
    fn double_commit_rejected() {
        let mut deployer = deployer_with_operator();
        let salt = Bytes::from_static(b"token");
        let hash = CanonicalDeployer::commitment_hash(&Bytes::new(), &salt, &Bytes::new());
        deployer.commit(addr(OPERATOR), hash, &salt).expect("first");
        assert!(matches!(
            deployer.commit(addr(OPERATOR), hash, &salt),
            Err(DeployerError::AlreadyCommitted(_))
        ));
    }

    #[test]
    fn reveal_consumes_commitment_exactly_once() {
        let mut deployer = deployer_with_operator();
        let mut chain = ChainState::new();
        let salt = Bytes::from_static(b"token");
        let deployed = commit_and_reveal(&mut deployer, &mut chain, &salt);
        assert!(chain.has_code(deployed));

        // Second reveal with identical arguments: the commitment is gone.
        let init_code = Bytes::from_static(b"runtime-code");
        let init_data = Bytes::from_static(b"init-data");
        assert!(matches!(
            deployer.reveal(
                addr(OPERATOR),
                &mut chain,
                &init_code,
                &salt,
                &init_data,
                U256::zero()
            ),
            Err(DeployerError::NoCommitmentOrWrongSender(_))
        ));
    }

    #[test]
    fn reveal_by_wrong_sender_rejected_even_with_correct_payload() {
        let mut deployer = deployer_with_operator();
        let mut chain = ChainState::new();
        let init_code = Bytes::from_static(b"runtime-code");
        let salt = Bytes::from_static(b"token");
        let init_data = Bytes::from_static(b"init-data");
        let hash = CanonicalDeployer::commitment_hash(&init_code, &salt, &init_data);
        deployer.commit(addr(OPERATOR), hash, &salt).expect("commit");

        // Rotate the operator: the new operator knows the payload but did
        // not commit, so the reveal must still fail.
        let hijacker = addr(0x0789);
        deployer.set_operator(addr(OWNER), hijacker).expect("rotate");
        assert!(matches!(
            deployer.reveal(hijacker, &mut chain, &init_code, &salt, &init_data, U256::zero()),
            Err(DeployerError::NoCommitmentOrWrongSender(_))
        ));
    }

    #[test]
    fn operator_rotation_does_not_move_predicted_addresses() {
        let mut deployer = deployer_with_operator();
        let salt = Bytes::from_static(b"Harbor-v1/contracts.token");
        let before = deployer.predict(&salt);
        deployer
            .set_operator(addr(OWNER), addr(0x0999))
            .expect("rotate");
        assert_eq!(before, deployer.predict(&salt));
    }

    #[test]
    fn predicted_address_matches_revealed_address() {
        let mut deployer = deployer_with_operator();
        let mut chain = ChainState::new();
        let salt = Bytes::from_static(b"token");
        let predicted = deployer.predict(&salt);
        let actual = commit_and_reveal(&mut deployer, &mut chain, &salt);
        assert_eq!(predicted, actual);
    }

    #[test]
    fn failed_init_call_rolls_back_the_entire_reveal() {
        let mut deployer = deployer_with_operator();
        let mut chain = ChainState::new();
        let init_code = Bytes::from_static(b"runtime-code");
        let salt = Bytes::from_static(b"token");
        let init_data = Bytes::from_static(b"init-data");
        let hash = CanonicalDeployer::commitment_hash(&init_code, &salt, &init_data);
        deployer.commit(addr(OPERATOR), hash, &salt).expect("commit");

        let target = deployer.predict(&salt);
        chain.force_revert_on_call(target);

        assert!(deployer
            .reveal(addr(OPERATOR), &mut chain, &init_code, &salt, &init_data, U256::zero())
            .is_err());
        // No partial deployment and the commitment survives for a retry.
        assert!(!chain.has_code(target));
        let mut retry_chain = ChainState::new();
        let retried = deployer
            .reveal(
                addr(OPERATOR),
                &mut retry_chain,
                &init_code,
                &salt,
                &init_data,
                U256::zero(),
            )
            .expect("retry succeeds on a clean chain");
        assert_eq!(retried, target);
    }

    #[test]
    fn adversarial_clone_is_inert_without_the_owner_key() {
        // Same bytecode, same baked-in owner, fresh chain: the attacker
        // cannot delegate themselves and the namespace stays unusable.
        let mut clone = CanonicalDeployer::new(addr(0xdee0), addr(OWNER));
        let attacker = addr(0xbad);
        assert!(matches!(
            clone.set_operator(attacker, attacker),
            Err(DeployerError::Unauthorized { .. })
        ));
        let salt = Bytes::from_static(b"token");
        let hash = CanonicalDeployer::commitment_hash(&Bytes::new(), &salt, &Bytes::new());
        assert!(matches!(
            clone.commit(attacker, hash, &salt),
            Err(DeployerError::OperatorUnset)
        ));
    }
}
