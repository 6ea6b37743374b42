//! An in-memory chain implementing the deploy scripts' chain client.
//!
//! Contracts are deployed at their CREATE addresses, the OpenZeppelin proxies are
//! recognized by their creation code and maintain their EIP-1967 slots, and
//! `AccessControl` role grants are tracked per contract.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use alloy::{
    primitives::{keccak256, Address, Bytes, B256},
    sol,
    sol_types::{SolCall, SolValue},
};
use deploy_scripts::{
    chain::ChainClient,
    constants::{IMPLEMENTATION_STORAGE_SLOT, PROXY_ADMIN_STORAGE_SLOT},
    errors::ChainError,
};

use crate::utils::{ERC1967_PROXY_BYTECODE, TRANSPARENT_PROXY_BYTECODE};

sol! {
    function upgradeAndCall(address proxy, address implementation, bytes data);
    function upgradeToAndCall(address newImplementation, bytes data);
    function grantRole(bytes32 role, address account);
    function revokeRole(bytes32 role, address account);
}

/// The kind of proxy found at an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockProxy {
    /// A transparent proxy, upgraded through its admin
    Transparent,
    /// An ERC1967 proxy, upgraded through the implementation
    Uups,
}

/// What a deployment should do instead of succeeding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeployFault {
    /// Never reach the node
    Hang,
    /// Reach the mempool, taking a nonce, but stay unmined until released
    Stall,
    /// Land the contract, then lose the receipt
    DropReceipt,
}

/// The mutable state of the mock chain
#[derive(Default)]
struct MockState {
    /// The deployer's next nonce
    nonce: u64,
    /// Code by address
    code: HashMap<Address, Bytes>,
    /// Storage slots by address
    storage: HashMap<(Address, B256), B256>,
    /// Proxies by address
    proxies: HashMap<Address, MockProxy>,
    /// Proxy admins and the proxy each administers
    admins: HashMap<Address, Address>,
    /// Initializer calldata each proxy was constructed with
    initializers: HashMap<Address, Bytes>,
    /// Granted roles as (contract, role, account)
    roles: HashSet<(Address, B256, Address)>,
    /// Every creation code deployed, in order
    deployments: Vec<Bytes>,
    /// Every call sent, in order
    calls: Vec<(Address, Bytes)>,
    /// Creation code prefixes whose deployment reverts
    reverting_code: Vec<Bytes>,
    /// One-shot faults, each triggered by the next deployment of matching creation code
    deploy_faults: Vec<(Bytes, DeployFault)>,
    /// Deployments sitting in the mempool, with their nonces
    stalled: Vec<(u64, Bytes)>,
}

/// An in-memory chain
pub struct MockChain {
    /// The deploying account
    deployer: Address,
    /// The chain ID reported to the scripts
    chain_id: u64,
    /// The chain state
    state: Mutex<MockState>,
}

impl MockChain {
    /// A fresh chain with no contracts
    pub fn new(deployer: Address, chain_id: u64) -> Self {
        Self {
            deployer,
            chain_id,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Lock the chain state
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    // -------------------
    // | FAULT INJECTION |
    // -------------------

    /// Make every deployment of creation code starting with `prefix` revert
    pub fn revert_deploys_of(&self, prefix: &[u8]) {
        self.state().reverting_code.push(Bytes::copy_from_slice(prefix));
    }

    /// Stop reverting deployments
    pub fn clear_reverts(&self) {
        self.state().reverting_code.clear();
    }

    /// Make the next deployment of creation code starting with `prefix` never confirm
    pub fn hang_next_deploy_of(&self, prefix: &[u8]) {
        let fault = (Bytes::copy_from_slice(prefix), DeployFault::Hang);
        self.state().deploy_faults.push(fault);
    }

    /// Accept the next deployment of creation code starting with `prefix` without mining it
    pub fn stall_next_deploy_of(&self, prefix: &[u8]) {
        let fault = (Bytes::copy_from_slice(prefix), DeployFault::Stall);
        self.state().deploy_faults.push(fault);
    }

    /// Mine every stalled deployment at the address its nonce determines
    pub fn mine_stalled(&self) {
        let mut state = self.state();
        for (nonce, code) in std::mem::take(&mut state.stalled) {
            let address = self.deployer.create(nonce);
            if Self::create(&mut state, address, code.clone()).is_ok() {
                state.deployments.push(code);
            }
        }
    }

    /// Evict every stalled deployment from the mempool, freeing their nonces
    pub fn evict_stalled(&self) {
        let mut state = self.state();
        let evicted = std::mem::take(&mut state.stalled);
        state.nonce -= evicted.len() as u64;
    }

    /// Land the next deployment of creation code starting with `prefix`, but report a
    /// transport failure as if the connection dropped before the receipt arrived
    pub fn drop_next_receipt_of(&self, prefix: &[u8]) {
        let fault = (Bytes::copy_from_slice(prefix), DeployFault::DropReceipt);
        self.state().deploy_faults.push(fault);
    }

    /// Take the fault injected for a deployment of `code`, if any
    fn take_fault(&self, code: &Bytes) -> Option<DeployFault> {
        let mut state = self.state();
        let index = state
            .deploy_faults
            .iter()
            .position(|(prefix, _)| code.starts_with(prefix))?;
        Some(state.deploy_faults.remove(index).1)
    }

    // --------------
    // | INSPECTION |
    // --------------

    /// The number of contracts deployed by the scripts
    pub fn deploy_count(&self) -> usize {
        self.state().deployments.len()
    }

    /// The number of deployments of creation code starting with `prefix`
    pub fn deploys_of(&self, prefix: &[u8]) -> usize {
        self.state()
            .deployments
            .iter()
            .filter(|code| code.starts_with(prefix))
            .count()
    }

    /// The calls sent to `to`
    pub fn calls_to(&self, to: Address) -> Vec<Bytes> {
        self.state()
            .calls
            .iter()
            .filter(|(target, _)| *target == to)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// The total number of calls sent
    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Whether `account` holds `role` on `contract`
    pub fn has_role(&self, contract: Address, role: B256, account: Address) -> bool {
        self.state().roles.contains(&(contract, role, account))
    }

    /// The number of role grants across all contracts
    pub fn role_count(&self) -> usize {
        self.state().roles.len()
    }

    /// The implementation a proxy points at
    pub fn implementation_of(&self, proxy: Address) -> Address {
        self.read_address(proxy, IMPLEMENTATION_STORAGE_SLOT)
    }

    /// The admin of a transparent proxy
    pub fn admin_of(&self, proxy: Address) -> Address {
        self.read_address(proxy, PROXY_ADMIN_STORAGE_SLOT)
    }

    /// The initializer calldata a proxy was constructed with
    pub fn initializer_of(&self, proxy: Address) -> Option<Bytes> {
        self.state().initializers.get(&proxy).cloned()
    }

    /// Deploy code directly, outside the scripts
    pub fn deploy_external(&self, code: Bytes) -> Address {
        let mut state = self.state();
        let address = self.deployer.create(state.nonce);
        state.nonce += 1;
        state.code.insert(address, code);
        address
    }

    /// Read an address from the low-order bytes of a slot
    fn read_address(&self, contract: Address, slot: B256) -> Address {
        let word = self
            .state()
            .storage
            .get(&(contract, slot))
            .copied()
            .unwrap_or_default();
        Address::from_word(word)
    }

    // -------------
    // | EXECUTION |
    // -------------

    /// Create a contract, running the proxy constructors
    fn create(state: &mut MockState, address: Address, code: Bytes) -> Result<(), ChainError> {
        if let Some(args) = code.strip_prefix(TRANSPARENT_PROXY_BYTECODE) {
            let (logic, owner, data) =
                <(Address, Address, Bytes)>::abi_decode_params(args, false)
                    .map_err(|e| ChainError::Reverted(e.to_string()))?;
            Self::init_proxy(state, address, logic, data)?;

            // The proxy deploys its own admin, owned by `owner`
            let admin = address.create(1);
            state.code.insert(admin, Bytes::from(owner.to_vec()));
            state.admins.insert(admin, address);
            state.storage.insert((address, PROXY_ADMIN_STORAGE_SLOT), admin.into_word());
            state.proxies.insert(address, MockProxy::Transparent);
        } else if let Some(args) = code.strip_prefix(ERC1967_PROXY_BYTECODE) {
            let (logic, data) = <(Address, Bytes)>::abi_decode_params(args, false)
                .map_err(|e| ChainError::Reverted(e.to_string()))?;
            Self::init_proxy(state, address, logic, data)?;
            state.proxies.insert(address, MockProxy::Uups);
        }

        state.code.insert(address, code);
        Ok(())
    }

    /// Point a new proxy at its implementation and record its initializer call
    fn init_proxy(
        state: &mut MockState,
        proxy: Address,
        logic: Address,
        data: Bytes,
    ) -> Result<(), ChainError> {
        if !state.code.contains_key(&logic) {
            return Err(ChainError::Reverted("ERC1967InvalidImplementation".to_string()));
        }

        state.storage.insert((proxy, IMPLEMENTATION_STORAGE_SLOT), logic.into_word());
        state.initializers.insert(proxy, data);
        Ok(())
    }

    /// Apply a call to the chain state
    fn execute(&self, state: &mut MockState, to: Address, data: &Bytes) -> Result<(), ChainError> {
        if !state.code.contains_key(&to) {
            return Err(ChainError::Reverted(format!("no code at {to:#x}")));
        }

        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| ChainError::Reverted("missing selector".to_string()))?;

        let revert = |e: alloy::sol_types::Error| ChainError::Reverted(e.to_string());
        if selector == upgradeAndCallCall::SELECTOR {
            let call = upgradeAndCallCall::abi_decode(data, false).map_err(revert)?;
            if state.admins.get(&to) != Some(&call.proxy) {
                return Err(ChainError::Reverted("not the proxy's admin".to_string()));
            }
            self.upgrade_proxy(state, call.proxy, call.implementation)
        } else if selector == upgradeToAndCallCall::SELECTOR {
            if state.proxies.get(&to) != Some(&MockProxy::Uups) {
                return Err(ChainError::Reverted("not a UUPS proxy".to_string()));
            }
            let call = upgradeToAndCallCall::abi_decode(data, false).map_err(revert)?;
            self.upgrade_proxy(state, to, call.newImplementation)
        } else if selector == grantRoleCall::SELECTOR {
            let call = grantRoleCall::abi_decode(data, false).map_err(revert)?;
            state.roles.insert((to, call.role, call.account));
            Ok(())
        } else if selector == revokeRoleCall::SELECTOR {
            let call = revokeRoleCall::abi_decode(data, false).map_err(revert)?;
            state.roles.remove(&(to, call.role, call.account));
            Ok(())
        } else {
            // Any other call is accepted and only logged
            Ok(())
        }
    }

    /// Point a proxy at a new implementation
    fn upgrade_proxy(
        &self,
        state: &mut MockState,
        proxy: Address,
        implementation: Address,
    ) -> Result<(), ChainError> {
        if !state.code.contains_key(&implementation) {
            return Err(ChainError::Reverted("ERC1967InvalidImplementation".to_string()));
        }

        state
            .storage
            .insert((proxy, IMPLEMENTATION_STORAGE_SLOT), implementation.into_word());
        Ok(())
    }
}

impl ChainClient for MockChain {
    fn deployer(&self) -> Address {
        self.deployer
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        Ok(self.state().nonce)
    }

    async fn mined_nonce(&self) -> Result<u64, ChainError> {
        let state = self.state();
        Ok(state.stalled.iter().map(|(nonce, _)| *nonce).min().unwrap_or(state.nonce))
    }

    async fn deploy(&self, code: Bytes) -> Result<Address, ChainError> {
        let fault = self.take_fault(&code);
        match fault {
            Some(DeployFault::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Some(DeployFault::Stall) => {
                {
                    let mut state = self.state();
                    let nonce = state.nonce;
                    state.nonce += 1;
                    state.stalled.push((nonce, code));
                }
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Err(ChainError::Timeout);
            }
            _ => {}
        }

        let mut state = self.state();
        let address = self.deployer.create(state.nonce);
        state.nonce += 1;

        if state.reverting_code.iter().any(|prefix| code.starts_with(prefix)) {
            return Err(ChainError::Reverted("execution reverted".to_string()));
        }

        Self::create(&mut state, address, code.clone())?;
        state.deployments.push(code);

        match fault {
            Some(DeployFault::DropReceipt) => {
                Err(ChainError::Transport("connection reset by peer".to_string()))
            }
            _ => Ok(address),
        }
    }

    async fn transact(&self, to: Address, calldata: Bytes) -> Result<B256, ChainError> {
        let mut state = self.state();
        let tx_hash = keccak256((state.nonce, to, calldata.clone()).abi_encode());
        state.nonce += 1;

        self.execute(&mut state, to, &calldata)?;
        state.calls.push((to, calldata));
        Ok(tx_hash)
    }

    async fn code_hash(&self, address: Address) -> Result<Option<B256>, ChainError> {
        Ok(self.state().code.get(&address).map(keccak256))
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError> {
        Ok(self
            .state()
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }
}
