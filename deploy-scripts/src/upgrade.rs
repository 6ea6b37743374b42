//! Upgrades a single deployed contract to a new implementation.
//!
//! Every precondition that can be checked against the ledger is checked before the
//! chain is touched. Only the named contract's entry is modified.

use std::time::Duration;

use alloy::{
    primitives::{Address, Bytes, B256},
    sol_types::SolCall,
};
use tracing::{debug, info, warn};

use crate::{
    chain::{with_timeout, ChainClient},
    constants::{
        IMPLEMENTATION_STORAGE_SLOT, NUM_BYTES_ADDRESS, NUM_BYTES_STORAGE_SLOT,
        PROXY_ADMIN_STORAGE_SLOT,
    },
    errors::UpgradeError,
    ledger::{LedgerEntry, LedgerStore},
    registry::ArtifactRegistry,
    solidity::{IProxyAdmin::upgradeAndCallCall, IUUPSUpgradeable::upgradeToAndCallCall},
    types::ProxyKind,
};

/// Where the new implementation comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewImplementation {
    /// Deploy a fresh implementation from the artifact recorded in the ledger
    Artifact,
    /// Use an implementation already deployed at this address
    Deployed(Address),
}

/// A request to upgrade one logical contract
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// The logical name
    pub name: String,
    /// The proxy address the operator expects the contract to live at
    pub expected_address: Option<Address>,
    /// The new implementation
    pub implementation: NewImplementation,
    /// Calldata forwarded to the new implementation by the upgrade call
    pub calldata: Bytes,
}

/// The outcome of an upgrade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeResult {
    /// The logical name
    pub name: String,
    /// The proxy address, unchanged by the upgrade
    pub proxy_address: Address,
    /// The implementation the proxy now points at
    pub implementation_address: Address,
    /// The code hash of the replaced implementation
    pub previous_implementation_hash: B256,
    /// The code hash of the new implementation
    pub implementation_hash: B256,
    /// The number of upgrades applied since deployment
    pub upgrades: u32,
    /// Whether the upgrade was skipped because the implementation is already current
    pub unchanged: bool,
}

/// Check that `request` can be applied to the contract recorded in `ledger`.
///
/// Performs no chain interaction.
pub fn check_preconditions(
    request: &UpgradeRequest,
    ledger: &LedgerStore,
) -> Result<LedgerEntry, UpgradeError> {
    let entry = ledger
        .entry(&request.name)
        .cloned()
        .ok_or_else(|| UpgradeError::NotDeployed {
            name: request.name.clone(),
            network: ledger.network().to_string(),
        })?;

    if !entry.proxy_kind.is_upgradeable() {
        return Err(UpgradeError::NotUpgradeable(request.name.clone()));
    }

    if let Some(provided) = request.expected_address {
        if provided != entry.proxy_address {
            return Err(UpgradeError::AddressMismatch {
                name: request.name.clone(),
                recorded: entry.proxy_address,
                provided,
            });
        }
    }

    Ok(entry)
}

/// Upgrade the contract named in `request` and record the new implementation.
///
/// With [`NewImplementation::Artifact`] the implementation is deployed before its code hash
/// can be compared with the recorded one. If the two match and there is no calldata, the
/// upgrade is skipped and the freshly deployed implementation is left unused.
pub async fn upgrade<C: ChainClient>(
    request: &UpgradeRequest,
    ledger: &mut LedgerStore,
    registry: &ArtifactRegistry,
    chain: &C,
    timeout: Duration,
) -> Result<UpgradeResult, UpgradeError> {
    let entry = check_preconditions(request, ledger)?;
    let proxy = entry.proxy_address;

    let (implementation, implementation_hash) = match request.implementation {
        NewImplementation::Deployed(address) => {
            let hash = chain
                .code_hash(address)
                .await?
                .ok_or(UpgradeError::MissingImplementation(address))?;
            (address, hash)
        }
        NewImplementation::Artifact => {
            let code = registry.factory(&entry.artifact)?.deploy_code(&[])?;
            let address = with_timeout(timeout, chain.deploy(code)).await?;
            let hash = chain
                .code_hash(address)
                .await?
                .ok_or(UpgradeError::MissingImplementation(address))?;
            info!("deployed new `{}` implementation at {address:#x}", entry.artifact);
            (address, hash)
        }
    };

    if implementation_hash == entry.implementation_hash && request.calldata.is_empty() {
        info!("`{}` already runs this implementation, nothing to upgrade", request.name);
        if implementation != entry.implementation_address {
            warn!("implementation deployed at {implementation:#x} is identical and left unused");
        }
        return Ok(UpgradeResult {
            name: request.name.clone(),
            proxy_address: proxy,
            implementation_address: entry.implementation_address,
            previous_implementation_hash: entry.implementation_hash,
            implementation_hash,
            upgrades: entry.upgrades,
            unchanged: true,
        });
    }

    let data = request.calldata.clone();
    let tx_hash = match entry.proxy_kind {
        ProxyKind::Transparent => {
            let admin = read_address_slot(chain, proxy, PROXY_ADMIN_STORAGE_SLOT).await?;
            debug!("upgrading `{}` through proxy admin {admin:#x}", request.name);
            let calldata = upgradeAndCallCall { proxy, implementation, data }.abi_encode();
            with_timeout(timeout, chain.transact(admin, calldata.into())).await?
        }
        _ => {
            let calldata =
                upgradeToAndCallCall { newImplementation: implementation, data }.abi_encode();
            with_timeout(timeout, chain.transact(proxy, calldata.into())).await?
        }
    };
    debug!("upgrade transaction {tx_hash:#x}");

    let actual = read_address_slot(chain, proxy, IMPLEMENTATION_STORAGE_SLOT).await?;
    if actual != implementation {
        return Err(UpgradeError::ImplementationNotSet {
            proxy,
            expected: implementation,
            actual,
        });
    }

    let updated = ledger.update_implementation(&request.name, implementation, implementation_hash)?;
    info!(
        "upgraded `{}` at {proxy:#x} to implementation {implementation:#x} (upgrade #{})",
        request.name, updated.upgrades
    );

    Ok(UpgradeResult {
        name: request.name.clone(),
        proxy_address: proxy,
        implementation_address: implementation,
        previous_implementation_hash: entry.implementation_hash,
        implementation_hash,
        upgrades: updated.upgrades,
        unchanged: false,
    })
}

/// Read an address stored in the low-order bytes of a storage slot
async fn read_address_slot<C: ChainClient>(
    chain: &C,
    address: Address,
    slot: B256,
) -> Result<Address, UpgradeError> {
    let word = chain.storage_at(address, slot).await?;
    Ok(Address::from_slice(&word[NUM_BYTES_STORAGE_SLOT - NUM_BYTES_ADDRESS..]))
}
