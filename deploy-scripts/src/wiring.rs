//! Post-deploy authorization wiring between deployed contracts

use std::time::Duration;

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{keccak256, Address, Bytes, B256},
    sol_types::SolCall,
};
use tracing::info;

use crate::{
    chain::{with_timeout, ChainClient},
    constants::DEFAULT_ADMIN_ROLE_NAME,
    errors::WiringError,
    ledger::{LedgerEntry, LedgerStore},
    registry::ArtifactRegistry,
    solidity::IAccessControl::{grantRoleCall, revokeRoleCall},
    types::{WiringEdge, WiringMethod},
};

/// The outcome of applying one wiring edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiringResult {
    /// The index of the edge
    pub edge: usize,
    /// The contract that was authorized
    pub source: Address,
    /// The contract that granted the authorization
    pub target: Address,
    /// The role or setter applied
    pub capability: String,
    /// Whether the capability was granted or revoked
    pub enabled: bool,
    /// The hash of the wiring transaction
    pub tx_hash: B256,
}

/// A wiring call, encoded before any is sent
struct WiringCall<'a> {
    /// The edge being applied
    edge: &'a WiringEdge,
    /// The authorized contract
    source: Address,
    /// The contract receiving the call
    target: Address,
    /// The encoded call
    calldata: Bytes,
}

/// The `AccessControl` role ID of a capability
pub fn role_id(capability: &str) -> B256 {
    if capability == DEFAULT_ADMIN_ROLE_NAME {
        B256::ZERO
    } else {
        keccak256(capability.as_bytes())
    }
}

/// Apply every wiring edge against the contracts recorded in `ledger`.
///
/// Both endpoints of every edge must be deployed before any call is sent. Edges are
/// re-issued on every run, granting or revoking a capability twice leaves the same state.
pub async fn apply_wiring<C: ChainClient>(
    edges: &[WiringEdge],
    ledger: &LedgerStore,
    registry: &ArtifactRegistry,
    chain: &C,
    timeout: Duration,
) -> Result<Vec<WiringResult>, WiringError> {
    let mut calls = Vec::with_capacity(edges.len());
    for (index, edge) in edges.iter().enumerate() {
        let source = endpoint(ledger, index, &edge.source)?;
        let target = endpoint(ledger, index, &edge.target)?;
        calls.push(WiringCall {
            edge,
            source: source.proxy_address,
            target: target.proxy_address,
            calldata: encode_wiring_call(edge, source, target, registry)?,
        });
    }

    let mut results = Vec::with_capacity(calls.len());
    for (index, call) in calls.into_iter().enumerate() {
        let tx_hash = with_timeout(timeout, chain.transact(call.target, call.calldata))
            .await
            .map_err(|e| WiringError::from_chain(index, e))?;

        let action = if call.edge.enabled { "granted" } else { "revoked" };
        info!(
            "{action} `{}` on `{}` for `{}` (tx {tx_hash:#x})",
            call.edge.capability, call.edge.target, call.edge.source
        );

        results.push(WiringResult {
            edge: index,
            source: call.source,
            target: call.target,
            capability: call.edge.capability.clone(),
            enabled: call.edge.enabled,
            tx_hash,
        });
    }

    Ok(results)
}

/// The ledger entry of a wiring endpoint
fn endpoint<'a>(
    ledger: &'a LedgerStore,
    edge: usize,
    name: &str,
) -> Result<&'a LedgerEntry, WiringError> {
    ledger.entry(name).ok_or_else(|| WiringError::MissingEndpoint {
        edge,
        name: name.to_string(),
    })
}

/// Encode the call applying `edge` to its target
fn encode_wiring_call(
    edge: &WiringEdge,
    source: &LedgerEntry,
    target: &LedgerEntry,
    registry: &ArtifactRegistry,
) -> Result<Bytes, WiringError> {
    let account = source.proxy_address;
    let calldata: Bytes = match edge.method {
        WiringMethod::Role if edge.enabled => grantRoleCall {
            role: role_id(&edge.capability),
            account,
        }
        .abi_encode()
        .into(),
        WiringMethod::Role => revokeRoleCall {
            role: role_id(&edge.capability),
            account,
        }
        .abi_encode()
        .into(),
        WiringMethod::Setter => {
            let factory = registry.factory(&target.artifact)?;
            factory.attach(target.proxy_address).encode_call(
                &edge.capability,
                &[DynSolValue::Address(account), DynSolValue::Bool(edge.enabled)],
            )?
        }
    };

    Ok(calldata)
}
