//! Utilities for the deploy scripts.

use std::str::FromStr;

use alloy::{
    network::EthereumWallet,
    primitives::{utils::format_ether, Address, Bytes},
    providers::{DynProvider, Provider, ProviderBuilder},
};
use tracing::info;

use crate::{
    chain::RpcChain,
    errors::ScriptError,
    network::{NetworkProfile, ResolvedSigner},
};

/// Sets up the chain client for a resolved network profile, checking that the
/// endpoint serves the chain the profile expects
pub async fn setup_client(profile: &NetworkProfile) -> Result<RpcChain, ScriptError> {
    let url = profile.rpc_url.clone();
    let (provider, deployer) = match &profile.signer {
        ResolvedSigner::Local(signer) => {
            let deployer = signer.address();
            let wallet = EthereumWallet::from(signer.clone());
            let provider = ProviderBuilder::new().wallet(wallet).on_http(url);
            (DynProvider::new(provider), deployer)
        }
        ResolvedSigner::External => {
            let provider = DynProvider::new(ProviderBuilder::new().on_http(url));
            let deployer = provider
                .get_accounts()
                .await
                .map_err(|e| ScriptError::ClientInitialization(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    ScriptError::ClientInitialization("node exposes no accounts".to_string())
                })?;
            (provider, deployer)
        }
    };

    let chain_id = provider
        .get_chain_id()
        .await
        .map_err(|e| ScriptError::ClientInitialization(e.to_string()))?;
    if chain_id != profile.chain_id {
        return Err(ScriptError::ClientInitialization(format!(
            "network `{}` expects chain {}, but {} serves chain {chain_id}",
            profile.name, profile.chain_id, profile.rpc_url
        )));
    }

    info!("deploying to `{}` (chain {chain_id}) as {deployer:#x}", profile.name);
    let balance = provider
        .get_balance(deployer)
        .await
        .map_err(|e| ScriptError::ClientInitialization(e.to_string()))?;
    info!("deployer balance: {} ETH", format_ether(balance));
    Ok(RpcChain::new(provider, deployer, chain_id))
}

/// Parse a hex address supplied on the command line
pub fn parse_address(value: &str) -> Result<Address, ScriptError> {
    Address::from_str(value)
        .map_err(|e| ScriptError::CalldataConstruction(format!("invalid address `{value}`: {e}")))
}

/// Parse hex calldata supplied on the command line
pub fn parse_calldata(value: &str) -> Result<Bytes, ScriptError> {
    Bytes::from_str(value)
        .map_err(|e| ScriptError::CalldataConstruction(format!("invalid calldata: {e}")))
}
