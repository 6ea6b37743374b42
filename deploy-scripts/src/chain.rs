//! The chain client through which every on-chain read and write flows

use std::{future::Future, time::Duration};

use alloy::{
    network::TransactionBuilder,
    primitives::{keccak256, Address, Bytes, B256, U256},
    providers::{DynProvider, Provider},
    rpc::types::{TransactionReceipt, TransactionRequest},
    transports::{RpcError, TransportErrorKind},
};
use tracing::debug;

use crate::errors::ChainError;

/// The operations the executors need from a chain
#[allow(async_fn_in_trait)]
pub trait ChainClient {
    /// The address deploying contracts and sending transactions
    fn deployer(&self) -> Address;

    /// The chain ID of the connected network
    fn chain_id(&self) -> u64;

    /// The deployer's next nonce, counting transactions still in the mempool
    async fn pending_nonce(&self) -> Result<u64, ChainError>;

    /// The deployer's nonce counting only mined transactions
    async fn mined_nonce(&self) -> Result<u64, ChainError>;

    /// Send a contract creation transaction and wait for the deployed address
    async fn deploy(&self, code: Bytes) -> Result<Address, ChainError>;

    /// Send a call and wait for it to succeed, returning the transaction hash
    async fn transact(&self, to: Address, calldata: Bytes) -> Result<B256, ChainError>;

    /// The keccak256 hash of the runtime code at `address`, `None` if there is no code
    async fn code_hash(&self, address: Address) -> Result<Option<B256>, ChainError>;

    /// The raw value of a storage slot
    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError>;
}

/// Await a chain operation for at most `timeout`
pub async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, ChainError>>,
) -> Result<T, ChainError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ChainError::Timeout)?
}

/// A chain client backed by a JSON-RPC provider
#[derive(Clone)]
pub struct RpcChain {
    /// The provider, signing with the deployer's key or relying on the node's accounts
    provider: DynProvider,
    /// The deployer's address
    deployer: Address,
    /// The chain ID the provider reported at setup
    chain_id: u64,
}

impl RpcChain {
    /// Wrap a provider whose transactions are sent from `deployer`
    pub fn new(provider: DynProvider, deployer: Address, chain_id: u64) -> Self {
        Self {
            provider,
            deployer,
            chain_id,
        }
    }

    /// Send a transaction and wait for a successful receipt
    async fn send(&self, tx: TransactionRequest) -> Result<TransactionReceipt, ChainError> {
        let pending = self
            .provider
            .send_transaction(tx.with_from(self.deployer))
            .await
            .map_err(rpc_error)?;
        debug!("sent transaction {:#x}", pending.tx_hash());

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        if !receipt.status() {
            return Err(ChainError::Reverted(format!(
                "transaction {:#x} reverted",
                receipt.transaction_hash
            )));
        }

        Ok(receipt)
    }
}

impl ChainClient for RpcChain {
    fn deployer(&self) -> Address {
        self.deployer
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(self.deployer)
            .pending()
            .await
            .map_err(rpc_error)
    }

    async fn mined_nonce(&self) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(self.deployer)
            .latest()
            .await
            .map_err(rpc_error)
    }

    async fn deploy(&self, code: Bytes) -> Result<Address, ChainError> {
        let tx = TransactionRequest::default().with_deploy_code(code);
        let receipt = self.send(tx).await?;
        receipt.contract_address.ok_or(ChainError::MissingContractAddress)
    }

    async fn transact(&self, to: Address, calldata: Bytes) -> Result<B256, ChainError> {
        let tx = TransactionRequest::default().with_to(to).with_input(calldata);
        let receipt = self.send(tx).await?;
        Ok(receipt.transaction_hash)
    }

    async fn code_hash(&self, address: Address) -> Result<Option<B256>, ChainError> {
        let code = self.provider.get_code_at(address).await.map_err(rpc_error)?;
        Ok((!code.is_empty()).then(|| keccak256(&code)))
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError> {
        let value = self
            .provider
            .get_storage_at(address, U256::from_be_bytes(slot.0))
            .await
            .map_err(rpc_error)?;
        Ok(B256::from(value))
    }
}

/// Map an RPC failure, treating error responses from the node as reverts
fn rpc_error(err: RpcError<TransportErrorKind>) -> ChainError {
    match err {
        RpcError::ErrorResp(payload) => ChainError::Reverted(payload.message.to_string()),
        e => ChainError::Transport(e.to_string()),
    }
}
