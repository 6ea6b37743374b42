//! Definitions of errors that can occur during the execution of the deploy scripts

use std::path::PathBuf;

use alloy::primitives::Address;
use thiserror::Error;

use crate::types::ProxyKind;

/// Errors resolving a network profile from the deployer configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading the configuration file
    #[error("error reading config file {path}: {reason}")]
    Read {
        /// The path of the configuration file
        path: PathBuf,
        /// The underlying IO error
        reason: String,
    },
    /// Error parsing the configuration file
    #[error("error parsing config: {0}")]
    Parse(String),
    /// The requested network profile is not configured
    #[error("unknown network profile `{0}`")]
    UnknownNetwork(String),
    /// A live network has no signer source configured
    #[error("network `{0}` targets a live RPC endpoint but has no signer source configured")]
    MissingSigner(String),
    /// An environment variable named by the profile is unset
    #[error("environment variable `{var}` required by network `{network}` is not set")]
    MissingEnv {
        /// The network profile
        network: String,
        /// The missing variable
        var: String,
    },
    /// The signer material could not be turned into a signer
    #[error("invalid signer for network `{network}`: {reason}")]
    InvalidSigner {
        /// The network profile
        network: String,
        /// Why the signer could not be constructed
        reason: String,
    },
    /// The RPC URL could not be parsed
    #[error("invalid RPC URL for network `{network}`: {reason}")]
    InvalidRpcUrl {
        /// The network profile
        network: String,
        /// The parse failure
        reason: String,
    },
}

/// Errors loading build artifacts or encoding calls against their ABI
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No artifact file exists for the contract
    #[error("no artifact found for `{0}`")]
    NotFound(String),
    /// The artifact file could not be read
    #[error("error reading artifact `{name}`: {reason}")]
    Read {
        /// The artifact name
        name: String,
        /// The underlying IO error
        reason: String,
    },
    /// The artifact file is not a valid artifact
    #[error("error parsing artifact `{name}`: {reason}")]
    Parse {
        /// The artifact name
        name: String,
        /// The parse failure
        reason: String,
    },
    /// The contract has no function of the given name and arity
    #[error("`{name}` has no function `{function}` taking {arity} argument(s)")]
    UnknownFunction {
        /// The artifact name
        name: String,
        /// The function name
        function: String,
        /// The number of arguments supplied
        arity: usize,
    },
    /// The number of arguments doesn't match the ABI
    #[error("`{name}` expects {expected} argument(s), got {got}")]
    ArgumentCount {
        /// The artifact name
        name: String,
        /// The number of ABI parameters
        expected: usize,
        /// The number of supplied arguments
        got: usize,
    },
    /// An argument could not be encoded as its ABI type
    #[error("error encoding arguments for `{name}`: {reason}")]
    Encoding {
        /// The artifact name
        name: String,
        /// The encoding failure
        reason: String,
    },
}

/// Errors constructing a deployment plan. These are raised before any chain interaction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// A step references a contract not defined at an earlier position
    #[error("step {step} (`{name}`) references `{reference}`, which is not deployed by an earlier step")]
    ForwardReference {
        /// The index of the offending step
        step: usize,
        /// The name of the offending contract
        name: String,
        /// The referenced name
        reference: String,
    },
    /// Two steps share a logical name
    #[error("step {step} redefines `{name}`")]
    DuplicateName {
        /// The index of the second definition
        step: usize,
        /// The duplicated name
        name: String,
    },
    /// The proxy kind is not one of the supported kinds
    #[error("step {step} (`{name}`) uses unsupported proxy kind `{kind}`")]
    UnsupportedProxyKind {
        /// The index of the offending step
        step: usize,
        /// The name of the offending contract
        name: String,
        /// The unrecognized kind
        kind: String,
    },
    /// A wiring edge names a contract that isn't part of the plan
    #[error("wiring edge {edge} names `{name}`, which is not part of the plan")]
    UnknownWiringEndpoint {
        /// The index of the offending edge
        edge: usize,
        /// The unknown name
        name: String,
    },
    /// The deployment manifest could not be read or parsed
    #[error("error loading deployment manifest: {0}")]
    Manifest(String),
}

/// Errors reading, writing, or locking the deployments ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Error reading the ledger file
    #[error("error reading ledger: {0}")]
    Read(String),
    /// Error writing the ledger file
    #[error("error writing ledger: {0}")]
    Write(String),
    /// Error de/serializing the ledger
    #[error("error parsing ledger: {0}")]
    Parse(String),
    /// Another run holds the ledger lock
    #[error("ledger is locked by another run ({0} exists)")]
    Locked(PathBuf),
    /// The ledger records a different chain for this network
    #[error("ledger records chain {recorded} for network `{network}`, but the network reports chain {actual}")]
    ChainIdMismatch {
        /// The network profile
        network: String,
        /// The chain ID stored in the ledger
        recorded: u64,
        /// The chain ID of the profile
        actual: u64,
    },
}

/// Errors surfaced by a chain client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// The transaction was rejected or reverted
    #[error("transaction reverted: {0}")]
    Reverted(String),
    /// The transaction was not confirmed in time
    #[error("timed out waiting for confirmation")]
    Timeout,
    /// The deployment receipt carries no contract address
    #[error("receipt has no contract address")]
    MissingContractAddress,
    /// The RPC transport failed
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors executing a single deployment step
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The ledger entry was deployed with different initializer arguments
    #[error("argument drift: ledger records {recorded:?}, plan resolves to {resolved:?}")]
    ArgumentDrift {
        /// The arguments in the ledger
        recorded: Vec<String>,
        /// The arguments the plan resolves to
        resolved: Vec<String>,
    },
    /// The ledger entry was deployed behind a different proxy kind
    #[error("proxy kind drift: ledger records `{recorded}`, plan uses `{planned}`")]
    ProxyKindDrift {
        /// The kind in the ledger
        recorded: ProxyKind,
        /// The kind in the plan
        planned: ProxyKind,
    },
    /// A reference points at a contract with no ledger entry
    #[error("unresolved reference to `{0}`")]
    UnresolvedReference(String),
    /// A deployment transaction failed on chain
    #[error("deployment reverted: {reason}")]
    DeploymentReverted {
        /// The revert reason reported by the chain
        reason: String,
    },
    /// A deployment transaction was not confirmed in time
    #[error("timed out waiting for deployment confirmation")]
    ConfirmationTimeout,
    /// A deployment sent by an earlier run is still waiting to be mined
    #[error("deployment with nonce {nonce} (expected at {address}) is still pending, retry once it is mined or replaced")]
    UnresolvedTransaction {
        /// The nonce of the pending transaction
        nonce: u64,
        /// The address the transaction deploys to
        address: Address,
    },
    /// The ledger records a contract at an address with no code
    #[error("ledger records a contract at {0}, but the address has no code")]
    MissingCode(Address),
    /// Error preparing creation code or calldata
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Error persisting progress
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Error talking to the chain
    #[error("chain error: {0}")]
    Chain(String),
}

impl From<ChainError> for ExecutorError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Reverted(reason) => ExecutorError::DeploymentReverted { reason },
            ChainError::MissingContractAddress => ExecutorError::DeploymentReverted {
                reason: err.to_string(),
            },
            ChainError::Timeout => ExecutorError::ConfirmationTimeout,
            ChainError::Transport(e) => ExecutorError::Chain(e),
        }
    }
}

/// A failed deployment step, naming where in the plan the run halted
#[derive(Debug, Error)]
#[error("step {step} (`{name}`) failed: {kind}")]
pub struct StepError {
    /// The index of the failed step
    pub step: usize,
    /// The logical name of the failed step
    pub name: String,
    /// What went wrong
    #[source]
    pub kind: ExecutorError,
}

/// Errors applying wiring edges
#[derive(Debug, Error)]
pub enum WiringError {
    /// An edge endpoint has no ledger entry
    #[error("wiring edge {edge} names `{name}`, which has not been deployed")]
    MissingEndpoint {
        /// The index of the offending edge
        edge: usize,
        /// The undeployed endpoint
        name: String,
    },
    /// A wiring call failed on chain
    #[error("wiring edge {edge} reverted: {reason}")]
    CallReverted {
        /// The index of the offending edge
        edge: usize,
        /// The revert reason reported by the chain
        reason: String,
    },
    /// A wiring call was not confirmed in time
    #[error("timed out waiting for wiring edge {edge}")]
    ConfirmationTimeout {
        /// The index of the offending edge
        edge: usize,
    },
    /// Error encoding the wiring call
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Error talking to the chain
    #[error("chain error: {0}")]
    Chain(String),
}

impl WiringError {
    /// Attribute a chain failure to the given edge
    pub(crate) fn from_chain(edge: usize, err: ChainError) -> Self {
        match err {
            ChainError::Reverted(reason) => WiringError::CallReverted { edge, reason },
            ChainError::Timeout => WiringError::ConfirmationTimeout { edge },
            e => WiringError::Chain(e.to_string()),
        }
    }
}

/// Errors upgrading a deployed contract
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// The contract has no ledger entry on this network
    #[error("`{name}` is not deployed on network `{network}`")]
    NotDeployed {
        /// The logical name
        name: String,
        /// The network profile
        network: String,
    },
    /// The contract was deployed without a proxy
    #[error("`{0}` was deployed without a proxy and cannot be upgraded")]
    NotUpgradeable(String),
    /// The operator-supplied address differs from the ledger
    #[error("`{name}` is recorded at {recorded}, not {provided}")]
    AddressMismatch {
        /// The logical name
        name: String,
        /// The proxy address in the ledger
        recorded: Address,
        /// The address supplied by the operator
        provided: Address,
    },
    /// The supplied implementation address holds no code
    #[error("no contract code at implementation address {0}")]
    MissingImplementation(Address),
    /// The proxy does not point at the new implementation after the upgrade call
    #[error("proxy {proxy} points at {actual} after upgrading to {expected}")]
    ImplementationNotSet {
        /// The proxy address
        proxy: Address,
        /// The implementation the upgrade should have installed
        expected: Address,
        /// The implementation read back from the proxy
        actual: Address,
    },
    /// The upgrade transaction failed on chain
    #[error("upgrade reverted: {0}")]
    Reverted(String),
    /// The upgrade transaction was not confirmed in time
    #[error("timed out waiting for upgrade confirmation")]
    ConfirmationTimeout,
    /// Error preparing the new implementation
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Error persisting the upgrade
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Error talking to the chain
    #[error("chain error: {0}")]
    Chain(String),
}

impl From<ChainError> for UpgradeError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Reverted(reason) => UpgradeError::Reverted(reason),
            ChainError::Timeout => UpgradeError::ConfirmationTimeout,
            e => UpgradeError::Chain(e.to_string()),
        }
    }
}

/// Errors that can occur during the execution of the deploy scripts
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Error resolving configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Error loading an artifact
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Error building the plan
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// Error accessing the ledger
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// A deployment step failed
    #[error(transparent)]
    Step(#[from] StepError),
    /// Wiring failed
    #[error(transparent)]
    Wiring(#[from] WiringError),
    /// An upgrade failed
    #[error(transparent)]
    Upgrade(#[from] UpgradeError),
    /// Error initializing the RPC client
    #[error("error initializing client: {0}")]
    ClientInitialization(String),
    /// Error parsing a command-line argument
    #[error("error constructing calldata: {0}")]
    CalldataConstruction(String),
}

