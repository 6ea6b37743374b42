//! Constants used in the deploy scripts

use alloy::primitives::{b256, B256};

/// The storage slot containing the implementation contract address in an upgradeable proxy.
///
/// This is specified in EIP1967: https://eips.ethereum.org/EIPS/eip-1967#logic-contract-address
pub const IMPLEMENTATION_STORAGE_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// The storage slot containing the proxy admin contract address in the upgradeable proxy.
///
/// This is specified in EIP1967: https://eips.ethereum.org/EIPS/eip-1967#admin-address
pub const PROXY_ADMIN_STORAGE_SLOT: B256 =
    b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// The number of bytes stored in a single storage slot
pub const NUM_BYTES_STORAGE_SLOT: usize = 32;

/// The number of bytes in an Ethereum address
pub const NUM_BYTES_ADDRESS: usize = 20;

/// The artifact name of the proxy used for transparent upgradeable deployments.
///
/// Compiled from https://github.com/OpenZeppelin/openzeppelin-contracts/blob/v5.0.0/contracts/proxy/transparent/TransparentUpgradeableProxy.sol
/// The proxy deploys its own `ProxyAdmin`, owned by the deployer.
pub const TRANSPARENT_PROXY_ARTIFACT: &str = "TransparentUpgradeableProxy";

/// The artifact name of the proxy used for UUPS deployments.
///
/// Compiled from https://github.com/OpenZeppelin/openzeppelin-contracts/blob/v5.0.0/contracts/proxy/ERC1967/ERC1967Proxy.sol
pub const UUPS_PROXY_ARTIFACT: &str = "ERC1967Proxy";

/// The name of the initializer method invoked through the proxy on deployment
pub const INITIALIZER_FN_NAME: &str = "initialize";

/// The capability name that maps onto the zero role in OpenZeppelin's `AccessControl`
pub const DEFAULT_ADMIN_ROLE_NAME: &str = "DEFAULT_ADMIN_ROLE";

/// The extension of compiled artifact files
pub const ARTIFACT_EXTENSION: &str = "json";

/// The default path of the deployer configuration file
pub const DEFAULT_CONFIG_PATH: &str = "deployer.toml";

/// The default path of the deployment manifest
pub const DEFAULT_PLAN_PATH: &str = "deployment.toml";

/// The default path of the deployments ledger
pub const DEFAULT_LEDGER_PATH: &str = "deployments.json";

/// The default directory holding compiled contract artifacts
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

/// The extension appended to the ledger path to form its advisory lock file
pub const LOCK_FILE_EXTENSION: &str = "lock";

/// The version of the ledger file format written by these scripts
pub const LEDGER_FORMAT_VERSION: u32 = 1;

/// The default number of seconds to wait for a transaction to be confirmed
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 120;

/// Hosts considered local development nodes, which may use node-managed accounts
/// without an explicitly configured signer
pub const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "0.0.0.0"];

/// The runtime variable resolving to the deployer's address
pub const DEPLOYER_VAR: &str = "deployer";

/// The runtime variable resolving to the target chain ID
pub const CHAIN_ID_VAR: &str = "chain_id";
