//! Resolution of named network profiles into an RPC endpoint, chain ID, and signer

use std::{collections::BTreeMap, env, fs, path::Path, str::FromStr, time::Duration};

use alloy::signers::local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use serde::Deserialize;
use url::Url;

use crate::{
    constants::{
        DEFAULT_ARTIFACTS_DIR, DEFAULT_CONFIRMATION_TIMEOUT_SECS, DEFAULT_LEDGER_PATH,
        DEFAULT_PLAN_PATH, LOCAL_HOSTS,
    },
    errors::ConfigError,
};

/// The deployer configuration, read from `deployer.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct DeployerConfig {
    /// Locations of the artifacts, ledger, and plan
    #[serde(default)]
    pub paths: PathsConfig,
    /// Seconds to wait for each transaction to confirm
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    /// The configured network profiles, keyed by name
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

/// File locations used by a run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// The directory containing compiled contract artifacts
    pub artifacts: String,
    /// The deployments ledger
    pub ledger: String,
    /// The deployment manifest
    pub plan: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            artifacts: DEFAULT_ARTIFACTS_DIR.to_string(),
            ledger: DEFAULT_LEDGER_PATH.to_string(),
            plan: DEFAULT_PLAN_PATH.to_string(),
        }
    }
}

/// A single network profile as written in the configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// The RPC endpoint
    pub rpc_url: Option<String>,
    /// An environment variable which, when set, overrides `rpc_url`
    pub rpc_url_env: Option<String>,
    /// The chain ID the endpoint is expected to report
    pub chain_id: u64,
    /// Overrides the global confirmation timeout for this network
    pub confirmation_timeout_secs: Option<u64>,
    /// Where the deployer's key comes from
    pub signer: Option<SignerSource>,
}

/// The configured origin of the deployer's signing key
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SignerSource {
    /// A raw private key read from an environment variable
    StaticKey {
        /// The variable holding the hex-encoded key
        key_env: String,
    },
    /// A key derived from a BIP-39 mnemonic at `m/44'/60'/0'/0/{index}`
    DerivationSeed {
        /// The variable holding the mnemonic phrase
        mnemonic_env: String,
        /// The account index to derive
        #[serde(default)]
        index: u32,
    },
    /// The node signs with its own managed account
    External,
}

/// The signer a resolved profile deploys with
#[derive(Debug, Clone)]
pub enum ResolvedSigner {
    /// A key held by this process
    Local(PrivateKeySigner),
    /// The node's first managed account
    External,
}

/// A fully resolved network profile
#[derive(Debug, Clone)]
pub struct NetworkProfile {
    /// The profile name, which also keys the network's ledger section
    pub name: String,
    /// The RPC endpoint
    pub rpc_url: Url,
    /// The expected chain ID
    pub chain_id: u64,
    /// The deployer's signer
    pub signer: ResolvedSigner,
    /// How long to wait for each transaction to confirm
    pub confirmation_timeout: Duration,
}

impl DeployerConfig {
    /// Load the configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    /// Parse the configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Resolve the named profile, reading secrets from the process environment
    pub fn resolve(&self, network: &str) -> Result<NetworkProfile, ConfigError> {
        self.resolve_with(network, |var| env::var(var).ok())
    }

    /// Resolve the named profile, reading secrets through `lookup`
    pub fn resolve_with(
        &self,
        network: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<NetworkProfile, ConfigError> {
        let config = self
            .networks
            .get(network)
            .ok_or_else(|| ConfigError::UnknownNetwork(network.to_string()))?;

        let raw_url = config
            .rpc_url_env
            .as_deref()
            .and_then(&lookup)
            .or_else(|| config.rpc_url.clone())
            .ok_or_else(|| ConfigError::InvalidRpcUrl {
                network: network.to_string(),
                reason: "no rpc_url configured".to_string(),
            })?;
        let rpc_url = Url::parse(&raw_url).map_err(|e| ConfigError::InvalidRpcUrl {
            network: network.to_string(),
            reason: e.to_string(),
        })?;

        let source = match &config.signer {
            Some(source) => source.clone(),
            // Local dev nodes expose unlocked accounts, anything else must be explicit
            None if is_local(&rpc_url) => SignerSource::External,
            None => return Err(ConfigError::MissingSigner(network.to_string())),
        };
        let signer = resolve_signer(network, &source, &lookup)?;

        let timeout_secs = config
            .confirmation_timeout_secs
            .unwrap_or(self.confirmation_timeout_secs);

        Ok(NetworkProfile {
            name: network.to_string(),
            rpc_url,
            chain_id: config.chain_id,
            signer,
            confirmation_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Build the signer described by `source`
fn resolve_signer(
    network: &str,
    source: &SignerSource,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<ResolvedSigner, ConfigError> {
    let read_env = |var: &str| {
        lookup(var).ok_or_else(|| ConfigError::MissingEnv {
            network: network.to_string(),
            var: var.to_string(),
        })
    };
    let invalid = |reason: String| ConfigError::InvalidSigner {
        network: network.to_string(),
        reason,
    };

    match source {
        SignerSource::StaticKey { key_env } => {
            let key = read_env(key_env)?;
            let signer =
                PrivateKeySigner::from_str(key.trim()).map_err(|e| invalid(e.to_string()))?;
            Ok(ResolvedSigner::Local(signer))
        }
        SignerSource::DerivationSeed {
            mnemonic_env,
            index,
        } => {
            let phrase = read_env(mnemonic_env)?;
            let signer = MnemonicBuilder::<English>::default()
                .phrase(phrase.trim())
                .index(*index)
                .map_err(|e| invalid(e.to_string()))?
                .build()
                .map_err(|e| invalid(e.to_string()))?;
            Ok(ResolvedSigner::Local(signer))
        }
        SignerSource::External => Ok(ResolvedSigner::External),
    }
}

/// Whether the URL points at a local development node
fn is_local(url: &Url) -> bool {
    url.host_str().is_some_and(|host| LOCAL_HOSTS.contains(&host))
}

/// Serde default for [`DeployerConfig::confirmation_timeout_secs`]
fn default_confirmation_timeout() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_SECS
}
