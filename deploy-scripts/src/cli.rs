//! Definitions of CLI arguments and commands for deploy scripts

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{
    commands::{deploy, status, upgrade},
    constants::DEFAULT_CONFIG_PATH,
    errors::ScriptError,
    network::DeployerConfig,
};

/// Deploy, wire, and upgrade proxied contracts
#[derive(Parser)]
pub struct Cli {
    /// Path of the deployer configuration
    #[arg(
        short,
        long,
        global = true,
        env = "DEPLOYER_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config: PathBuf,

    /// The command to run
    #[command(subcommand)]
    pub command: Command,
}

/// The available commands
#[derive(Subcommand)]
pub enum Command {
    /// Deploy every contract in the deployment manifest, then wire them together
    Deploy(DeployArgs),
    /// Upgrade a single deployed contract
    Upgrade(UpgradeArgs),
    /// Print the contracts recorded for a network
    Status(StatusArgs),
}

impl Command {
    /// Run the command against the loaded configuration
    pub async fn run(self, config: &DeployerConfig) -> Result<(), ScriptError> {
        match self {
            Command::Deploy(args) => deploy(args, config).await,
            Command::Upgrade(args) => upgrade(args, config).await,
            Command::Status(args) => status(args, config),
        }
    }
}

/// Deploy the contracts of the deployment manifest.
///
/// Contracts already recorded in the ledger with the same arguments are skipped, so
/// re-running after a failure picks up at the failed step.
#[derive(Args)]
pub struct DeployArgs {
    /// The network profile to deploy to
    pub network: String,

    /// Path of the deployment manifest, overriding the configured one
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Don't apply the manifest's wiring after deploying
    #[arg(long)]
    pub skip_wiring: bool,
}

/// Upgrade a deployed contract to a new implementation.
///
/// Transparent proxies are upgraded through their `ProxyAdmin`, UUPS proxies through
/// the implementation's `upgradeToAndCall`.
#[derive(Args)]
pub struct UpgradeArgs {
    /// The network profile the contract is deployed on
    #[arg(short, long)]
    pub network: String,

    /// The logical name of the contract
    #[arg(long)]
    pub name: String,

    /// The proxy address of the contract, which must match the ledger
    #[arg(short, long)]
    pub address: String,

    /// An already-deployed implementation to upgrade to.
    /// If omitted, a new implementation is deployed from the contract's artifact.
    #[arg(short, long)]
    pub implementation: Option<String>,

    /// Hex calldata to invoke on the new implementation as part of the upgrade
    #[arg(long)]
    pub calldata: Option<String>,
}

/// Print the ledger entries of a network
#[derive(Args)]
pub struct StatusArgs {
    /// The network profile
    pub network: String,
}
