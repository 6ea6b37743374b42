//! Implementations of the various deploy scripts

use std::path::{Path, PathBuf};

use alloy::primitives::Bytes;
use itertools::Itertools;
use tracing::info;

use crate::{
    cli::{DeployArgs, StatusArgs, UpgradeArgs},
    errors::ScriptError,
    executor::DeploymentExecutor,
    ledger::{Ledger, LedgerEntry, LedgerStore},
    network::DeployerConfig,
    plan::DeploymentManifest,
    registry::ArtifactRegistry,
    upgrade::{self, check_preconditions, NewImplementation, UpgradeRequest},
    utils::{parse_address, parse_calldata, setup_client},
    wiring::apply_wiring,
};

/// Deploy the manifest's contracts and apply its wiring
pub async fn deploy(args: DeployArgs, config: &DeployerConfig) -> Result<(), ScriptError> {
    let profile = config.resolve(&args.network)?;
    let plan_path = args
        .plan
        .unwrap_or_else(|| PathBuf::from(&config.paths.plan));

    // The plan is validated before anything touches the chain or the ledger
    let manifest = DeploymentManifest::load(&plan_path)?;
    info!("loaded deployment manifest version {}", manifest.version);
    let plan = manifest.into_plan()?;

    let chain = setup_client(&profile).await?;
    let registry = ArtifactRegistry::from_dir(&config.paths.artifacts);
    let mut ledger = LedgerStore::open(&config.paths.ledger, &profile.name, profile.chain_id)?;

    let results = DeploymentExecutor::new(
        &plan,
        &mut ledger,
        &registry,
        &chain,
        profile.confirmation_timeout,
    )
    .run()
    .await?;

    let (skipped, deployed): (Vec<_>, Vec<_>) = results.iter().partition(|r| r.was_skipped);
    info!(
        "deployment complete: {} deployed, {} already up to date",
        deployed.len(),
        skipped.len()
    );

    if args.skip_wiring {
        info!("skipping wiring");
        return Ok(());
    }

    let wired = apply_wiring(
        plan.wiring(),
        &ledger,
        &registry,
        &chain,
        profile.confirmation_timeout,
    )
    .await?;
    info!("applied {} wiring edge(s)", wired.len());

    Ok(())
}

/// Upgrade one contract
pub async fn upgrade(args: UpgradeArgs, config: &DeployerConfig) -> Result<(), ScriptError> {
    let profile = config.resolve(&args.network)?;

    let implementation = match args.implementation.as_deref() {
        Some(address) => NewImplementation::Deployed(parse_address(address)?),
        None => NewImplementation::Artifact,
    };
    let request = UpgradeRequest {
        name: args.name,
        expected_address: Some(parse_address(&args.address)?),
        implementation,
        calldata: args
            .calldata
            .as_deref()
            .map(parse_calldata)
            .transpose()?
            .unwrap_or_else(Bytes::new),
    };

    let mut ledger = LedgerStore::open(&config.paths.ledger, &profile.name, profile.chain_id)?;
    // Fail on ledger mismatches before connecting to the network
    check_preconditions(&request, &ledger)?;

    let chain = setup_client(&profile).await?;
    let registry = ArtifactRegistry::from_dir(&config.paths.artifacts);
    let result = upgrade::upgrade(
        &request,
        &mut ledger,
        &registry,
        &chain,
        profile.confirmation_timeout,
    )
    .await?;

    if result.unchanged {
        println!("{} is already up to date", result.name);
    } else {
        println!(
            "{} at {:#x} now runs implementation {:#x} (upgrade #{})",
            result.name, result.proxy_address, result.implementation_address, result.upgrades
        );
    }

    Ok(())
}

/// Print the ledger entries of a network
pub fn status(args: StatusArgs, config: &DeployerConfig) -> Result<(), ScriptError> {
    let ledger = Ledger::load(Path::new(&config.paths.ledger))?;
    let Some(section) = ledger.network(&args.network) else {
        println!("nothing deployed on `{}`", args.network);
        return Ok(());
    };

    println!("network `{}` (chain {})", args.network, section.chain_id);
    println!(
        "{}",
        section
            .contracts
            .iter()
            .map(|(name, entry)| format_entry(name, entry))
            .join("\n")
    );

    if !section.pending.is_empty() {
        println!(
            "interrupted deployments: {}",
            section.pending.keys().join(", ")
        );
    }

    Ok(())
}

/// A one-line summary of a ledger entry
fn format_entry(name: &str, entry: &LedgerEntry) -> String {
    format!(
        "  {name}: {:#x} ({}, implementation {:#x}, {} upgrade(s))",
        entry.proxy_address, entry.proxy_kind, entry.implementation_address, entry.upgrades
    )
}
