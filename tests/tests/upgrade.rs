use alloy::primitives::{keccak256, Address, Bytes};
use deploy_scripts::{
    errors::UpgradeError,
    plan::{build_plan, LogicalContract},
    upgrade::{NewImplementation, UpgradeRequest},
};
use eyre::Result;
use tests::utils::{
    counter_consumer_plan, counter_v2_artifact, int, TestEnv, COUNTER_BYTECODE,
    COUNTER_V2_BYTECODE,
};

/// Upgrade `name` to the implementation deployed at `address`
fn to_deployed(name: &str, address: Address) -> UpgradeRequest {
    UpgradeRequest {
        name: name.to_string(),
        expected_address: None,
        implementation: NewImplementation::Deployed(address),
        calldata: Bytes::new(),
    }
}

/// Upgrade `name` to a fresh implementation built from its artifact
fn from_artifact(name: &str) -> UpgradeRequest {
    UpgradeRequest {
        name: name.to_string(),
        expected_address: None,
        implementation: NewImplementation::Artifact,
        calldata: Bytes::new(),
    }
}

/// Extract the upgrade error from a failed upgrade
fn upgrade_error(report: &eyre::Report) -> &UpgradeError {
    report.downcast_ref::<UpgradeError>().unwrap()
}

#[tokio::test]
async fn test_transparent_upgrade_to_deployed_implementation() -> Result<()> {
    let env = TestEnv::new()?;
    env.deploy(&counter_consumer_plan("transparent", 42)?).await?;
    let before = env.entry("Counter")?;

    let v2 = env.chain.deploy_external(Bytes::from_static(COUNTER_V2_BYTECODE));
    let result = env.upgrade(&to_deployed("Counter", v2)).await?;

    assert!(!result.unchanged);
    assert_eq!(result.proxy_address, before.proxy_address);
    assert_eq!(result.previous_implementation_hash, keccak256(COUNTER_BYTECODE));
    assert_eq!(result.implementation_hash, keccak256(COUNTER_V2_BYTECODE));
    assert_eq!(result.upgrades, 1);
    assert_eq!(env.chain.implementation_of(before.proxy_address), v2);

    // The upgrade went through the proxy's admin
    let admin = env.chain.admin_of(before.proxy_address);
    assert_eq!(env.chain.calls_to(admin).len(), 1);

    let after = env.entry("Counter")?;
    assert_eq!(after.proxy_address, before.proxy_address);
    assert_eq!(after.initializer_args, before.initializer_args);
    assert_eq!(after.implementation_address, v2);
    assert_eq!(after.implementation_hash, keccak256(COUNTER_V2_BYTECODE));
    assert_eq!(after.upgrades, 1);

    // Rolling back counts as another upgrade
    let result = env.upgrade(&to_deployed("Counter", before.implementation_address)).await?;
    assert_eq!(result.upgrades, 2);
    assert_eq!(env.entry("Counter")?.implementation_hash, before.implementation_hash);

    Ok(())
}

#[tokio::test]
async fn test_uups_upgrade_from_artifact() -> Result<()> {
    let mut env = TestEnv::new()?;
    env.deploy(&counter_consumer_plan("uups", 42)?).await?;
    let before = env.entry("Counter")?;

    env.registry.insert(counter_v2_artifact());
    let deploys_before = env.chain.deploy_count();
    let result = env.upgrade(&from_artifact("Counter")).await?;

    assert_eq!(env.chain.deploy_count(), deploys_before + 1);
    assert_ne!(result.implementation_address, before.implementation_address);
    assert_eq!(result.implementation_hash, keccak256(COUNTER_V2_BYTECODE));
    assert_eq!(
        env.chain.implementation_of(before.proxy_address),
        result.implementation_address
    );

    // The upgrade call went to the proxy itself
    assert_eq!(env.chain.calls_to(before.proxy_address).len(), 1);
    assert_eq!(env.entry("Counter")?.upgrades, 1);

    Ok(())
}

#[tokio::test]
async fn test_upgrade_to_current_implementation_is_noop() -> Result<()> {
    let env = TestEnv::new()?;
    env.deploy(&counter_consumer_plan("uups", 42)?).await?;
    let ledger_before = env.ledger()?;
    let before = env.entry("Counter")?;
    let deploys_before = env.chain.deploy_count();

    let result = env.upgrade(&from_artifact("Counter")).await?;

    assert!(result.unchanged);
    assert_eq!(result.implementation_address, before.implementation_address);
    // The identical implementation was still deployed before it could be compared
    assert_eq!(env.chain.deploy_count(), deploys_before + 1);
    assert_eq!(result.upgrades, 0);
    assert_eq!(result.previous_implementation_hash, result.implementation_hash);
    assert_eq!(env.chain.call_count(), 0);
    assert_eq!(env.ledger()?, ledger_before);

    Ok(())
}

#[tokio::test]
async fn test_upgrade_with_calldata_reinstalls_implementation() -> Result<()> {
    let env = TestEnv::new()?;
    env.deploy(&counter_consumer_plan("uups", 42)?).await?;
    let before = env.entry("Counter")?;

    let request = UpgradeRequest {
        calldata: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
        ..to_deployed("Counter", before.implementation_address)
    };
    let result = env.upgrade(&request).await?;

    assert!(!result.unchanged);
    assert_eq!(result.upgrades, 1);
    assert_eq!(env.chain.call_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_upgrade_leaves_other_contracts_untouched() -> Result<()> {
    let env = TestEnv::new()?;
    env.deploy(&counter_consumer_plan("transparent", 42)?).await?;
    let consumer_before = env.entry("Consumer")?;

    let v2 = env.chain.deploy_external(Bytes::from_static(COUNTER_V2_BYTECODE));
    env.upgrade(&to_deployed("Counter", v2)).await?;

    assert_eq!(env.entry("Consumer")?, consumer_before);
    assert_eq!(
        env.chain.implementation_of(consumer_before.proxy_address),
        consumer_before.implementation_address
    );

    Ok(())
}

#[tokio::test]
async fn test_unproxied_contract_not_upgradeable() -> Result<()> {
    let env = TestEnv::new()?;
    env.deploy(&build_plan(vec![LogicalContract::new("Token", "none", vec![int(1000)])])?)
        .await?;
    let ledger_before = env.ledger()?;
    let deploys_before = env.chain.deploy_count();

    let report = env.upgrade(&from_artifact("Token")).await.unwrap_err();

    assert!(matches!(
        upgrade_error(&report),
        UpgradeError::NotUpgradeable(name) if name == "Token"
    ));
    assert_eq!(env.ledger()?, ledger_before);
    assert_eq!(env.chain.deploy_count(), deploys_before);
    assert_eq!(env.chain.call_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_address_mismatch_rejected_before_chain_interaction() -> Result<()> {
    let env = TestEnv::new()?;
    env.deploy(&counter_consumer_plan("uups", 42)?).await?;
    let ledger_before = env.ledger()?;
    let deploys_before = env.chain.deploy_count();
    let recorded = env.entry("Counter")?.proxy_address;

    let request = UpgradeRequest {
        expected_address: Some(Address::repeat_byte(0x11)),
        ..from_artifact("Counter")
    };
    let report = env.upgrade(&request).await.unwrap_err();

    match upgrade_error(&report) {
        UpgradeError::AddressMismatch { recorded: r, provided, .. } => {
            assert_eq!(*r, recorded);
            assert_eq!(*provided, Address::repeat_byte(0x11));
        }
        other => panic!("expected an address mismatch, got {other:?}"),
    }
    assert_eq!(env.chain.deploy_count(), deploys_before);
    assert_eq!(env.chain.call_count(), 0);
    assert_eq!(env.ledger()?, ledger_before);

    // The matching address is accepted
    let request = UpgradeRequest {
        expected_address: Some(recorded),
        ..to_deployed("Counter", env.entry("Consumer")?.implementation_address)
    };
    env.upgrade(&request).await?;

    Ok(())
}

#[tokio::test]
async fn test_upgrade_undeployed_contract() -> Result<()> {
    let env = TestEnv::new()?;
    env.deploy(&counter_consumer_plan("uups", 42)?).await?;

    let report = env.upgrade(&from_artifact("Treasury")).await.unwrap_err();
    assert!(matches!(
        upgrade_error(&report),
        UpgradeError::NotDeployed { name, .. } if name == "Treasury"
    ));

    Ok(())
}

#[tokio::test]
async fn test_upgrade_to_empty_address() -> Result<()> {
    let env = TestEnv::new()?;
    env.deploy(&counter_consumer_plan("transparent", 42)?).await?;
    let ledger_before = env.ledger()?;

    let empty = Address::repeat_byte(0x42);
    let report = env.upgrade(&to_deployed("Counter", empty)).await.unwrap_err();

    assert!(matches!(
        upgrade_error(&report),
        UpgradeError::MissingImplementation(address) if *address == empty
    ));
    assert_eq!(env.chain.call_count(), 0);
    assert_eq!(env.ledger()?, ledger_before);

    Ok(())
}
