use alloy::primitives::{keccak256, Address, B256};
use deploy_scripts::{
    constants::DEFAULT_ADMIN_ROLE_NAME,
    errors::{ArtifactError, WiringError},
    plan::{build_plan, LogicalContract},
    types::{WiringEdge, WiringMethod},
    wiring::role_id,
};
use eyre::Result;
use tests::utils::{counter_consumer_plan, int, TestEnv};

/// Deploy a counter, a consumer referencing it, and a token
async fn deployed_env() -> Result<TestEnv> {
    let env = TestEnv::new()?;
    env.deploy(&build_plan(vec![
        LogicalContract::new("Token", "none", vec![int(1000)]),
        LogicalContract::new("Counter", "transparent", vec![int(0)]),
    ])?)
    .await?;
    env.deploy(&counter_consumer_plan("transparent", 0)?).await?;
    Ok(env)
}

/// A setter edge
fn setter(source: &str, target: &str, capability: &str, enabled: bool) -> WiringEdge {
    WiringEdge {
        source: source.to_string(),
        target: target.to_string(),
        capability: capability.to_string(),
        enabled,
        method: WiringMethod::Setter,
    }
}

#[tokio::test]
async fn test_role_grant_is_idempotent() -> Result<()> {
    let env = deployed_env().await?;
    let counter = env.entry("Counter")?.proxy_address;
    let consumer = env.entry("Consumer")?.proxy_address;
    let edges = vec![WiringEdge::grant_role("Consumer", "Counter", "MINTER_ROLE")];

    let first = env.wire(&edges).await?;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].source, consumer);
    assert_eq!(first[0].target, counter);
    assert!(env.chain.has_role(counter, role_id("MINTER_ROLE"), consumer));
    assert_eq!(env.chain.role_count(), 1);

    // Reapplying leaves the same role set
    env.wire(&edges).await?;
    assert!(env.chain.has_role(counter, role_id("MINTER_ROLE"), consumer));
    assert_eq!(env.chain.role_count(), 1);
    assert_eq!(env.chain.calls_to(counter).len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_role_revoke() -> Result<()> {
    let env = deployed_env().await?;
    let counter = env.entry("Counter")?.proxy_address;
    let consumer = env.entry("Consumer")?.proxy_address;

    let grant = WiringEdge::grant_role("Consumer", "Counter", "MINTER_ROLE");
    let revoke = WiringEdge { enabled: false, ..grant.clone() };

    env.wire(&[grant]).await?;
    let results = env.wire(&[revoke]).await?;

    assert!(!results[0].enabled);
    assert!(!env.chain.has_role(counter, role_id("MINTER_ROLE"), consumer));
    assert_eq!(env.chain.role_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_default_admin_role_is_zero() -> Result<()> {
    let env = deployed_env().await?;
    let counter = env.entry("Counter")?.proxy_address;
    let consumer = env.entry("Consumer")?.proxy_address;

    env.wire(&[WiringEdge::grant_role("Consumer", "Counter", DEFAULT_ADMIN_ROLE_NAME)])
        .await?;

    assert!(env.chain.has_role(counter, B256::ZERO, consumer));
    assert!(!env.chain.has_role(counter, keccak256(DEFAULT_ADMIN_ROLE_NAME), consumer));

    Ok(())
}

#[tokio::test]
async fn test_setter_edge_calls_target() -> Result<()> {
    let env = deployed_env().await?;
    let token = env.entry("Token")?.proxy_address;
    let consumer = env.entry("Consumer")?.proxy_address;

    env.wire(&[setter("Consumer", "Token", "setMinter", true)]).await?;

    let calls = env.chain.calls_to(token);
    assert_eq!(calls.len(), 1);

    let call = &calls[0];
    assert_eq!(call[..4], keccak256("setMinter(address,bool)")[..4]);
    assert_eq!(call.len(), 4 + 2 * 32);
    assert_eq!(call[4 + 12..4 + 32], consumer[..]);
    assert_eq!(call[4 + 63], 1);

    Ok(())
}

#[tokio::test]
async fn test_missing_endpoint_sends_nothing() -> Result<()> {
    let env = deployed_env().await?;
    let edges = vec![
        WiringEdge::grant_role("Consumer", "Counter", "MINTER_ROLE"),
        WiringEdge::grant_role("Treasury", "Counter", "MINTER_ROLE"),
    ];

    let report = env.wire(&edges).await.unwrap_err();
    match report.downcast_ref::<WiringError>() {
        Some(WiringError::MissingEndpoint { edge, name }) => {
            assert_eq!(*edge, 1);
            assert_eq!(name, "Treasury");
        }
        other => panic!("expected a missing endpoint, got {other:?}"),
    }

    // The valid first edge was not applied either
    assert_eq!(env.chain.call_count(), 0);
    assert_eq!(env.chain.role_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_unknown_setter_sends_nothing() -> Result<()> {
    let env = deployed_env().await?;
    let edges = vec![
        setter("Consumer", "Token", "setMinter", true),
        setter("Consumer", "Token", "setBurner", true),
    ];

    let report = env.wire(&edges).await.unwrap_err();
    assert!(matches!(
        report.downcast_ref::<WiringError>(),
        Some(WiringError::Artifact(ArtifactError::UnknownFunction { .. }))
    ));
    assert_eq!(env.chain.call_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_wiring_reverts_report_edge() -> Result<()> {
    let env = deployed_env().await?;

    // Recorded in the ledger, but with no code on chain
    let mut ledger = env.open_ledger()?;
    let mut ghost = env.entry("Token")?;
    ghost.proxy_address = Address::repeat_byte(0x77);
    ledger.record("Ghost", ghost)?;
    drop(ledger);

    let report = env
        .wire(&[
            WiringEdge::grant_role("Consumer", "Counter", "MINTER_ROLE"),
            setter("Consumer", "Ghost", "setMinter", true),
        ])
        .await
        .unwrap_err();

    assert!(matches!(
        report.downcast_ref::<WiringError>(),
        Some(WiringError::CallReverted { edge: 1, .. })
    ));
    // Edges before the failing one stay applied
    assert_eq!(env.chain.role_count(), 1);

    Ok(())
}
