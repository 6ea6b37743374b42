//! The deployment executor, walking a plan and deploying each step exactly once.
//!
//! A step is deployed as an implementation followed by a proxy pointing at it, or as a
//! single contract when it has no proxy. The ledger entry for a step is committed before
//! the next step starts, and a pending record is committed before every deployment
//! transaction so that an interrupted run can pick up where it left off.

use std::time::Duration;

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, B256},
};
use tracing::{debug, error, info, warn};

use crate::{
    chain::{with_timeout, ChainClient},
    constants::{TRANSPARENT_PROXY_ARTIFACT, UUPS_PROXY_ARTIFACT},
    errors::{ExecutorError, StepError},
    ledger::{LedgerEntry, LedgerStore, PendingDeployment, PendingStage},
    plan::{DeploymentStep, Plan},
    registry::{ArtifactRegistry, ContractFactory},
    types::{ArgSpec, ProxyKind, RuntimeVar},
};

/// The outcome of a single deployment step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// The index of the step in the plan
    pub index: usize,
    /// The logical name
    pub name: String,
    /// The proxy address, or the contract address when deployed without a proxy
    pub address: Address,
    /// Whether the ledger already held a matching entry
    pub was_skipped: bool,
    /// Whether the contract was adopted from an interrupted run
    pub recovered: bool,
}

/// What an interrupted deployment left behind
enum Recovery {
    /// The final contract landed and its entry has been written
    Adopted(StepResult),
    /// The implementation landed, only the proxy remains
    Implementation {
        /// The implementation address
        address: Address,
        /// The implementation's code hash
        hash: B256,
    },
    /// Nothing usable landed
    Fresh,
}

/// Everything needed to deploy a step, prepared before any transaction is sent
struct PreparedStep {
    /// The resolved arguments
    args: Vec<String>,
    /// The creation code of the implementation, or of the contract itself without a proxy
    implementation_code: Bytes,
    /// The initializer calldata passed to the proxy
    init_data: Bytes,
    /// The proxy factory, if the step is deployed behind a proxy
    proxy_factory: Option<ContractFactory>,
}

/// Executes a deployment plan one step at a time
pub struct DeploymentExecutor<'a, C: ChainClient> {
    /// The plan being executed
    plan: &'a Plan,
    /// The ledger of the target network
    ledger: &'a mut LedgerStore,
    /// The artifacts available to the run
    registry: &'a ArtifactRegistry,
    /// The chain being deployed to
    chain: &'a C,
    /// How long to wait for each transaction
    timeout: Duration,
    /// The index of the next step to execute
    cursor: usize,
    /// Set once a step fails; no further steps are executed
    halted: bool,
}

impl<'a, C: ChainClient> DeploymentExecutor<'a, C> {
    /// Create an executor positioned at the first step of the plan
    pub fn new(
        plan: &'a Plan,
        ledger: &'a mut LedgerStore,
        registry: &'a ArtifactRegistry,
        chain: &'a C,
        timeout: Duration,
    ) -> Self {
        Self {
            plan,
            ledger,
            registry,
            chain,
            timeout,
            cursor: 0,
            halted: false,
        }
    }

    /// Execute the next step of the plan.
    ///
    /// Returns `None` once every step has been executed, or after any step has failed.
    pub async fn next_step(&mut self) -> Option<Result<StepResult, StepError>> {
        if self.halted {
            return None;
        }

        let plan = self.plan;
        let step = plan.steps().get(self.cursor)?;
        let result = self.execute_step(step).await.map_err(|kind| StepError {
            step: step.index,
            name: step.name.clone(),
            kind,
        });

        match &result {
            Ok(_) => self.cursor += 1,
            Err(e) => {
                error!("{e}, halting deployment");
                self.halted = true;
            }
        }

        Some(result)
    }

    /// Execute every remaining step, stopping at the first failure
    pub async fn run(&mut self) -> Result<Vec<StepResult>, StepError> {
        let mut results = Vec::with_capacity(self.plan.steps().len());
        while let Some(result) = self.next_step().await {
            results.push(result?);
        }

        Ok(results)
    }

    /// Resolve, skip, recover, or deploy a single step
    async fn execute_step(&mut self, step: &DeploymentStep) -> Result<StepResult, ExecutorError> {
        let args = self.resolve_args(step)?;

        if let Some(entry) = self.ledger.entry(&step.name).cloned() {
            check_drift(entry.proxy_kind, &entry.initializer_args, step.proxy_kind, &args)?;
            // The ledger may outlive the chain it was written against, e.g. a restarted dev node
            if self.chain.code_hash(entry.proxy_address).await?.is_none() {
                return Err(ExecutorError::MissingCode(entry.proxy_address));
            }

            info!("`{}` already deployed at {:#x}, skipping", step.name, entry.proxy_address);
            return Ok(self.result(step, entry.proxy_address, true, false));
        }

        let prepared = self.prepare(step, args)?;

        let mut implementation = None;
        if let Some(pending) = self.ledger.pending(&step.name).cloned() {
            match self.recover(step, &prepared.args, pending).await? {
                Recovery::Adopted(result) => return Ok(result),
                Recovery::Implementation { address, hash } => {
                    implementation = Some((address, hash))
                }
                Recovery::Fresh => {}
            }
        }

        let (implementation_address, implementation_hash) = match implementation {
            Some(implementation) => implementation,
            None => {
                let code = prepared.implementation_code.clone();
                let address = self
                    .deploy_tracked(step, &prepared.args, code, |expected_address| {
                        PendingStage::Implementation { expected_address }
                    })
                    .await?;
                (address, self.deployed_code_hash(address).await?)
            }
        };

        let Some(proxy_factory) = &prepared.proxy_factory else {
            self.record(
                step,
                &prepared.args,
                implementation_address,
                implementation_address,
                implementation_hash,
            )?;
            info!("deployed `{}` at {implementation_address:#x}", step.name);
            return Ok(self.result(step, implementation_address, false, false));
        };

        debug!("`{}` implementation at {implementation_address:#x}", step.name);
        let proxy_code = self.proxy_code(
            step.proxy_kind,
            proxy_factory,
            implementation_address,
            &prepared.init_data,
        )?;
        let proxy_address = self
            .deploy_tracked(step, &prepared.args, proxy_code, |expected_address| {
                PendingStage::Proxy {
                    implementation_address,
                    implementation_hash,
                    expected_address,
                }
            })
            .await?;

        self.record(
            step,
            &prepared.args,
            proxy_address,
            implementation_address,
            implementation_hash,
        )?;
        info!(
            "deployed `{}` behind {} proxy at {proxy_address:#x}",
            step.name, step.proxy_kind
        );
        Ok(self.result(step, proxy_address, false, false))
    }

    /// Substitute references and runtime variables into the step's argument template
    fn resolve_args(&self, step: &DeploymentStep) -> Result<Vec<String>, ExecutorError> {
        step.args
            .iter()
            .map(|arg| match arg {
                ArgSpec::Reference { target } => self
                    .ledger
                    .entry(target)
                    .map(|entry| entry.proxy_address.to_checksum(None))
                    .ok_or_else(|| ExecutorError::UnresolvedReference(target.clone())),
                ArgSpec::Variable { var } => {
                    let value = match var {
                        RuntimeVar::Deployer => self.chain.deployer().to_checksum(None),
                        RuntimeVar::ChainId => self.chain.chain_id().to_string(),
                    };
                    debug!("`{}`: `{var}` resolves to {value}", step.name);
                    Ok(value)
                }
                ArgSpec::Literal(value) => Ok(value.to_string()),
            })
            .collect()
    }

    /// Load artifacts and encode everything the step will send, so that encoding
    /// failures surface before any transaction
    fn prepare(
        &self,
        step: &DeploymentStep,
        args: Vec<String>,
    ) -> Result<PreparedStep, ExecutorError> {
        let factory = self.registry.factory(&step.artifact)?;

        let prepared = match step.proxy_kind {
            ProxyKind::None => PreparedStep {
                implementation_code: factory.deploy_code(&args)?,
                init_data: Bytes::new(),
                proxy_factory: None,
                args,
            },
            kind => {
                let proxy_artifact = match kind {
                    ProxyKind::Transparent => TRANSPARENT_PROXY_ARTIFACT,
                    _ => UUPS_PROXY_ARTIFACT,
                };
                PreparedStep {
                    implementation_code: factory.deploy_code(&[])?,
                    init_data: factory.initializer_calldata(&args)?,
                    proxy_factory: Some(self.registry.factory(proxy_artifact)?),
                    args,
                }
            }
        };

        Ok(prepared)
    }

    /// The proxy's creation code, with the constructor arguments of the given kind
    fn proxy_code(
        &self,
        kind: ProxyKind,
        proxy_factory: &ContractFactory,
        implementation: Address,
        init_data: &Bytes,
    ) -> Result<Bytes, ExecutorError> {
        let data = DynSolValue::Bytes(init_data.to_vec());
        let ctor_args = match kind {
            // The transparent proxy deploys a `ProxyAdmin` owned by the deployer
            ProxyKind::Transparent => vec![
                DynSolValue::Address(implementation),
                DynSolValue::Address(self.chain.deployer()),
                data,
            ],
            _ => vec![DynSolValue::Address(implementation), data],
        };

        Ok(proxy_factory.deploy_code_with(&ctor_args)?)
    }

    /// Inspect what an interrupted run left on chain
    async fn recover(
        &mut self,
        step: &DeploymentStep,
        args: &[String],
        pending: PendingDeployment,
    ) -> Result<Recovery, ExecutorError> {
        let (final_address, implementation) = match pending.stage {
            PendingStage::Implementation { expected_address }
                if pending.proxy_kind == ProxyKind::None =>
            {
                (Some(expected_address), None)
            }
            PendingStage::Implementation { expected_address } => (None, Some(expected_address)),
            PendingStage::Proxy {
                implementation_address,
                expected_address,
                ..
            } => (Some(expected_address), Some(implementation_address)),
        };

        if let Some(address) = final_address {
            if let Some(code_hash) = self.chain.code_hash(address).await? {
                check_drift(pending.proxy_kind, &pending.initializer_args, step.proxy_kind, args)?;

                let (implementation_address, implementation_hash) = match pending.stage {
                    PendingStage::Proxy {
                        implementation_address,
                        implementation_hash,
                        ..
                    } => (implementation_address, implementation_hash),
                    PendingStage::Implementation { .. } => (address, code_hash),
                };

                warn!("adopting `{}` at {address:#x} from an interrupted run", step.name);
                self.record(step, args, address, implementation_address, implementation_hash)?;
                return Ok(Recovery::Adopted(self.result(step, address, false, true)));
            }
        }

        // Nothing landed where the last transaction deploys to; make sure it never will
        // before sending anything that could duplicate it
        let in_flight = pending.stage.expected_address();
        if self.chain.code_hash(in_flight).await?.is_none() {
            self.ensure_resolved(pending.nonce, in_flight).await?;
        }

        // Implementations are deployed without arguments, so one can be reused whatever
        // arguments the proxy ends up initialized with
        if let Some(address) = implementation.filter(|_| pending.proxy_kind == step.proxy_kind) {
            if let Some(hash) = self.chain.code_hash(address).await? {
                warn!(
                    "reusing `{}` implementation at {address:#x} from an interrupted run",
                    step.name
                );
                return Ok(Recovery::Implementation { address, hash });
            }
        }

        debug!("discarding pending deployment of `{}`", step.name);
        self.ledger.clear_pending(&step.name)?;
        Ok(Recovery::Fresh)
    }

    /// Fail if the transaction with `nonce` may still be mined.
    ///
    /// A nonce below the mined count was consumed, and one at or above the pending count was
    /// never accepted by the node; anything in between is still in the mempool.
    async fn ensure_resolved(&self, nonce: u64, address: Address) -> Result<(), ExecutorError> {
        let mined = self.chain.mined_nonce().await?;
        let next = self.chain.pending_nonce().await?;
        if mined <= nonce && nonce < next {
            return Err(ExecutorError::UnresolvedTransaction { nonce, address });
        }

        Ok(())
    }

    /// Commit a pending record for the transaction about to be sent, then deploy `code`
    async fn deploy_tracked(
        &mut self,
        step: &DeploymentStep,
        args: &[String],
        code: Bytes,
        stage: impl FnOnce(Address) -> PendingStage,
    ) -> Result<Address, ExecutorError> {
        let nonce = self.chain.pending_nonce().await?;
        let expected = self.chain.deployer().create(nonce);
        self.ledger.set_pending(
            &step.name,
            PendingDeployment {
                proxy_kind: step.proxy_kind,
                initializer_args: args.to_vec(),
                nonce,
                stage: stage(expected),
            },
        )?;

        let address = with_timeout(self.timeout, self.chain.deploy(code)).await?;
        if address != expected {
            warn!("`{}` deployed at {address:#x}, expected {expected:#x}", step.name);
        }

        Ok(address)
    }

    /// The code hash of a freshly deployed contract
    async fn deployed_code_hash(&self, address: Address) -> Result<B256, ExecutorError> {
        self.chain
            .code_hash(address)
            .await?
            .ok_or_else(|| ExecutorError::DeploymentReverted {
                reason: format!("no code at {address:#x} after deployment"),
            })
    }

    /// Commit the ledger entry for a deployed step
    fn record(
        &mut self,
        step: &DeploymentStep,
        args: &[String],
        proxy_address: Address,
        implementation_address: Address,
        implementation_hash: B256,
    ) -> Result<(), ExecutorError> {
        let entry = LedgerEntry {
            proxy_address,
            proxy_kind: step.proxy_kind,
            artifact: step.artifact.clone(),
            implementation_address,
            implementation_hash,
            initializer_args: args.to_vec(),
            network: self.ledger.network().to_string(),
            upgrades: 0,
        };

        Ok(self.ledger.record(&step.name, entry)?)
    }

    /// Build the result for a step
    fn result(
        &self,
        step: &DeploymentStep,
        address: Address,
        was_skipped: bool,
        recovered: bool,
    ) -> StepResult {
        StepResult {
            index: step.index,
            name: step.name.clone(),
            address,
            was_skipped,
            recovered,
        }
    }
}

/// Compare a recorded deployment against what the plan now resolves to
fn check_drift(
    recorded_kind: ProxyKind,
    recorded_args: &[String],
    planned_kind: ProxyKind,
    resolved_args: &[String],
) -> Result<(), ExecutorError> {
    if recorded_kind != planned_kind {
        return Err(ExecutorError::ProxyKindDrift {
            recorded: recorded_kind,
            planned: planned_kind,
        });
    }

    if recorded_args != resolved_args {
        return Err(ExecutorError::ArgumentDrift {
            recorded: recorded_args.to_vec(),
            resolved: resolved_args.to_vec(),
        });
    }

    Ok(())
}
