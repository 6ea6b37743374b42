//! The deployment plan: an ordered, statically validated list of contracts to deploy
//! and the wiring to apply once they are all deployed.

use std::{collections::HashSet, fs, path::Path, str::FromStr};

use serde::Deserialize;

use crate::{
    errors::PlanError,
    types::{ArgSpec, ProxyKind, WiringEdge},
};

/// A contract as declared by the plan author
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogicalContract {
    /// The unique logical name, which keys the contract in the ledger
    pub name: String,
    /// The build artifact to deploy, defaulting to the logical name
    #[serde(default)]
    pub artifact: Option<String>,
    /// The proxy kind, validated when the plan is built
    pub proxy: String,
    /// The initializer arguments, or the constructor arguments when deployed without a proxy
    #[serde(default)]
    pub args: Vec<ArgSpec>,
}

impl LogicalContract {
    /// Declare a contract whose artifact shares its logical name
    pub fn new(name: impl Into<String>, proxy: impl Into<String>, args: Vec<ArgSpec>) -> Self {
        Self {
            name: name.into(),
            artifact: None,
            proxy: proxy.into(),
            args,
        }
    }

    /// Deploy the contract from a differently named artifact
    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }
}

/// A validated entry in a [`Plan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStep {
    /// The position of the step in the plan
    pub index: usize,
    /// The logical name
    pub name: String,
    /// The build artifact
    pub artifact: String,
    /// The proxy kind
    pub proxy_kind: ProxyKind,
    /// The argument template; references only point at earlier steps
    pub args: Vec<ArgSpec>,
}

/// An ordered deployment plan
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// The steps, in execution order
    steps: Vec<DeploymentStep>,
    /// The wiring applied after every step has resolved
    wiring: Vec<WiringEdge>,
}

impl Plan {
    /// The steps, in execution order
    pub fn steps(&self) -> &[DeploymentStep] {
        &self.steps
    }

    /// The wiring edges
    pub fn wiring(&self) -> &[WiringEdge] {
        &self.wiring
    }

    /// Attach wiring edges, checking that both endpoints of each are part of the plan
    pub fn with_wiring(mut self, edges: Vec<WiringEdge>) -> Result<Self, PlanError> {
        for (edge, wiring) in edges.iter().enumerate() {
            for name in [&wiring.source, &wiring.target] {
                if !self.steps.iter().any(|step| &step.name == name) {
                    return Err(PlanError::UnknownWiringEndpoint {
                        edge,
                        name: name.clone(),
                    });
                }
            }
        }

        self.wiring = edges;
        Ok(self)
    }
}

/// Validate the declared contracts and build a plan from them.
///
/// Pure: no chain or ledger access happens here, so a failure leaves no state behind.
pub fn build_plan(contracts: Vec<LogicalContract>) -> Result<Plan, PlanError> {
    let mut defined: HashSet<String> = HashSet::new();
    let mut steps = Vec::with_capacity(contracts.len());

    for (index, contract) in contracts.into_iter().enumerate() {
        if defined.contains(&contract.name) {
            return Err(PlanError::DuplicateName {
                step: index,
                name: contract.name,
            });
        }

        let proxy_kind =
            ProxyKind::from_str(&contract.proxy).map_err(|kind| PlanError::UnsupportedProxyKind {
                step: index,
                name: contract.name.clone(),
                kind,
            })?;

        // Only contracts defined by earlier steps are visible, which also rules out cycles
        let forward_ref = contract.args.iter().find_map(|arg| match arg {
            ArgSpec::Reference { target } if !defined.contains(target) => Some(target.clone()),
            _ => None,
        });
        if let Some(reference) = forward_ref {
            return Err(PlanError::ForwardReference {
                step: index,
                name: contract.name,
                reference,
            });
        }

        defined.insert(contract.name.clone());
        steps.push(DeploymentStep {
            index,
            artifact: contract.artifact.unwrap_or_else(|| contract.name.clone()),
            name: contract.name,
            proxy_kind,
            args: contract.args,
        });
    }

    Ok(Plan {
        steps,
        wiring: Vec::new(),
    })
}

/// The on-disk description of the versioned contract set, read from `deployment.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentManifest {
    /// The version of the contract set
    pub version: String,
    /// The contracts, in deployment order
    #[serde(default)]
    pub contracts: Vec<LogicalContract>,
    /// The wiring applied after deployment
    #[serde(default)]
    pub wiring: Vec<WiringEdge>,
}

impl DeploymentManifest {
    /// Load a manifest from a TOML file
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| PlanError::Manifest(format!("{}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    /// Parse a manifest from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, PlanError> {
        toml::from_str(contents).map_err(|e| PlanError::Manifest(e.to_string()))
    }

    /// Validate the manifest into a plan
    pub fn into_plan(self) -> Result<Plan, PlanError> {
        build_plan(self.contracts)?.with_wiring(self.wiring)
    }
}
