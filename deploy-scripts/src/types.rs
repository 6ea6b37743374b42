//! Type definitions used throughout the scripts

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::constants::{CHAIN_ID_VAR, DEPLOYER_VAR};

/// The upgrade mechanism a deployed contract sits behind
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    /// An OpenZeppelin `TransparentUpgradeableProxy`, upgraded through its `ProxyAdmin`
    Transparent,
    /// An `ERC1967Proxy` whose implementation carries the upgrade logic
    Uups,
    /// No proxy, the contract is deployed directly and cannot be upgraded
    None,
}

impl ProxyKind {
    /// Whether contracts deployed with this kind can later be upgraded
    pub fn is_upgradeable(&self) -> bool {
        !matches!(self, ProxyKind::None)
    }
}

impl Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Transparent => write!(f, "transparent"),
            ProxyKind::Uups => write!(f, "uups"),
            ProxyKind::None => write!(f, "none"),
        }
    }
}

impl FromStr for ProxyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "transparent" => Ok(ProxyKind::Transparent),
            "uups" => Ok(ProxyKind::Uups),
            "none" => Ok(ProxyKind::None),
            _ => Err(s.to_string()),
        }
    }
}

/// A literal initializer argument, rendered to text and coerced into its ABI type at encoding time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    /// A boolean
    Bool(bool),
    /// An integer small enough to write unquoted; larger values are written as text
    Integer(i64),
    /// Any other value, e.g. a string, an address, or a big number
    Text(String),
}

impl Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Bool(b) => write!(f, "{b}"),
            LiteralValue::Integer(i) => write!(f, "{i}"),
            LiteralValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A value known only once the run has connected to a network
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeVar {
    /// The address of the signer deploying the contracts
    Deployer,
    /// The chain ID of the target network
    ChainId,
}

impl Display for RuntimeVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeVar::Deployer => write!(f, "{DEPLOYER_VAR}"),
            RuntimeVar::ChainId => write!(f, "{CHAIN_ID_VAR}"),
        }
    }
}

/// One entry in a contract's initializer argument template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgSpec {
    /// The proxy address of another logical contract, written `{ ref = "Name" }`
    Reference {
        /// The referenced logical name
        #[serde(rename = "ref")]
        target: String,
    },
    /// A runtime variable, written `{ var = "deployer" }`
    Variable {
        /// The variable
        var: RuntimeVar,
    },
    /// A literal value
    Literal(LiteralValue),
}

impl ArgSpec {
    /// Reference another logical contract's address
    pub fn reference(target: impl Into<String>) -> Self {
        ArgSpec::Reference {
            target: target.into(),
        }
    }

    /// The deployer's address
    pub fn deployer() -> Self {
        ArgSpec::Variable {
            var: RuntimeVar::Deployer,
        }
    }
}

/// How a wiring edge is applied to its target
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WiringMethod {
    /// `AccessControl.grantRole` / `revokeRole`, with the role ID `keccak256(capability)`
    #[default]
    Role,
    /// A `capability(address,bool)` setter on the target
    Setter,
}

/// A post-deploy authorization granted by `target` to `source`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiringEdge {
    /// The contract being authorized
    pub source: String,
    /// The contract granting the authorization
    pub target: String,
    /// The role or setter name
    pub capability: String,
    /// Whether to grant (`true`) or revoke (`false`) the capability
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// How the capability is applied
    #[serde(default)]
    pub method: WiringMethod,
}

impl WiringEdge {
    /// Grant `capability` on `target` to `source` through `AccessControl`
    pub fn grant_role(
        source: impl Into<String>,
        target: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            capability: capability.into(),
            enabled: true,
            method: WiringMethod::Role,
        }
    }
}

/// Serde default for [`WiringEdge::enabled`]
fn default_enabled() -> bool {
    true
}
