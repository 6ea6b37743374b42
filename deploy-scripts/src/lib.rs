//! Scripts for deploying, wiring, and upgrading proxied smart contracts.
//!
//! A deployment manifest lists the contracts to deploy in order. Each is deployed once
//! per network behind the proxy kind it declares, and recorded in a ledger that makes
//! re-runs idempotent and drives later upgrades.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod chain;
pub mod cli;
mod commands;
pub mod constants;
pub mod errors;
pub mod executor;
pub mod ledger;
pub mod network;
pub mod plan;
pub mod registry;
mod solidity;
pub mod types;
pub mod upgrade;
pub mod utils;
pub mod wiring;
