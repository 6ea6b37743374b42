//! The deployments ledger: the durable record of what is deployed where.
//!
//! The ledger is a single JSON file holding one section per network. Every mutation
//! is committed immediately by writing a sibling temp file and renaming it over the
//! ledger, so a crash leaves either the old or the new contents on disk.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{
    constants::{LEDGER_FORMAT_VERSION, LOCK_FILE_EXTENSION},
    errors::LedgerError,
    types::ProxyKind,
};

/// The record of one deployed logical contract on one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The address callers interact with; the contract itself when deployed without a proxy
    pub proxy_address: Address,
    /// The proxy kind the contract was deployed behind
    pub proxy_kind: ProxyKind,
    /// The artifact the implementation was built from
    pub artifact: String,
    /// The current implementation
    pub implementation_address: Address,
    /// The keccak256 hash of the current implementation's runtime code
    pub implementation_hash: B256,
    /// The resolved initializer (or constructor) arguments used at deployment
    pub initializer_args: Vec<String>,
    /// The network the contract was deployed to
    pub network: String,
    /// The number of upgrades applied since deployment
    #[serde(default)]
    pub upgrades: u32,
}

/// How far an interrupted deployment got before its last transaction was sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum PendingStage {
    /// The implementation (or the contract itself, without a proxy) was being deployed
    Implementation {
        /// The CREATE address of the implementation transaction
        expected_address: Address,
    },
    /// The implementation landed and the proxy was being deployed
    Proxy {
        /// The deployed implementation
        implementation_address: Address,
        /// The implementation's runtime code hash
        implementation_hash: B256,
        /// The CREATE address of the proxy transaction
        expected_address: Address,
    },
}

impl PendingStage {
    /// The CREATE address of the last transaction sent
    pub fn expected_address(&self) -> Address {
        match self {
            PendingStage::Implementation { expected_address }
            | PendingStage::Proxy {
                expected_address, ..
            } => *expected_address,
        }
    }
}

/// A crash-recovery record, committed before each deployment transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeployment {
    /// The proxy kind in use
    pub proxy_kind: ProxyKind,
    /// The resolved arguments in use
    pub initializer_args: Vec<String>,
    /// The deployer nonce of the transaction that was about to be sent
    pub nonce: u64,
    /// The stage reached
    #[serde(flatten)]
    pub stage: PendingStage,
}

/// The ledger section of a single network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLedger {
    /// The chain ID the section was written against
    pub chain_id: u64,
    /// Deployed contracts by logical name
    #[serde(default)]
    pub contracts: BTreeMap<String, LedgerEntry>,
    /// Interrupted deployments by logical name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending: BTreeMap<String, PendingDeployment>,
}

impl NetworkLedger {
    /// An empty section for the given chain
    fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            contracts: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }
}

/// The full contents of the ledger file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    /// The file format version
    pub version: u32,
    /// Sections by network name
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkLedger>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            version: LEDGER_FORMAT_VERSION,
            networks: BTreeMap::new(),
        }
    }
}

impl Ledger {
    /// Read the ledger at `path`. A missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(LedgerError::Read(format!("{}: {e}", path.display()))),
        };

        serde_json::from_str(&contents).map_err(|e| LedgerError::Parse(e.to_string()))
    }

    /// The section of the given network, if any contract was ever deployed there
    pub fn network(&self, network: &str) -> Option<&NetworkLedger> {
        self.networks.get(network)
    }
}

/// An advisory lock excluding concurrent runs against the same ledger.
///
/// The lock file is created exclusively and removed when the lock is dropped.
#[derive(Debug)]
pub struct LedgerLock {
    /// The lock file
    path: PathBuf,
}

impl LedgerLock {
    /// Take the lock guarding the ledger at `ledger_path`
    pub fn acquire(ledger_path: &Path) -> Result<Self, LedgerError> {
        let path = lock_path(ledger_path);
        let mut file: File = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => LedgerError::Locked(path.clone()),
                _ => LedgerError::Write(format!("{}: {e}", path.display())),
            })?;

        // Best effort, the lock is the file's existence
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path })
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// The path of the lock file for the ledger at `ledger_path`
fn lock_path(ledger_path: &Path) -> PathBuf {
    let mut path: OsString = ledger_path.as_os_str().to_owned();
    path.push(".");
    path.push(LOCK_FILE_EXTENSION);
    PathBuf::from(path)
}

/// A locked, writable view of one network's section of the ledger
#[derive(Debug)]
pub struct LedgerStore {
    /// The ledger file
    path: PathBuf,
    /// The network this store reads and writes
    network: String,
    /// The in-memory ledger, identical to the file after every commit
    ledger: Ledger,
    /// Held for the lifetime of the store
    _lock: LedgerLock,
}

impl LedgerStore {
    /// Lock and load the ledger at `path` for `network`.
    ///
    /// Fails with [`LedgerError::ChainIdMismatch`] if the ledger records a different
    /// chain for the network than `chain_id`.
    pub fn open(
        path: impl Into<PathBuf>,
        network: &str,
        chain_id: u64,
    ) -> Result<Self, LedgerError> {
        let path = path.into();
        let lock = LedgerLock::acquire(&path)?;
        let mut ledger = Ledger::load(&path)?;

        let section = ledger
            .networks
            .entry(network.to_string())
            .or_insert_with(|| NetworkLedger::new(chain_id));
        if section.chain_id != chain_id {
            return Err(LedgerError::ChainIdMismatch {
                network: network.to_string(),
                recorded: section.chain_id,
                actual: chain_id,
            });
        }

        Ok(Self {
            path,
            network: network.to_string(),
            ledger,
            _lock: lock,
        })
    }

    /// The network this store is bound to
    pub fn network(&self) -> &str {
        &self.network
    }

    /// The entry recorded for `name` on this network
    pub fn entry(&self, name: &str) -> Option<&LedgerEntry> {
        self.section().and_then(|s| s.contracts.get(name))
    }

    /// The interrupted deployment recorded for `name`, if any
    pub fn pending(&self, name: &str) -> Option<&PendingDeployment> {
        self.section().and_then(|s| s.pending.get(name))
    }

    /// Commit a pending record for `name`, replacing any previous one
    pub fn set_pending(
        &mut self,
        name: &str,
        pending: PendingDeployment,
    ) -> Result<(), LedgerError> {
        self.section_mut().pending.insert(name.to_string(), pending);
        self.commit()
    }

    /// Discard the pending record for `name`
    pub fn clear_pending(&mut self, name: &str) -> Result<(), LedgerError> {
        if self.section_mut().pending.remove(name).is_some() {
            self.commit()?;
        }
        Ok(())
    }

    /// Commit the entry for `name`, clearing its pending record
    pub fn record(&mut self, name: &str, entry: LedgerEntry) -> Result<(), LedgerError> {
        let section = self.section_mut();
        section.pending.remove(name);
        section.contracts.insert(name.to_string(), entry);
        self.commit()
    }

    /// Point the entry for `name` at a new implementation and count the upgrade.
    ///
    /// The proxy address and initializer arguments are left untouched.
    pub fn update_implementation(
        &mut self,
        name: &str,
        implementation_address: Address,
        implementation_hash: B256,
    ) -> Result<LedgerEntry, LedgerError> {
        let network = self.network.clone();
        let entry = self
            .section_mut()
            .contracts
            .get_mut(name)
            .ok_or_else(|| LedgerError::Write(format!("no entry for `{name}` on `{network}`")))?;

        entry.implementation_address = implementation_address;
        entry.implementation_hash = implementation_hash;
        entry.upgrades += 1;
        let updated = entry.clone();

        self.commit()?;
        Ok(updated)
    }

    /// This network's section
    fn section(&self) -> Option<&NetworkLedger> {
        self.ledger.networks.get(&self.network)
    }

    /// This network's section, created by `open`
    fn section_mut(&mut self) -> &mut NetworkLedger {
        self.ledger
            .networks
            .entry(self.network.clone())
            .or_insert_with(|| NetworkLedger::new(0))
    }

    /// Atomically replace the ledger file with the in-memory ledger
    fn commit(&self) -> Result<(), LedgerError> {
        let contents = serde_json::to_string_pretty(&self.ledger)
            .map_err(|e| LedgerError::Parse(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| LedgerError::Write(e.to_string()))?;
        tmp.write_all(contents.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| LedgerError::Write(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| LedgerError::Write(e.to_string()))?;

        debug!("committed ledger to {}", self.path.display());
        Ok(())
    }
}
