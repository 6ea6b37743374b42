//! The contract factory registry, producing creation code and calldata from compiled artifacts.
//!
//! Artifacts are read from the build output directory as produced by Hardhat
//! (`artifacts/contracts/Foo.sol/Foo.json`, `bytecode` is a hex string) or Foundry
//! (`out/Foo.sol/Foo.json`, `bytecode` is an object with an `object` field). Nothing is
//! compiled here.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi, Param},
    primitives::{Address, Bytes},
};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::{
    constants::{ARTIFACT_EXTENSION, INITIALIZER_FN_NAME},
    errors::ArtifactError,
};

/// The `bytecode` field of an artifact file
#[derive(Deserialize)]
#[serde(untagged)]
enum BytecodeField {
    /// Hardhat's form
    Hex(Bytes),
    /// Foundry's form
    Object {
        /// The hex-encoded creation code
        object: Bytes,
    },
}

/// The subset of an artifact file used by the scripts
#[derive(Deserialize)]
struct ArtifactFile {
    /// The contract ABI
    abi: JsonAbi,
    /// The creation code
    bytecode: BytecodeField,
}

/// A compiled contract: its ABI and creation code
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    /// The artifact name
    pub name: String,
    /// The contract ABI
    pub abi: JsonAbi,
    /// The creation code, without constructor arguments
    pub bytecode: Bytes,
}

impl ContractArtifact {
    /// Parse an artifact from the JSON contents of an artifact file
    pub fn from_json(name: &str, contents: &str) -> Result<Self, ArtifactError> {
        let file: ArtifactFile =
            serde_json::from_str(contents).map_err(|e| ArtifactError::Parse {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let bytecode = match file.bytecode {
            BytecodeField::Hex(b) | BytecodeField::Object { object: b } => b,
        };
        if bytecode.is_empty() {
            return Err(ArtifactError::Parse {
                name: name.to_string(),
                reason: "empty bytecode, is the contract abstract?".to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            abi: file.abi,
            bytecode,
        })
    }
}

/// The registry of compiled artifacts available to a run
#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    /// The build output directory, searched recursively on lookup
    dir: Option<PathBuf>,
    /// Artifacts registered directly, consulted before the directory
    preloaded: HashMap<String, ContractArtifact>,
}

impl ArtifactRegistry {
    /// A registry reading artifacts from the given build output directory
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            preloaded: HashMap::new(),
        }
    }

    /// Register an artifact directly, shadowing any file of the same name
    pub fn insert(&mut self, artifact: ContractArtifact) {
        self.preloaded.insert(artifact.name.clone(), artifact);
    }

    /// Get a factory for the named contract
    pub fn factory(&self, name: &str) -> Result<ContractFactory, ArtifactError> {
        if let Some(artifact) = self.preloaded.get(name) {
            return Ok(ContractFactory {
                artifact: artifact.clone(),
            });
        }

        let dir = self
            .dir
            .as_deref()
            .ok_or_else(|| ArtifactError::NotFound(name.to_string()))?;
        let path = find_artifact_file(dir, name)?;
        let contents = fs::read_to_string(&path).map_err(|e| ArtifactError::Read {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        Ok(ContractFactory {
            artifact: ContractArtifact::from_json(name, &contents)?,
        })
    }
}

/// Find `<name>.json` anywhere beneath `dir`. Hardhat's `<name>.dbg.json` never matches.
fn find_artifact_file(dir: &Path, name: &str) -> Result<PathBuf, ArtifactError> {
    let file_name = format!("{name}.{ARTIFACT_EXTENSION}");
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .find(|path| {
            path.file_name()
                .is_some_and(|f| f.to_string_lossy() == file_name)
        })
        .ok_or_else(|| ArtifactError::NotFound(name.to_string()))
}

/// A handle able to produce creation code for new instances of a contract
#[derive(Debug, Clone)]
pub struct ContractFactory {
    /// The underlying artifact
    artifact: ContractArtifact,
}

impl ContractFactory {
    /// Creation code with constructor arguments coerced from their textual form
    pub fn deploy_code(&self, args: &[String]) -> Result<Bytes, ArtifactError> {
        let params = self
            .artifact
            .abi
            .constructor()
            .map(|c| c.inputs.as_slice())
            .unwrap_or_default();
        let values = self.coerce_args(params, args)?;
        self.deploy_code_with(&values)
    }

    /// Creation code with already-typed constructor arguments
    pub fn deploy_code_with(&self, values: &[DynSolValue]) -> Result<Bytes, ArtifactError> {
        let encoded_args = match self.artifact.abi.constructor() {
            Some(constructor) => constructor
                .abi_encode_input(values)
                .map_err(|e| self.encoding_error(e))?,
            None if values.is_empty() => Vec::new(),
            None => {
                return Err(ArtifactError::ArgumentCount {
                    name: self.artifact.name.clone(),
                    expected: 0,
                    got: values.len(),
                })
            }
        };

        let mut code = self.artifact.bytecode.to_vec();
        code.extend(encoded_args);
        Ok(code.into())
    }

    /// Calldata for the contract's `initialize` method.
    ///
    /// A contract without an initializer may only be deployed with an empty argument
    /// list, in which case the proxy is constructed with empty calldata.
    pub fn initializer_calldata(&self, args: &[String]) -> Result<Bytes, ArtifactError> {
        let has_initializer = self.artifact.abi.function(INITIALIZER_FN_NAME).is_some();
        if !has_initializer && args.is_empty() {
            return Ok(Bytes::new());
        }

        let func = self.find_function(INITIALIZER_FN_NAME, args.len())?;
        let values = self.coerce_args(&func.inputs, args)?;
        self.encode_function(func, &values)
    }

    /// Attach to an existing instance of the contract
    pub fn attach(&self, address: Address) -> ContractHandle<'_> {
        ContractHandle {
            address,
            factory: self,
        }
    }

    /// Coerce textual arguments into the given ABI parameter types
    fn coerce_args(
        &self,
        params: &[Param],
        args: &[String],
    ) -> Result<Vec<DynSolValue>, ArtifactError> {
        if params.len() != args.len() {
            return Err(ArtifactError::ArgumentCount {
                name: self.artifact.name.clone(),
                expected: params.len(),
                got: args.len(),
            });
        }

        params
            .iter()
            .zip(args)
            .map(|(param, arg)| {
                let ty: DynSolType = param.resolve().map_err(|e| self.encoding_error(e))?;
                ty.coerce_str(arg).map_err(|e| self.encoding_error(e))
            })
            .collect()
    }

    /// Find the overload of `function` with the given arity
    fn find_function(&self, function: &str, arity: usize) -> Result<&Function, ArtifactError> {
        self.artifact
            .abi
            .function(function)
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == arity))
            .ok_or_else(|| ArtifactError::UnknownFunction {
                name: self.artifact.name.clone(),
                function: function.to_string(),
                arity,
            })
    }

    /// Encode a call to `func` with typed arguments
    fn encode_function(
        &self,
        func: &Function,
        values: &[DynSolValue],
    ) -> Result<Bytes, ArtifactError> {
        func.abi_encode_input(values)
            .map(Bytes::from)
            .map_err(|e| self.encoding_error(e))
    }

    /// Wrap an ABI failure with the artifact name
    fn encoding_error(&self, e: impl ToString) -> ArtifactError {
        ArtifactError::Encoding {
            name: self.artifact.name.clone(),
            reason: e.to_string(),
        }
    }
}

/// A contract attached at a known address
#[derive(Debug, Clone, Copy)]
pub struct ContractHandle<'a> {
    /// The contract's address
    pub address: Address,
    /// The factory the handle was attached from
    factory: &'a ContractFactory,
}

impl ContractHandle<'_> {
    /// Encode a call to the overload of `function` taking `args.len()` typed arguments
    pub fn encode_call(
        &self,
        function: &str,
        args: &[DynSolValue],
    ) -> Result<Bytes, ArtifactError> {
        let func = self.factory.find_function(function, args.len())?;
        self.factory.encode_function(func, args)
    }
}
