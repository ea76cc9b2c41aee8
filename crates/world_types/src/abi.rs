//! Contract Definitions - Declarative description of deployed contracts
//!
//! These types mirror the `contracts` section of a deployment manifest. The
//! contract proxy is generated from them at runtime, so their shape is the
//! only binding between the SDK and the contracts it calls.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// ABI Entries
// ─────────────────────────────────────────────────────────────────────────────

/// Whether a function mutates state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMutability {
    /// Mutating entry point, invoked through a transaction
    #[default]
    External,
    /// Read-only entry point
    View,
}

/// A named, typed function input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    /// Parameter name
    pub name: String,
    /// Fully qualified Cairo type (e.g. `dojo_starter::models::Direction`)
    #[serde(rename = "type")]
    pub ty: String,
}

impl AbiParam {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// A function output (outputs are unnamed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiOutput {
    #[serde(rename = "type")]
    pub ty: String,
}

/// A function declared in a contract ABI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionAbi {
    /// Function name
    pub name: String,
    /// Ordered input parameters
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    /// Output types
    #[serde(default)]
    pub outputs: Vec<AbiOutput>,
    /// Mutability of the function
    #[serde(default)]
    pub state_mutability: StateMutability,
}

impl FunctionAbi {
    /// Create an external function
    pub fn external(name: impl Into<String>, inputs: Vec<AbiParam>) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs: Vec::new(),
            state_mutability: StateMutability::External,
        }
    }

    /// Create a view function
    pub fn view(name: impl Into<String>, inputs: Vec<AbiParam>) -> Self {
        Self {
            state_mutability: StateMutability::View,
            ..Self::external(name, inputs)
        }
    }

    /// Whether the proxy exposes this function as a callable system
    pub fn is_callable(&self) -> bool {
        self.state_mutability == StateMutability::External
    }

    /// Input names in declaration order
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|p| p.name.as_str())
    }
}

/// One entry of a contract ABI
///
/// Only functions matter to the proxy; interfaces are walked for the
/// functions they contain and every other entry kind is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AbiEntry {
    Function(FunctionAbi),
    Interface {
        name: String,
        #[serde(default)]
        items: Vec<AbiEntry>,
    },
    #[serde(other)]
    Other,
}

// ─────────────────────────────────────────────────────────────────────────────
// Contract Definition
// ─────────────────────────────────────────────────────────────────────────────

/// A deployed contract: address, ABI and the tag used as proxy namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDefinition {
    /// Manifest kind (e.g. "DojoContract")
    #[serde(default)]
    pub kind: String,
    /// Deployed address
    pub address: String,
    /// Contract ABI
    #[serde(default)]
    pub abi: Vec<AbiEntry>,
    /// System names listed by the manifest
    #[serde(default)]
    pub systems: Vec<String>,
    /// Proxy namespace (e.g. "actions")
    pub tag: String,
}

impl ContractDefinition {
    /// Create a definition with an empty ABI
    pub fn new(tag: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            kind: "DojoContract".to_string(),
            address: address.into(),
            abi: Vec::new(),
            systems: Vec::new(),
            tag: tag.into(),
        }
    }

    /// Add a function to the ABI
    pub fn with_function(mut self, function: FunctionAbi) -> Self {
        if function.is_callable() {
            self.systems.push(function.name.clone());
        }
        self.abi.push(AbiEntry::Function(function));
        self
    }

    /// All functions in the ABI, including those nested in interfaces
    pub fn functions(&self) -> Vec<&FunctionAbi> {
        let mut out = Vec::new();
        collect_functions(&self.abi, &mut out);
        out
    }

    /// Get a function by name
    pub fn get_function(&self, name: &str) -> Option<&FunctionAbi> {
        self.functions().into_iter().find(|f| f.name == name)
    }

    /// Check that function names are unique within the ABI
    pub fn validate(&self) -> Result<(), AbiError> {
        if self.tag.is_empty() {
            return Err(AbiError::MissingTag(self.address.clone()));
        }
        let mut seen = BTreeSet::new();
        for function in self.functions() {
            if !seen.insert(function.name.as_str()) {
                return Err(AbiError::DuplicateFunction {
                    tag: self.tag.clone(),
                    function: function.name.clone(),
                });
            }
        }
        Ok(())
    }
}

fn collect_functions<'a>(entries: &'a [AbiEntry], out: &mut Vec<&'a FunctionAbi>) {
    for entry in entries {
        match entry {
            AbiEntry::Function(f) => out.push(f),
            AbiEntry::Interface { items, .. } => collect_functions(items, out),
            AbiEntry::Other => {}
        }
    }
}

/// Errors in contract definitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("duplicate function `{function}` in contract `{tag}`")]
    DuplicateFunction { tag: String, function: String },
    #[error("duplicate contract tag `{0}`")]
    DuplicateTag(String),
    #[error("contract at {0} has no tag")]
    MissingTag(String),
}
