//! World Loader
//!
//! Loads the schema and the deployed contract definitions from disk.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info};
use world_types::{AbiError, ContractDefinition, Schema, SchemaError};

/// Error type for world loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Unsupported file format: {0} (expected .toml or .json)")]
    UnsupportedFormat(PathBuf),

    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Invalid schema: {0}")]
    InvalidSchema(#[from] SchemaError),

    #[error("Invalid contract definition: {0}")]
    InvalidContract(#[from] AbiError),
}

/// Deployment manifest: either the full manifest or a bare contract list
#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Manifest { contracts: Vec<ContractDefinition> },
    Bare(Vec<ContractDefinition>),
}

/// World loader
pub struct WorldLoader;

impl WorldLoader {
    /// Load a schema from a `.toml` or `.json` file
    pub async fn load_schema(path: impl AsRef<Path>) -> Result<Schema, LoadError> {
        let path = path.as_ref();
        let content = Self::read(path).await?;

        let schema: Schema = match extension(path) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => return Err(LoadError::UnsupportedFormat(path.to_path_buf())),
        };
        schema.validate()?;

        info!("Loaded schema with {} models from {}", schema.len(), path.display());
        Ok(schema)
    }

    /// Load contract definitions from a deployment manifest
    pub async fn load_contracts(path: impl AsRef<Path>) -> Result<Vec<ContractDefinition>, LoadError> {
        let path = path.as_ref();
        let content = Self::read(path).await?;
        let contracts = Self::parse_contracts(&content)?;

        info!("Loaded {} contracts from {}", contracts.len(), path.display());
        Ok(contracts)
    }

    /// Parse contract definitions from manifest JSON
    pub fn parse_contracts(json: &str) -> Result<Vec<ContractDefinition>, LoadError> {
        let contracts = match serde_json::from_str(json)? {
            ManifestFile::Manifest { contracts } => contracts,
            ManifestFile::Bare(contracts) => contracts,
        };
        for contract in &contracts {
            contract.validate()?;
            debug!("Loaded contract: {} ({} functions)", contract.tag, contract.functions().len());
        }
        Ok(contracts)
    }

    async fn read(path: &Path) -> Result<String, LoadError> {
        if !path.exists() {
            return Err(LoadError::PathNotFound(path.to_path_buf()));
        }
        Ok(fs::read_to_string(path).await?)
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}
