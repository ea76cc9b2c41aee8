//! World Client
//!
//! `init` wires a backend, an account and the contract definitions into a
//! `WorldSdk`: the caller-facing surface for queries, live subscriptions and
//! system calls.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use world_query::{
    Account, Backend, BackendError, Callback, MemoryBackend, Query, QueryCompiler, QueryResult,
    ResultDecoder, SdkResult, SubscriptionHandle, SubscriptionManager, WorldProxy,
};
use world_types::{AbiError, ContractDefinition, Schema};

use crate::config::{ClientConfig, ConfigError};

/// A backend that can be opened from client configuration
#[async_trait]
pub trait Connect: Backend + Sized {
    async fn connect(config: &ClientConfig, schema: Arc<Schema>) -> Result<Self, BackendError>;
}

#[async_trait]
impl Connect for MemoryBackend {
    async fn connect(config: &ClientConfig, schema: Arc<Schema>) -> Result<Self, BackendError> {
        debug!(world_address = %config.world_address, "Opening in-memory backend");
        Ok(MemoryBackend::new(schema))
    }
}

/// Error type for client initialization
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to connect: {0}")]
    Backend(#[from] BackendError),

    #[error("Invalid contract definitions: {0}")]
    Abi(#[from] AbiError),
}

/// Connect a backend of type `B` and build the client
pub async fn init<B: Connect>(
    config: ClientConfig,
    schema: Schema,
    contracts: &[ContractDefinition],
    account: Arc<dyn Account>,
) -> Result<WorldSdk, InitError> {
    config.validate()?;
    let schema = Arc::new(schema);
    let backend = B::connect(&config, Arc::clone(&schema)).await?;
    Ok(WorldSdk::with_backend(config, schema, Arc::new(backend), contracts, account)?)
}

/// Client for one world
pub struct WorldSdk {
    config: ClientConfig,
    schema: Arc<Schema>,
    backend: Arc<dyn Backend>,
    compiler: QueryCompiler,
    decoder: ResultDecoder,
    subscriptions: SubscriptionManager,
    proxy: WorldProxy,
}

impl WorldSdk {
    /// Build a client over an already connected backend
    pub fn with_backend(
        config: ClientConfig,
        schema: Arc<Schema>,
        backend: Arc<dyn Backend>,
        contracts: &[ContractDefinition],
        account: Arc<dyn Account>,
    ) -> Result<Self, AbiError> {
        let proxy = WorldProxy::build(contracts, account)?;
        let decoder = ResultDecoder::new(Arc::clone(&schema));
        let subscriptions = SubscriptionManager::new(Arc::clone(&backend), decoder.clone());

        info!(
            world_address = %config.world_address,
            models = schema.len(),
            contracts = contracts.len(),
            "World client ready"
        );

        Ok(Self {
            compiler: QueryCompiler::new(Arc::clone(&schema)),
            config,
            schema,
            backend,
            decoder,
            subscriptions,
            proxy,
        })
    }

    /// Subscribe to live updates of a query
    ///
    /// The query is compiled first; a malformed query is returned as an
    /// error and nothing is registered with the backend.
    pub fn subscribe_query(&self, query: &Query, callback: Callback) -> SdkResult<SubscriptionHandle> {
        let descriptor = self.compiler.compile(query)?;
        Ok(self.subscriptions.subscribe(descriptor, callback))
    }

    /// Fetch the current result of a query once
    ///
    /// `callback` receives the same outcome that is returned.
    pub async fn get_entities<F>(&self, query: &Query, callback: F) -> SdkResult<QueryResult>
    where
        F: FnOnce(SdkResult<QueryResult>) + Send,
    {
        let result = self.fetch(query).await;
        callback(result.clone());
        result
    }

    async fn fetch(&self, query: &Query) -> SdkResult<QueryResult> {
        let descriptor = self.compiler.compile(query)?;
        let payload = self.backend.fetch(&descriptor).await?;
        Ok(self.decoder.decode(&descriptor, &payload)?)
    }

    /// Callable systems of every deployed contract
    pub fn world_proxy(&self) -> &WorldProxy {
        &self.proxy
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Live subscriptions of this client
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Close every subscription and release its backend registration
    pub async fn shutdown(&self) -> usize {
        let closed = self.subscriptions.shutdown_all().await;
        info!(closed, "World client shut down");
        closed
    }
}

impl std::fmt::Debug for WorldSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldSdk")
            .field("world_address", &self.config.world_address)
            .field("models", &self.schema.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
