//! Chain service: the store handle plus the executor.
//!
//! Both the HTTP API and the CLI go through this type.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::executor::Executor;
use super::result::ExecutionResult;
use super::transport::ReqwestTransport;
use crate::chain::{
    parse_chain, validate_chain_with_limit, ChainDefinition, ChainSummary, DependencyGraph,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::storage::{ChainStore, DatabaseHealth};

/// CRUD and execution over a [`ChainStore`].
#[derive(Clone)]
pub struct ChainService {
    store: Arc<dyn ChainStore>,
    executor: Executor,
    max_chain_length: Option<usize>,
}

impl ChainService {
    pub fn new(store: Arc<dyn ChainStore>, executor: Executor) -> Self {
        Self {
            store,
            executor,
            max_chain_length: None,
        }
    }

    /// Service with a `reqwest` transport built from engine settings.
    pub fn from_config(store: Arc<dyn ChainStore>, config: &EngineConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config)?);
        let executor = Executor::new(transport).with_max_chain_length(config.max_chain_length);
        Ok(Self::new(store, executor).with_max_chain_length(config.max_chain_length))
    }

    /// Server-wide cap on links per chain, enforced on create.
    pub fn with_max_chain_length(mut self, max: usize) -> Self {
        self.max_chain_length = Some(max);
        self
    }

    /// Validate a chain and resolve its dependency graph without storing it.
    pub fn resolve(&self, chain: &ChainDefinition) -> Result<DependencyGraph> {
        validate_chain_with_limit(chain, self.max_chain_length)?;
        DependencyGraph::build(chain)
    }

    /// Validate and store a chain. Returns its id.
    pub async fn create(&self, chain: ChainDefinition) -> Result<String> {
        self.resolve(&chain)?;
        self.store.insert_chain(&chain).await?;
        info!("Created chain '{}' ({} links)", chain.id, chain.links.len());
        Ok(chain.id)
    }

    /// Parse YAML or JSON chain text, then [`create`](Self::create) it.
    pub async fn create_from_text(&self, text: &str) -> Result<String> {
        let chain = parse_chain(text)?;
        self.create(chain).await
    }

    pub async fn get(&self, id: &str) -> Result<ChainDefinition> {
        self.store
            .get_chain(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    pub async fn list(&self) -> Result<Vec<ChainSummary>> {
        self.store.list_chains().await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.store.delete_chain(id).await? {
            info!("Deleted chain '{}'", id);
            Ok(())
        } else {
            Err(not_found(id))
        }
    }

    /// Execute a stored chain.
    ///
    /// The run works on its own copy of the definition, so deleting the chain
    /// meanwhile does not affect it. History is best effort.
    pub async fn execute(
        &self,
        id: &str,
        variables: HashMap<String, Value>,
    ) -> Result<ExecutionResult> {
        let chain = self.get(id).await?;
        let result = self.executor.execute(&chain, variables).await?;

        match self.store.save_execution(&result).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "Chain '{}' was deleted during execution {}; history not kept",
                id, result.execution_id
            ),
            Err(e) => warn!(
                "Failed to save execution {} of chain '{}': {}",
                result.execution_id, id, e
            ),
        }

        Ok(result)
    }

    /// Recent executions of a chain, newest first.
    pub async fn history(&self, id: &str, limit: usize) -> Result<Vec<ExecutionResult>> {
        if self.store.get_chain(id).await?.is_none() {
            return Err(not_found(id));
        }
        self.store.list_executions(id, limit).await
    }

    pub async fn health(&self) -> Result<DatabaseHealth> {
        self.store.check_health().await
    }
}

fn not_found(id: &str) -> Error {
    Error::NotFound(id.to_string())
}
