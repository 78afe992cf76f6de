//! Storage layer for chains and their execution history.

mod models;
mod sqlite;

use async_trait::async_trait;

use crate::chain::{ChainDefinition, ChainSummary};
use crate::engine::ExecutionResult;
use crate::error::Result;

pub use models::*;
pub use sqlite::SqliteStorage;

/// Durable chain store.
///
/// Passed explicitly into the service layer so tests can swap the backing
/// database.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Insert a new chain. Fails with `Error::Conflict` when the id exists.
    async fn insert_chain(&self, chain: &ChainDefinition) -> Result<()>;

    async fn get_chain(&self, id: &str) -> Result<Option<ChainDefinition>>;

    /// Summaries of every chain, ordered by id.
    async fn list_chains(&self) -> Result<Vec<ChainSummary>>;

    /// Remove a chain and its history. Returns whether it existed.
    async fn delete_chain(&self, id: &str) -> Result<bool>;

    /// Persist a finished execution. Returns `false` when the chain was
    /// deleted while the execution was running.
    async fn save_execution(&self, result: &ExecutionResult) -> Result<bool>;

    /// Most recent executions of a chain, newest first.
    async fn list_executions(&self, chain_id: &str, limit: usize) -> Result<Vec<ExecutionResult>>;

    async fn check_health(&self) -> Result<DatabaseHealth>;
}
