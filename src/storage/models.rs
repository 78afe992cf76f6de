//! Storage models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored chain record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChain {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub definition: String, // YAML
    pub link_count: usize,
    pub enabled: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Database health summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub integrity_check: String,
    pub journal_mode: String,
    pub busy_timeout_ms: i64,
    pub chain_count: u64,
    pub execution_count: u64,
}

impl DatabaseHealth {
    pub fn is_ok(&self) -> bool {
        self.integrity_check == "ok"
    }
}
