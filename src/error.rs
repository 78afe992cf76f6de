//! Error types for reqchain.
//!
//! Structural errors (validation, graph problems, unknown chains) carry the
//! offending ids so callers can render a single `{kind, message, details}`
//! object. Per-link runtime failures never surface here; they are recorded
//! in the link's result instead.

use serde_json::json;
use thiserror::Error;

/// Result type alias for reqchain operations.
pub type Result<T> = std::result::Result<T, Error>;

/// reqchain error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Chain '{0}' already exists")]
    Conflict(String),

    #[error("Chain '{0}' not found")]
    NotFound(String),

    #[error("Circular dependency detected involving links: {}", .links.join(" -> "))]
    CyclicDependency { links: Vec<String> },

    #[error("Link '{link}' depends on '{dependency}' which does not exist in the chain")]
    UnknownDependency { link: String, dependency: String },

    #[error("Unresolved variable '{{{{{placeholder}}}}}': {reason}")]
    UnresolvedVariable { placeholder: String, reason: String },

    #[error("Chain '{0}' is disabled")]
    ChainDisabled(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Convenience constructor for a single validation violation.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(vec![msg.into()])
    }

    /// Get the error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Conflict(_) => "CONFLICT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::CyclicDependency { .. } => "CYCLIC_DEPENDENCY",
            Error::UnknownDependency { .. } => "UNKNOWN_DEPENDENCY",
            Error::UnresolvedVariable { .. } => "UNRESOLVED_VARIABLE",
            Error::ChainDisabled(_) => "CHAIN_DISABLED",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Script(_) => "SCRIPT_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// HTTP status code the API should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_)
            | Error::UnknownDependency { .. }
            | Error::Parse(_)
            | Error::Yaml(_)
            | Error::Json(_) => 400,
            Error::NotFound(_) => 404,
            Error::Conflict(_) | Error::ChainDisabled(_) => 409,
            Error::CyclicDependency { .. } => 422,
            Error::UnresolvedVariable { .. }
            | Error::Storage(_)
            | Error::Config(_)
            | Error::Script(_)
            | Error::Internal(_)
            | Error::Http(_)
            | Error::Database(_)
            | Error::Io(_) => 500,
        }
    }

    /// Ids or violation messages that explain the error.
    pub fn details(&self) -> Vec<String> {
        match self {
            Error::Validation(violations) => violations.clone(),
            Error::CyclicDependency { links } => links.clone(),
            Error::UnknownDependency { link, dependency } => {
                vec![link.clone(), dependency.clone()]
            }
            Error::NotFound(id) | Error::Conflict(id) | Error::ChainDisabled(id) => {
                vec![id.clone()]
            }
            Error::UnresolvedVariable { placeholder, .. } => vec![placeholder.clone()],
            _ => Vec::new(),
        }
    }

    /// Get a sanitized error message safe for external consumers.
    ///
    /// Hides file paths, SQL statements and similar internals.
    pub fn external_message(&self) -> String {
        match self {
            Error::Storage(_) => "A storage error occurred".to_string(),
            Error::Internal(_) => "An internal error occurred".to_string(),
            Error::Database(_) => "A database error occurred".to_string(),
            Error::Io(_) => "An I/O error occurred".to_string(),
            Error::Config(_) => "A configuration error occurred".to_string(),
            Error::Http(e) => {
                if let Some(status) = e.status() {
                    format!("HTTP request failed with status {}", status.as_u16())
                } else if e.is_timeout() {
                    "HTTP request timed out".to_string()
                } else if e.is_connect() {
                    "Failed to connect to remote server".to_string()
                } else {
                    "HTTP request failed".to_string()
                }
            }
            Error::Yaml(e) => format!("Invalid YAML: {}", e),
            Error::Json(e) => format!("Invalid JSON: {}", e),
            _ => self.to_string(),
        }
    }

    /// Convert to the JSON error body returned by the API (sanitized).
    pub fn to_external_json(&self) -> serde_json::Value {
        json!({
            "error": {
                "code": self.code(),
                "message": self.external_message(),
                "details": self.details(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_lists_every_violation() {
        let err = Error::Validation(vec!["a is bad".into(), "b is bad".into()]);
        let msg = err.to_string();
        assert!(msg.contains("a is bad"));
        assert!(msg.contains("b is bad"));
        assert_eq!(err.details().len(), 2);
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_cycle_error_names_links() {
        let err = Error::CyclicDependency {
            links: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.code(), "CYCLIC_DEPENDENCY");
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_unresolved_variable_message() {
        let err = Error::UnresolvedVariable {
            placeholder: "chain.auth.body.token".into(),
            reason: "no stored response 'auth'".into(),
        };
        assert!(err
            .to_string()
            .contains("{{chain.auth.body.token}}"));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn test_external_json_hides_storage_details() {
        let err = Error::Storage("/var/lib/secret.db is locked".into());
        let body = err.to_external_json();
        assert_eq!(body["error"]["code"], "STORAGE_ERROR");
        assert!(!body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("secret.db"));
    }

    #[test]
    fn test_not_found_details() {
        let err = Error::NotFound("login-flow".into());
        let body = err.to_external_json();
        assert_eq!(body["error"]["details"][0], "login-flow");
        assert_eq!(err.http_status(), 404);
    }
}
