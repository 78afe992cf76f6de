//! Chain type definitions.
//!
//! Wire keys are camelCase so the YAML/JSON shape matches what the
//! dashboard authors and reads back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A complete request chain definition.
///
/// # Example YAML
///
/// ```yaml
/// id: login-flow
/// name: Login flow
/// config:
///   enabled: true
///   maxChainLength: 10
///   globalTimeoutSecs: 30
///   enableParallelExecution: true
/// variables:
///   base_url: https://api.example.com
/// links:
///   - request:
///       id: login
///       method: POST
///       url: "{{base_url}}/login"
///       body:
///         user: demo
///     storeAs: auth_response
///     extract:
///       token: body.access_token
///   - request:
///       id: profile
///       method: GET
///       url: "{{base_url}}/me"
///       headers:
///         Authorization: "Bearer {{chain.auth_response.body.access_token}}"
///     dependsOn: [login]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDefinition {
    /// Unique chain identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// What this chain does
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Execution settings
    #[serde(default)]
    pub config: ChainConfig,

    /// Requests, in definition order
    pub links: Vec<RequestLink>,

    /// Chain-scoped constants available to every link
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,

    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Per-chain execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// Disabled chains are rejected at execution time
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of links this chain may hold
    #[serde(default = "default_max_chain_length")]
    pub max_chain_length: usize,

    /// Upper bound on the whole chain run
    #[serde(default = "default_global_timeout")]
    pub global_timeout_secs: u64,

    /// Run dependency-free links of the same layer concurrently
    #[serde(default)]
    pub enable_parallel_execution: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chain_length: default_max_chain_length(),
            global_timeout_secs: default_global_timeout(),
            enable_parallel_execution: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_chain_length() -> usize {
    20
}

fn default_global_timeout() -> u64 {
    300
}

/// One HTTP call within a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLink {
    /// The request to issue
    pub request: LinkRequest,

    /// Output variable name -> path expression evaluated on the response
    #[serde(default)]
    pub extract: HashMap<String, String>,

    /// Key the full response is stored under for `{{chain.<storeAs>.*}}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,

    /// Request ids that must succeed before this link runs
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Acceptable status codes; any 2xx when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<Vec<u16>>,
}

/// HTTP request template. Every string may contain `{{...}}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    /// Unique id within the chain
    pub id: String,

    /// HTTP method
    pub method: String,

    /// Request URL
    pub url: String,

    /// Request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Optional body: inline JSON, or a file sent as raw bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<LinkBody>,

    /// Timeout for this request alone, bounded by the chain deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Scripts run around this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripting: Option<LinkScripting>,
}

/// Request body.
///
/// A mapping with the single key `binaryFile` sends a file from disk;
/// anything else is sent as JSON.
///
/// ```yaml
/// body:
///   binaryFile:
///     path: "{{upload_dir}}/avatar.png"
///     contentType: image/png
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkBody {
    File(FileBody),
    Json(serde_json::Value),
}

/// The `{binaryFile: ...}` body form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileBody {
    pub binary_file: BinaryFile,
}

/// File sent verbatim as the request body. `path` may contain placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BinaryFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl From<serde_json::Value> for LinkBody {
    fn from(value: serde_json::Value) -> Self {
        LinkBody::Json(value)
    }
}

/// Rhai scripts run before and after a request.
///
/// Scripts read and write the `vars` map; new or changed entries become
/// variables for the rest of the run. A failing script is logged and does
/// not fail the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkScripting {
    /// Runs before placeholders are resolved, with `vars` and `request`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_script: Option<String>,

    /// Runs after a successful response, with `vars`, `request` and `response`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_script: Option<String>,

    /// Wall-clock limit for each script
    #[serde(default = "default_script_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_script_timeout_ms() -> u64 {
    5000
}

/// Listing projection of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub link_count: usize,
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RequestLink {
    /// Request id of this link.
    pub fn id(&self) -> &str {
        &self.request.id
    }

    /// Whether an HTTP status satisfies this link's expectation.
    pub fn accepts_status(&self, status: u16) -> bool {
        match &self.expected_status {
            Some(allowed) => allowed.contains(&status),
            None => (200..300).contains(&status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(id: &str) -> RequestLink {
        RequestLink {
            request: LinkRequest {
                id: id.to_string(),
                method: "GET".to_string(),
                url: "https://example.com".to_string(),
                headers: HashMap::new(),
                body: None,
                timeout_secs: None,
                scripting: None,
            },
            extract: HashMap::new(),
            store_as: None,
            depends_on: Vec::new(),
            expected_status: None,
        }
    }

    #[test]
    fn test_accepts_status_defaults_to_2xx() {
        let l = link("a");
        assert!(l.accepts_status(200));
        assert!(l.accepts_status(204));
        assert!(!l.accepts_status(302));
        assert!(!l.accepts_status(500));
    }

    #[test]
    fn test_accepts_status_allow_list() {
        let mut l = link("a");
        l.expected_status = Some(vec![201, 404]);
        assert!(l.accepts_status(404));
        assert!(!l.accepts_status(200));
    }

    #[test]
    fn test_body_forms() {
        let json: LinkBody = serde_json::from_value(serde_json::json!({"user": "demo"})).unwrap();
        assert_eq!(json, LinkBody::Json(serde_json::json!({"user": "demo"})));

        let file: LinkBody = serde_json::from_value(serde_json::json!({
            "binaryFile": {"path": "/tmp/a.bin", "contentType": "image/png"}
        }))
        .unwrap();
        assert_eq!(
            file,
            LinkBody::File(FileBody {
                binary_file: BinaryFile {
                    path: "/tmp/a.bin".into(),
                    content_type: Some("image/png".into()),
                }
            })
        );

        // Extra keys next to binaryFile mean an ordinary JSON body.
        let mixed: LinkBody = serde_json::from_value(serde_json::json!({
            "binaryFile": {"path": "/tmp/a.bin"},
            "note": "x"
        }))
        .unwrap();
        assert!(matches!(mixed, LinkBody::Json(_)));
    }

    #[test]
    fn test_scripting_timeout_default() {
        let scripting: LinkScripting =
            serde_json::from_value(serde_json::json!({"postScript": "vars.x = 1;"})).unwrap();
        assert_eq!(scripting.timeout_ms, 5000);
        assert!(scripting.pre_script.is_none());
    }
}
