//! Chain definition parser (YAML or JSON).

use std::path::Path;

use super::types::ChainDefinition;
use crate::error::{Error, Result};

/// Parse a chain from YAML or JSON text.
///
/// Text whose first non-whitespace character is `{` is treated as JSON,
/// everything else as YAML.
pub fn parse_chain(text: &str) -> Result<ChainDefinition> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Err(Error::Parse("Empty chain definition".to_string()));
    }

    if trimmed.starts_with('{') {
        parse_chain_json(text)
    } else {
        parse_chain_yaml(text)
    }
}

/// Parse a chain from a YAML string.
pub fn parse_chain_yaml(yaml: &str) -> Result<ChainDefinition> {
    serde_yaml::from_str(yaml).map_err(|e| parse_error("YAML", &e.to_string()))
}

/// Parse a chain from a JSON string.
pub fn parse_chain_json(json: &str) -> Result<ChainDefinition> {
    serde_json::from_str(json).map_err(|e| parse_error("JSON", &e.to_string()))
}

/// Parse a chain from a file path.
pub fn parse_chain_file(path: &Path) -> Result<ChainDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_chain(&content)
}

/// Serialize a chain back to its YAML form.
pub fn chain_to_yaml(chain: &ChainDefinition) -> Result<String> {
    Ok(serde_yaml::to_string(chain)?)
}

fn parse_error(format: &str, msg: &str) -> Error {
    if let Some(field) = extract_missing_field(msg) {
        Error::Parse(format!("Missing required field: {}", field))
    } else {
        Error::Parse(format!("Invalid {}: {}", format, msg))
    }
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::LinkBody;
    use serde_json::json;

    const LOGIN_CHAIN: &str = r#"
id: login-flow
name: Login flow
description: Authenticate then fetch the profile
config:
  enabled: true
  maxChainLength: 5
  globalTimeoutSecs: 30
  enableParallelExecution: true
variables:
  base_url: https://api.example.com
  retries: 3
tags: [auth, smoke]
links:
  - request:
      id: login
      method: POST
      url: "{{base_url}}/login"
      headers:
        Content-Type: application/json
      body:
        user: demo
        remember: true
    extract:
      token: body.access_token
    storeAs: auth_response
    expectedStatus: [200, 201]
  - request:
      id: profile
      method: GET
      url: "{{base_url}}/me"
      headers:
        Authorization: "Bearer {{chain.auth_response.body.access_token}}"
      timeoutSecs: 5
    dependsOn: [login]
"#;

    #[test]
    fn test_parse_yaml_chain() {
        let chain = parse_chain(LOGIN_CHAIN).unwrap();
        assert_eq!(chain.id, "login-flow");
        assert_eq!(chain.links.len(), 2);
        assert!(chain.config.enable_parallel_execution);
        assert_eq!(chain.config.max_chain_length, 5);
        assert_eq!(chain.variables["retries"], json!(3));
        assert_eq!(chain.links[0].store_as.as_deref(), Some("auth_response"));
        assert_eq!(chain.links[0].extract["token"], "body.access_token");
        assert_eq!(chain.links[0].expected_status, Some(vec![200, 201]));
        assert_eq!(
            chain.links[0].request.body,
            Some(LinkBody::Json(json!({"user": "demo", "remember": true})))
        );
        assert_eq!(chain.links[1].depends_on, vec!["login"]);
        assert_eq!(chain.links[1].request.timeout_secs, Some(5));
    }

    #[test]
    fn test_config_defaults_when_omitted() {
        let yaml = r#"
id: minimal
name: Minimal
links:
  - request:
      id: ping
      method: GET
      url: https://example.com/ping
"#;
        let chain = parse_chain(yaml).unwrap();
        assert!(chain.config.enabled);
        assert_eq!(chain.config.max_chain_length, 20);
        assert_eq!(chain.config.global_timeout_secs, 300);
        assert!(!chain.config.enable_parallel_execution);
        assert!(chain.tags.is_empty());
    }

    #[test]
    fn test_parse_json_chain() {
        let text = json!({
            "id": "json-chain",
            "name": "JSON chain",
            "links": [
                {"request": {"id": "a", "method": "GET", "url": "https://example.com"}}
            ]
        })
        .to_string();

        let chain = parse_chain(&text).unwrap();
        assert_eq!(chain.id, "json-chain");
        assert_eq!(chain.links[0].request.method, "GET");
    }

    #[test]
    fn test_yaml_round_trip_is_lossless() {
        let original = parse_chain(LOGIN_CHAIN).unwrap();
        let yaml = chain_to_yaml(&original).unwrap();
        assert!(yaml.contains("storeAs"));
        assert!(yaml.contains("dependsOn"));

        let reparsed = parse_chain(&yaml).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_parse_empty() {
        let err = parse_chain("   \n").unwrap_err();
        assert!(err.to_string().to_lowercase().contains("empty chain"));
    }

    #[test]
    fn test_parse_missing_field() {
        let yaml = r#"
id: no-name
links: []
"#;
        let err = parse_chain(yaml).unwrap_err();
        assert!(err.to_string().contains("Missing required field: name"));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = parse_chain("id: [broken").unwrap_err();
        assert!(err.to_string().contains("Invalid YAML"));
    }
}
