//! Structural validation of chain definitions.
//!
//! Every violation is collected so authors can fix a definition in one pass.
//! Dependency references and cycles are checked by the resolver in
//! [`super::dag`], not here.

use std::collections::HashSet;

use super::types::{ChainDefinition, LinkBody};
use crate::error::{Error, Result};

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Upper bound for `globalTimeoutSecs` (one day).
const MAX_GLOBAL_TIMEOUT_SECS: u64 = 86_400;

/// Validate a chain definition against its own `maxChainLength`.
pub fn validate_chain(chain: &ChainDefinition) -> Result<()> {
    validate_chain_with_limit(chain, None)
}

/// Validate a chain definition, additionally enforcing a server-wide cap on
/// the number of links.
pub fn validate_chain_with_limit(chain: &ChainDefinition, max_links: Option<usize>) -> Result<()> {
    let violations = collect_violations(chain, max_links);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(violations))
    }
}

fn collect_violations(chain: &ChainDefinition, max_links: Option<usize>) -> Vec<String> {
    let mut violations = Vec::new();

    if chain.id.trim().is_empty() {
        violations.push("Chain id is required".to_string());
    } else if !chain
        .id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        violations.push(format!(
            "Chain id '{}' must contain only alphanumeric characters, hyphens, and underscores",
            chain.id
        ));
    }

    if chain.name.trim().is_empty() {
        violations.push("Chain name is required".to_string());
    }

    if chain.links.is_empty() {
        violations.push("Chain must have at least one link".to_string());
    }

    if chain.links.len() > chain.config.max_chain_length {
        violations.push(format!(
            "Chain length {} exceeds maxChainLength {}",
            chain.links.len(),
            chain.config.max_chain_length
        ));
    }

    if let Some(cap) = max_links {
        if chain.links.len() > cap {
            violations.push(format!(
                "Chain length {} exceeds server limit {}",
                chain.links.len(),
                cap
            ));
        }
    }

    if chain.config.global_timeout_secs == 0 {
        violations.push("globalTimeoutSecs must be greater than zero".to_string());
    } else if chain.config.global_timeout_secs > MAX_GLOBAL_TIMEOUT_SECS {
        violations.push(format!(
            "globalTimeoutSecs {} exceeds the maximum of {}",
            chain.config.global_timeout_secs, MAX_GLOBAL_TIMEOUT_SECS
        ));
    }

    // storeAs keys and request ids share the `chain.<key>` namespace
    let request_ids: HashSet<&str> = chain
        .links
        .iter()
        .map(|l| l.request.id.as_str())
        .collect();

    let mut ids = HashSet::new();
    let mut store_keys = HashSet::new();

    for (index, link) in chain.links.iter().enumerate() {
        let request = &link.request;
        let label = if request.id.is_empty() {
            format!("links[{}]", index)
        } else {
            format!("Link '{}'", request.id)
        };

        if request.id.trim().is_empty() {
            violations.push(format!("links[{}] request id is required", index));
        } else if !ids.insert(request.id.as_str()) {
            violations.push(format!("Duplicate request id: {}", request.id));
        }

        if !HTTP_METHODS.contains(&request.method.to_uppercase().as_str()) {
            violations.push(format!(
                "{} has unsupported HTTP method '{}'",
                label, request.method
            ));
        }

        if request.url.trim().is_empty() {
            violations.push(format!("{} has an empty url", label));
        }

        if request.timeout_secs == Some(0) {
            violations.push(format!("{} timeoutSecs must be greater than zero", label));
        }

        if let Some(store_as) = &link.store_as {
            if store_as.trim().is_empty() {
                violations.push(format!("{} has an empty storeAs", label));
            } else if store_as.contains('.') {
                violations.push(format!(
                    "{} storeAs '{}' must not contain '.'",
                    label, store_as
                ));
            } else if !store_keys.insert(store_as.as_str()) {
                violations.push(format!("Duplicate storeAs key: {}", store_as));
            }

            if *store_as != request.id && request_ids.contains(store_as.as_str()) {
                violations.push(format!(
                    "{} storeAs '{}' collides with the request id of another link",
                    label, store_as
                ));
            }
        }

        if let Some(LinkBody::File(file)) = &request.body {
            if file.binary_file.path.trim().is_empty() {
                violations.push(format!("{} binaryFile has an empty path", label));
            }
        }

        if let Some(scripting) = &request.scripting {
            if scripting.timeout_ms == 0 {
                violations.push(format!(
                    "{} scripting timeoutMs must be greater than zero",
                    label
                ));
            }
        }

        if let Some(expected) = &link.expected_status {
            if expected.is_empty() {
                violations.push(format!("{} has an empty expectedStatus list", label));
            }
            for status in expected {
                if !(100..=599).contains(status) {
                    violations.push(format!(
                        "{} expects invalid HTTP status {}",
                        label, status
                    ));
                }
            }
        }

        let mut extract_names: Vec<&String> = link.extract.keys().collect();
        extract_names.sort();
        for name in extract_names {
            if name.trim().is_empty() {
                violations.push(format!("{} has an extract entry with an empty name", label));
            }
            if link.extract[name].trim().is_empty() {
                violations.push(format!(
                    "{} extract '{}' has an empty path expression",
                    label, name
                ));
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::parse_chain;

    #[test]
    fn test_valid_chain() {
        let yaml = r#"
id: valid-chain
name: Valid
links:
  - request:
      id: a
      method: get
      url: https://example.com/a
  - request:
      id: b
      method: POST
      url: https://example.com/b
    dependsOn: [a]
    expectedStatus: [201]
"#;
        let chain = parse_chain(yaml).unwrap();
        assert!(validate_chain(&chain).is_ok());
    }

    #[test]
    fn test_collects_every_violation() {
        let yaml = r#"
id: "bad id!"
name: ""
config:
  maxChainLength: 1
links:
  - request:
      id: a
      method: FETCH
      url: ""
  - request:
      id: a
      method: GET
      url: https://example.com
    expectedStatus: [42]
"#;
        let chain = parse_chain(yaml).unwrap();
        let err = validate_chain(&chain).unwrap_err();

        let Error::Validation(violations) = err else {
            panic!("expected validation error");
        };
        let joined = violations.join("\n");
        assert!(joined.contains("alphanumeric"));
        assert!(joined.contains("name is required"));
        assert!(joined.contains("exceeds maxChainLength 1"));
        assert!(joined.contains("unsupported HTTP method 'FETCH'"));
        assert!(joined.contains("empty url"));
        assert!(joined.contains("Duplicate request id: a"));
        assert!(joined.contains("invalid HTTP status 42"));
        assert!(violations.len() >= 7);
    }

    #[test]
    fn test_empty_links() {
        let yaml = r#"
id: empty
name: Empty
links: []
"#;
        let chain = parse_chain(yaml).unwrap();
        let err = validate_chain(&chain).unwrap_err();
        assert!(err.to_string().contains("at least one link"));
    }

    #[test]
    fn test_server_cap() {
        let yaml = r#"
id: capped
name: Capped
links:
  - request: {id: a, method: GET, url: "https://example.com/a"}
  - request: {id: b, method: GET, url: "https://example.com/b"}
"#;
        let chain = parse_chain(yaml).unwrap();
        assert!(validate_chain(&chain).is_ok());
        let err = validate_chain_with_limit(&chain, Some(1)).unwrap_err();
        assert!(err.to_string().contains("server limit 1"));
    }

    #[test]
    fn test_duplicate_store_as() {
        let yaml = r#"
id: dup-store
name: Dup
links:
  - request: {id: a, method: GET, url: "https://example.com/a"}
    storeAs: resp
  - request: {id: b, method: GET, url: "https://example.com/b"}
    storeAs: resp
"#;
        let chain = parse_chain(yaml).unwrap();
        let err = validate_chain(&chain).unwrap_err();
        assert!(err.to_string().contains("Duplicate storeAs key: resp"));
    }

    #[test]
    fn test_store_as_colliding_with_other_request_id() {
        let yaml = r#"
id: shadow
name: Shadow
links:
  - request: {id: first, method: GET, url: "https://example.com/1"}
    storeAs: second
  - request: {id: second, method: GET, url: "https://example.com/2"}
  - request: {id: third, method: GET, url: "https://example.com/3"}
    storeAs: third
"#;
        let chain = parse_chain(yaml).unwrap();
        let Error::Validation(violations) = validate_chain(&chain).unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(
            violations,
            vec!["Link 'first' storeAs 'second' collides with the request id of another link"]
        );
    }

    #[test]
    fn test_store_as_with_dot_is_rejected() {
        let yaml = r#"
id: dotted
name: Dotted
links:
  - request: {id: a, method: GET, url: "https://example.com/a"}
    storeAs: auth.response
"#;
        let chain = parse_chain(yaml).unwrap();
        let err = validate_chain(&chain).unwrap_err();
        assert!(err
            .to_string()
            .contains("storeAs 'auth.response' must not contain '.'"));
    }

    #[test]
    fn test_global_timeout_upper_bound() {
        let yaml = r#"
id: forever
name: Forever
config:
  globalTimeoutSecs: 18446744073709551615
links:
  - request: {id: a, method: GET, url: "https://example.com/a"}
"#;
        let mut chain = parse_chain(yaml).unwrap();
        let err = validate_chain(&chain).unwrap_err();
        assert!(err.to_string().contains("exceeds the maximum of 86400"));

        chain.config.global_timeout_secs = MAX_GLOBAL_TIMEOUT_SECS;
        assert!(validate_chain(&chain).is_ok());
    }

    #[test]
    fn test_body_file_and_script_settings() {
        let yaml = r#"
id: settings
name: Settings
links:
  - request:
      id: upload
      method: PUT
      url: "https://example.com/upload"
      body:
        binaryFile: {path: " "}
      scripting:
        postScript: "vars.done = true;"
        timeoutMs: 0
"#;
        let chain = parse_chain(yaml).unwrap();
        let err = validate_chain(&chain).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("binaryFile has an empty path"));
        assert!(msg.contains("scripting timeoutMs must be greater than zero"));
    }
}
