//! Outbound HTTP for chain links.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// A link request with every placeholder resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub link_id: String,
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<ResolvedBody>,
}

/// Request body after placeholder resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedBody {
    Json(Value),
    /// Read from disk when the request is sent
    File {
        path: String,
        content_type: Option<String>,
    },
}

/// Captured response of a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON, or the raw text as a string when the body is not JSON
    pub body: Value,
    pub duration_ms: u64,
    pub executed_at: DateTime<Utc>,
}

impl ChainResponse {
    /// JSON view used for `{{chain.<key>.*}}` references and extraction.
    pub fn to_value(&self) -> Value {
        json!({
            "status": self.status,
            "headers": self.headers,
            "body": self.body,
            "durationMs": self.duration_ms,
            "executedAt": self.executed_at.to_rfc3339(),
        })
    }
}

/// Parse a response body, keeping non-JSON text as a string.
pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Sends resolved link requests.
///
/// Timeouts are applied by the caller; dropping the returned future cancels
/// the call.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ResolvedRequest) -> Result<ChainResponse>;
}

/// [`HttpTransport`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ResolvedRequest) -> Result<ChainResponse> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| Error::validation(format!("Unknown HTTP method: {}", request.method)))?;

        debug!("HTTP {} {}", method, request.url);

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        match &request.body {
            Some(ResolvedBody::Json(body)) => builder = builder.json(body),
            Some(ResolvedBody::File { path, content_type }) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    Error::Io(std::io::Error::new(
                        e.kind(),
                        format!("failed to read body file '{}': {}", path, e),
                    ))
                })?;
                if let Some(content_type) = content_type {
                    builder = builder.header(CONTENT_TYPE, content_type);
                }
                builder = builder.body(bytes);
            }
            None => {}
        }

        let executed_at = Utc::now();
        let start = Instant::now();
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = value.to_str().unwrap_or("").to_string();
            headers
                .entry(name.to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let text = response.text().await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(ChainResponse {
            status,
            headers,
            body: parse_body(&text),
            duration_ms,
            executed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::Json;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;

    async fn spawn_server() -> String {
        let app = Router::new()
            .route(
                "/login",
                post(|Json(body): Json<Value>| async move {
                    (
                        StatusCode::CREATED,
                        Json(json!({"access_token": "tok", "user": body["user"]})),
                    )
                }),
            )
            .route(
                "/echo",
                get(|headers: HeaderMap| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let agent = headers
                        .get("user-agent")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    Json(json!({"auth": auth, "agent": agent}))
                }),
            )
            .route("/text", get(|| async { "plain text" }))
            .route(
                "/upload",
                post(|headers: HeaderMap, body: Bytes| async move {
                    let content_type = headers
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    Json(json!({"size": body.len(), "contentType": content_type, "first": body.first()}))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn request(method: &str, url: String) -> ResolvedRequest {
        ResolvedRequest {
            link_id: "test".to_string(),
            method: method.to_string(),
            url,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_posts_json_and_parses_response() {
        let base = spawn_server().await;
        let transport = ReqwestTransport::new(&EngineConfig::default()).unwrap();

        let mut req = request("post", format!("{}/login", base));
        req.body = Some(ResolvedBody::Json(json!({"user": "demo"})));

        let response = transport.send(&req).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body, json!({"access_token": "tok", "user": "demo"}));
        assert!(response.headers["content-type"].contains("application/json"));
    }

    #[tokio::test]
    async fn test_sends_headers_and_user_agent() {
        let base = spawn_server().await;
        let transport = ReqwestTransport::new(&EngineConfig::default()).unwrap();

        let mut req = request("GET", format!("{}/echo", base));
        req.headers
            .insert("Authorization".to_string(), "Bearer tok".to_string());

        let response = transport.send(&req).await.unwrap();
        assert_eq!(response.body["auth"], "Bearer tok");
        assert!(response.body["agent"]
            .as_str()
            .unwrap()
            .starts_with("reqchain/"));
    }

    #[tokio::test]
    async fn test_non_json_body_is_kept_as_text() {
        let base = spawn_server().await;
        let transport = ReqwestTransport::new(&EngineConfig::default()).unwrap();

        let response = transport
            .send(&request("GET", format!("{}/text", base)))
            .await
            .unwrap();
        assert_eq!(response.body, json!("plain text"));
    }

    #[tokio::test]
    async fn test_binary_file_body_is_sent_raw() {
        let base = spawn_server().await;
        let transport = ReqwestTransport::new(&EngineConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avatar.bin");
        std::fs::write(&path, [7u8, 0, 255, 1]).unwrap();

        let mut req = request("POST", format!("{}/upload", base));
        req.body = Some(ResolvedBody::File {
            path: path.to_string_lossy().into_owned(),
            content_type: Some("application/x-test".to_string()),
        });

        let response = transport.send(&req).await.unwrap();
        assert_eq!(response.body["size"], 4);
        assert_eq!(response.body["first"], 7);
        assert_eq!(response.body["contentType"], "application/x-test");
    }

    #[tokio::test]
    async fn test_missing_body_file_is_an_error() {
        let base = spawn_server().await;
        let transport = ReqwestTransport::new(&EngineConfig::default()).unwrap();

        let mut req = request("POST", format!("{}/upload", base));
        req.body = Some(ResolvedBody::File {
            path: "/nonexistent/reqchain/body.bin".to_string(),
            content_type: None,
        });

        let err = transport.send(&req).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("/nonexistent/reqchain/body.bin"));
    }

    #[tokio::test]
    async fn test_connection_error_is_reported() {
        let transport = ReqwestTransport::new(&EngineConfig::default()).unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = transport
            .send(&request("GET", format!("http://{}/gone", addr)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }

    #[test]
    fn test_response_value_shape() {
        let response = ChainResponse {
            status: 200,
            headers: BTreeMap::from([("x-id".to_string(), "1".to_string())]),
            body: json!({"a": 1}),
            duration_ms: 3,
            executed_at: Utc::now(),
        };
        let value = response.to_value();
        assert_eq!(value["status"], 200);
        assert_eq!(value["headers"]["x-id"], "1");
        assert_eq!(value["body"]["a"], 1);
        assert_eq!(value["durationMs"], 3);
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("[1,2]"), json!([1, 2]));
        assert_eq!(parse_body("oops"), json!("oops"));
    }
}
