//! reqchain - request chain execution engine
//!
//! reqchain runs ordered chains of HTTP requests where later requests are
//! built from the responses of earlier ones. Chains are stored durably,
//! validated as a dependency graph before anything is sent, and executed
//! either one link at a time or layer by layer in parallel.
//!
//! ## Example
//!
//! ```yaml
//! id: login-flow
//! name: Login then fetch profile
//!
//! variables:
//!   base_url: https://api.example.com
//!
//! links:
//!   - request:
//!       id: login
//!       method: POST
//!       url: "{{base_url}}/login"
//!       body: { user: demo }
//!     extract:
//!       token: body.access_token
//!     storeAs: auth
//!
//!   - request:
//!       id: profile
//!       method: GET
//!       url: "{{base_url}}/me"
//!       headers:
//!         Authorization: "Bearer {{token}}"
//!     dependsOn: [login]
//! ```

pub mod api;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod script;
pub mod storage;
pub mod template;

pub use error::{Error, Result};
