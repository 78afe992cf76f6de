//! Chain definition, parsing, validation, and dependency resolution.
//!
//! Chains are authored in YAML (or JSON) and consist of:
//! - Config: enablement, length limit, global timeout, parallelism
//! - Links: the HTTP requests, their extractions and dependencies
//! - Variables: chain-scoped constants

mod dag;
mod parser;
mod types;
mod validator;

pub use dag::DependencyGraph;
pub use parser::{chain_to_yaml, parse_chain, parse_chain_file, parse_chain_json, parse_chain_yaml};
pub use types::*;
pub use validator::{validate_chain, validate_chain_with_limit};
