//! Execution engine for chains.

mod executor;
mod result;
mod service;
mod transport;

pub use executor::{resolve_request, Executor};
pub use result::{ExecutionResult, ExecutionStatus, LinkResult, LinkState, LinkStatus};
pub use service::ChainService;
pub use transport::{parse_body, ChainResponse, HttpTransport, ReqwestTransport, ResolvedRequest};

#[cfg(test)]
pub(crate) use service::tests::{service_with, EchoTransport};
