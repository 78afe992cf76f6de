//! Chain executor.
//!
//! A run validates the chain, resolves the dependency graph, then walks it in
//! batches. Sequential mode dispatches one link per batch in the stable
//! execution order; parallel mode dispatches one dependency layer per batch
//! and waits for the whole layer before moving on. Either way a link only
//! starts after every dependency reached a terminal state.

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{error::Elapsed, timeout, Instant};
use tracing::{debug, info, instrument, warn, Span};

use super::result::{ExecutionResult, ExecutionStatus, LinkResult, LinkState};
use super::transport::{ChainResponse, HttpTransport, ResolvedBody, ResolvedRequest};
use crate::chain::{
    validate_chain_with_limit, ChainDefinition, DependencyGraph, LinkBody, RequestLink,
};
use crate::error::{Error, Result};
use crate::metrics::{self, ActiveExecutionGuard};
use crate::script;
use crate::template::{evaluate_path, TemplateScope};

const GLOBAL_TIMEOUT_MESSAGE: &str = "global timeout exceeded";

/// Runs chains against an [`HttpTransport`].
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn HttpTransport>,
    max_chain_length: Option<usize>,
}

impl Executor {
    /// Create a new executor.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            max_chain_length: None,
        }
    }

    /// Enforce a server-wide cap on links per chain.
    pub fn with_max_chain_length(mut self, max: usize) -> Self {
        self.max_chain_length = Some(max);
        self
    }

    /// Execute a chain once.
    ///
    /// Structural problems (validation, unknown dependencies, cycles, a
    /// disabled chain) are returned as `Err` before any request is sent.
    /// Runtime failures are recorded per link and never abort the run.
    #[instrument(
        name = "chain.execute",
        skip(self, chain, variables),
        fields(
            chain_id = %chain.id,
            execution_id = tracing::field::Empty,
        )
    )]
    pub async fn execute(
        &self,
        chain: &ChainDefinition,
        variables: HashMap<String, Value>,
    ) -> Result<ExecutionResult> {
        validate_chain_with_limit(chain, self.max_chain_length)?;
        let graph = DependencyGraph::build(chain)?;
        if !chain.config.enabled {
            return Err(Error::ChainDisabled(chain.id.clone()));
        }

        let execution_id = uuid::Uuid::new_v4().to_string();
        Span::current().record("execution_id", execution_id.as_str());

        let parallel = chain.config.enable_parallel_execution;
        info!(
            "Starting execution {} of chain '{}' ({} links, {})",
            execution_id,
            chain.id,
            chain.links.len(),
            if parallel { "parallel" } else { "sequential" }
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = start
            .checked_add(Duration::from_secs(chain.config.global_timeout_secs))
            .ok_or_else(|| {
                Error::validation(format!(
                    "globalTimeoutSecs {} is out of range",
                    chain.config.global_timeout_secs
                ))
            })?;
        let _active = ActiveExecutionGuard::enter();

        let batches: Vec<Vec<usize>> = if parallel {
            graph.layers().to_vec()
        } else {
            graph.execution_order().into_iter().map(|i| vec![i]).collect()
        };
        debug!("Schedule: {:?}", batches);

        let mut run = Run {
            chain,
            results: chain.links.iter().map(|l| LinkResult::pending(l.id())).collect(),
            scope: TemplateScope::new(chain.variables.clone()).with_overrides(variables),
            order: Vec::new(),
            deadline,
            graph,
        };

        run.execute_batches(&batches, &self.transport).await?;

        let roots: Vec<&str> = run
            .graph
            .layers()
            .first()
            .map(|layer| layer.iter().map(|&i| run.graph.id(i)).collect())
            .unwrap_or_default();
        let status = ExecutionStatus::aggregate(run.results.iter(), &roots);
        let duration = start.elapsed();

        metrics::record_chain_execution(&status.to_string());
        metrics::record_chain_duration(duration, &chain.id);

        let resolved_variables = run.scope.resolved_variables();
        let link_results: BTreeMap<String, LinkResult> = run
            .results
            .into_iter()
            .map(|r| (r.link_id.clone(), r))
            .collect();

        info!(
            "Execution {} of chain '{}' finished: {} ({}ms)",
            execution_id,
            chain.id,
            status,
            duration.as_millis()
        );

        Ok(ExecutionResult {
            execution_id,
            chain_id: chain.id.clone(),
            status,
            started_at,
            finished_at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            link_results,
            resolved_variables,
            execution_order: run.order,
        })
    }
}

/// State owned by a single execution.
struct Run<'a> {
    chain: &'a ChainDefinition,
    graph: DependencyGraph,
    results: Vec<LinkResult>,
    scope: TemplateScope,
    order: Vec<String>,
    deadline: Instant,
}

/// A dispatched request and how it ended.
struct Attempt {
    request: ResolvedRequest,
    outcome: std::result::Result<Result<ChainResponse>, Elapsed>,
    elapsed: Duration,
    budget: Duration,
    bounded_by_deadline: bool,
}

impl Run<'_> {
    /// Run every batch in order, then settle links the deadline never reached.
    async fn execute_batches(
        &mut self,
        batches: &[Vec<usize>],
        transport: &Arc<dyn HttpTransport>,
    ) -> Result<()> {
        for batch in batches {
            self.execute_batch(batch, transport).await?;
            self.skip_descendants_of_failures(batch)?;
        }

        for idx in 0..self.results.len() {
            if !self.results[idx].state.is_terminal() {
                self.skip(idx, GLOBAL_TIMEOUT_MESSAGE.to_string())?;
            }
        }
        Ok(())
    }

    /// Settle everything downstream of a link that failed or timed out, so
    /// transitive dependents name the link that broke the chain.
    fn skip_descendants_of_failures(&mut self, batch: &[usize]) -> Result<()> {
        for &idx in batch {
            let state = self.results[idx].state;
            if !matches!(state, LinkState::Failed | LinkState::TimedOut) {
                continue;
            }
            for descendant in self.graph.descendants(idx) {
                if self.results[descendant].state.is_terminal() {
                    continue;
                }
                let reason = format!("dependency '{}' {}", self.graph.id(idx), state);
                debug!("Skipping link '{}': {}", self.graph.id(descendant), reason);
                self.skip(descendant, reason)?;
            }
        }
        Ok(())
    }

    async fn execute_batch(
        &mut self,
        batch: &[usize],
        transport: &Arc<dyn HttpTransport>,
    ) -> Result<()> {
        let mut join_set: JoinSet<(usize, Attempt)> = JoinSet::new();
        let mut in_flight = HashSet::new();

        for &idx in batch {
            let Some((request, budget, bounded_by_deadline)) = self.prepare(idx)? else {
                continue;
            };

            self.results[idx].transition(LinkState::Running)?;
            self.order.push(request.link_id.clone());
            in_flight.insert(idx);
            debug!(
                "Dispatching link '{}': {} {} (budget {:?})",
                request.link_id, request.method, request.url, budget
            );

            let transport = transport.clone();
            join_set.spawn(async move {
                let started = Instant::now();
                let outcome = timeout(budget, transport.send(&request)).await;
                let attempt = Attempt {
                    request,
                    outcome,
                    elapsed: started.elapsed(),
                    budget,
                    bounded_by_deadline,
                };
                (idx, attempt)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, attempt)) => {
                    in_flight.remove(&idx);
                    self.complete(idx, attempt)?;
                }
                Err(e) => warn!("Link task failed to join: {}", e),
            }
        }

        for idx in in_flight {
            self.results[idx].fail("link task aborted before completion", None, 0)?;
            metrics::record_link_execution(&LinkState::Failed.to_string());
        }

        Ok(())
    }

    /// Move a pending link to `ready` and resolve its request. Returns `None`
    /// when the link settled without a network call (skipped or failed).
    fn prepare(&mut self, idx: usize) -> Result<Option<(ResolvedRequest, Duration, bool)>> {
        if self.results[idx].state.is_terminal() {
            return Ok(None);
        }

        let blocked = self.graph.dependencies(idx).iter().find_map(|&dep| {
            let state = self.results[dep].state;
            (state != LinkState::Succeeded).then(|| (self.graph.id(dep).to_string(), state))
        });
        if let Some((dep, state)) = blocked {
            let reason = format!("dependency '{}' {}", dep, state);
            debug!("Skipping link '{}': {}", self.graph.id(idx), reason);
            self.skip(idx, reason)?;
            return Ok(None);
        }

        let Some(remaining) = remaining_until(self.deadline) else {
            self.skip(idx, GLOBAL_TIMEOUT_MESSAGE.to_string())?;
            return Ok(None);
        };

        self.results[idx].transition(LinkState::Ready)?;
        let chain = self.chain;
        let link = &chain.links[idx];

        if let Some(scripting) = &link.request.scripting {
            if let Some(source) = &scripting.pre_script {
                let request = serde_json::to_value(&link.request).unwrap_or_default();
                self.run_link_script(idx, "pre", source, scripting.timeout_ms, &request, None);
            }
        }

        let request = match resolve_request(&self.scope, link) {
            Ok(request) => request,
            Err(e) => {
                warn!("Link '{}' failed to resolve: {}", link.id(), e);
                self.results[idx].fail(e.to_string(), None, 0)?;
                metrics::record_link_execution(&LinkState::Failed.to_string());
                return Ok(None);
            }
        };

        let (budget, bounded_by_deadline) = match link.request.timeout_secs {
            Some(secs) if Duration::from_secs(secs) < remaining => (Duration::from_secs(secs), false),
            _ => (remaining, true),
        };

        Ok(Some((request, budget, bounded_by_deadline)))
    }

    fn skip(&mut self, idx: usize, reason: String) -> Result<()> {
        self.results[idx].skip(reason)?;
        metrics::record_link_execution(&LinkState::Skipped.to_string());
        Ok(())
    }

    /// Run a link script and merge the variables it sets into the scope.
    /// A failing script is logged and the link carries on.
    fn run_link_script(
        &mut self,
        idx: usize,
        phase: &str,
        source: &str,
        timeout_ms: u64,
        request: &Value,
        response: Option<&Value>,
    ) {
        let variables = self.scope.resolved_variables();
        match script::run_script(
            source,
            Duration::from_millis(timeout_ms),
            &variables,
            request,
            response,
        ) {
            Ok(changed) => {
                for (name, value) in changed {
                    debug!("Link '{}' {}-script set '{}'", self.graph.id(idx), phase, name);
                    self.scope.insert_extracted(name, value);
                }
            }
            Err(e) => warn!("Link '{}' {}-script failed: {}", self.graph.id(idx), phase, e),
        }
    }

    fn complete(&mut self, idx: usize, attempt: Attempt) -> Result<()> {
        let chain = self.chain;
        let link = &chain.links[idx];
        let Attempt {
            request,
            outcome,
            elapsed,
            budget,
            bounded_by_deadline,
        } = attempt;
        let elapsed_ms = elapsed.as_millis() as u64;
        metrics::record_link_duration(elapsed, &request.method);

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let error = format!("{} {} failed: {}", request.method, request.url, e);
                warn!("Link '{}': {}", link.id(), error);
                self.results[idx].fail(error, None, elapsed_ms)?;
                metrics::record_link_execution(&LinkState::Failed.to_string());
                return Ok(());
            }
            Err(_) => {
                let error = if bounded_by_deadline {
                    format!(
                        "{} ({} {} still running after {}ms)",
                        GLOBAL_TIMEOUT_MESSAGE,
                        request.method,
                        request.url,
                        budget.as_millis()
                    )
                } else {
                    format!(
                        "{} {} timed out after {}s",
                        request.method,
                        request.url,
                        budget.as_secs()
                    )
                };
                warn!("Link '{}': {}", link.id(), error);
                self.results[idx].time_out(error, elapsed_ms)?;
                metrics::record_link_execution(&LinkState::TimedOut.to_string());
                return Ok(());
            }
        };

        metrics::record_http_request(&request.method, response.status);

        if !link.accepts_status(response.status) {
            let error = format!(
                "{} {} returned status {}, expected {}",
                request.method,
                request.url,
                response.status,
                describe_expected(link)
            );
            warn!("Link '{}': {}", link.id(), error);
            self.results[idx].fail(error, Some(response), elapsed_ms)?;
            metrics::record_link_execution(&LinkState::Failed.to_string());
            return Ok(());
        }

        let captured = response.to_value();
        let mut extracted = HashMap::new();
        let mut names: Vec<&String> = link.extract.keys().collect();
        names.sort();

        for name in names {
            let path = &link.extract[name];
            match evaluate_path(&captured, path) {
                Ok(value) => {
                    extracted.insert(name.clone(), value.clone());
                }
                Err(reason) => {
                    let error = format!(
                        "{} {} (status {}): extract '{}' failed at path '{}': {}",
                        request.method, request.url, response.status, name, path, reason
                    );
                    warn!("Link '{}': {}", link.id(), error);
                    self.results[idx].fail(error, Some(response), elapsed_ms)?;
                    metrics::record_link_execution(&LinkState::Failed.to_string());
                    return Ok(());
                }
            }
        }

        for (name, value) in &extracted {
            self.scope.insert_extracted(name.clone(), value.clone());
        }
        if let Some(scripting) = &link.request.scripting {
            if let Some(source) = &scripting.post_script {
                let request_value = request_to_value(&request);
                self.run_link_script(
                    idx,
                    "post",
                    source,
                    scripting.timeout_ms,
                    &request_value,
                    Some(&captured),
                );
            }
        }

        if let Some(store_as) = &link.store_as {
            self.scope.store_response(store_as.clone(), captured.clone());
        }
        self.scope.store_response(link.id().to_string(), captured);

        debug!(
            "Link '{}' succeeded with status {} ({}ms)",
            link.id(),
            response.status,
            elapsed_ms
        );
        self.results[idx].succeed(response, extracted)?;
        metrics::record_link_execution(&LinkState::Succeeded.to_string());
        Ok(())
    }
}

/// Resolve every placeholder of a link request against the current scope.
pub fn resolve_request(scope: &TemplateScope, link: &RequestLink) -> Result<ResolvedRequest> {
    let url = scope.render_str(&link.request.url)?;

    let mut headers = BTreeMap::new();
    for (name, value) in &link.request.headers {
        headers.insert(name.clone(), scope.render_str(value)?);
    }

    let body = match &link.request.body {
        Some(LinkBody::Json(body)) => Some(ResolvedBody::Json(scope.render_json(body)?)),
        Some(LinkBody::File(file)) => Some(ResolvedBody::File {
            path: scope.render_str(&file.binary_file.path)?,
            content_type: file.binary_file.content_type.clone(),
        }),
        None => None,
    };

    Ok(ResolvedRequest {
        link_id: link.id().to_string(),
        method: link.request.method.to_uppercase(),
        url,
        headers,
        body,
    })
}

/// The request as a post-script sees it.
fn request_to_value(request: &ResolvedRequest) -> Value {
    let body = match &request.body {
        Some(ResolvedBody::Json(body)) => body.clone(),
        Some(ResolvedBody::File { path, content_type }) => {
            serde_json::json!({"binaryFile": {"path": path, "contentType": content_type}})
        }
        None => Value::Null,
    };
    serde_json::json!({
        "id": request.link_id,
        "method": request.method,
        "url": request.url,
        "headers": request.headers,
        "body": body,
    })
}

fn describe_expected(link: &RequestLink) -> String {
    match &link.expected_status {
        Some(allowed) => {
            let codes: Vec<String> = allowed.iter().map(|s| s.to_string()).collect();
            format!("one of [{}]", codes.join(", "))
        }
        None => "2xx".to_string(),
    }
}

fn remaining_until(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline {
        None
    } else {
        Some(deadline.saturating_duration_since(now))
    }
}
