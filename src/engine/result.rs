//! Execution results and the per-link state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use super::transport::ChainResponse;
use crate::error::{Error, Result};

/// Lifecycle state of one link during an execution.
///
/// ```text
/// pending -> ready -> running -> {succeeded, failed, timed_out}
///    |         |
///    +---------+-> skipped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl LinkState {
    /// Whether the state is final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Skipped
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Ready, Running)
                | (Ready, Failed)
                | (Ready, Skipped)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
        )
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Coarse outcome reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Success,
    Failure,
    Skipped,
}

impl From<LinkState> for LinkStatus {
    fn from(state: LinkState) -> Self {
        match state {
            LinkState::Succeeded => Self::Success,
            LinkState::Failed | LinkState::TimedOut => Self::Failure,
            _ => Self::Skipped,
        }
    }
}

/// Outcome of one link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResult {
    pub link_id: String,
    pub status: LinkStatus,
    pub state: LinkState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub extracted_vars: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ChainResponse>,
}

impl LinkResult {
    /// Fresh result in the `pending` state.
    pub fn pending(link_id: impl Into<String>) -> Self {
        Self {
            link_id: link_id.into(),
            status: LinkStatus::Skipped,
            state: LinkState::Pending,
            http_status: None,
            extracted_vars: HashMap::new(),
            error: None,
            duration_ms: 0,
            response: None,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: LinkState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "Link '{}' cannot move from {} to {}",
                self.link_id, self.state, next
            )));
        }
        self.state = next;
        self.status = next.into();
        Ok(())
    }

    /// `running -> succeeded`.
    pub fn succeed(
        &mut self,
        response: ChainResponse,
        extracted: HashMap<String, Value>,
    ) -> Result<()> {
        self.transition(LinkState::Succeeded)?;
        self.http_status = Some(response.status);
        self.duration_ms = response.duration_ms;
        self.extracted_vars = extracted;
        self.response = Some(response);
        Ok(())
    }

    /// `ready|running -> failed`.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        response: Option<ChainResponse>,
        duration_ms: u64,
    ) -> Result<()> {
        self.transition(LinkState::Failed)?;
        self.http_status = response.as_ref().map(|r| r.status);
        self.error = Some(error.into());
        self.duration_ms = duration_ms;
        self.response = response;
        Ok(())
    }

    /// `running -> timed_out`.
    pub fn time_out(&mut self, error: impl Into<String>, duration_ms: u64) -> Result<()> {
        self.transition(LinkState::TimedOut)?;
        self.error = Some(error.into());
        self.duration_ms = duration_ms;
        Ok(())
    }

    /// `pending|ready -> skipped`.
    pub fn skip(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(LinkState::Skipped)?;
        self.error = Some(reason.into());
        Ok(())
    }
}

/// Overall outcome of a chain execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    PartialFailure,
    Failed,
}

impl ExecutionStatus {
    /// `success` when every link succeeded, `failed` when no root link
    /// succeeded, `partial_failure` otherwise.
    pub fn aggregate<'a>(
        results: impl IntoIterator<Item = &'a LinkResult>,
        root_ids: &[&str],
    ) -> Self {
        let mut all_succeeded = true;
        let mut root_succeeded = false;

        for result in results {
            let succeeded = result.state == LinkState::Succeeded;
            all_succeeded &= succeeded;
            if succeeded && root_ids.contains(&result.link_id.as_str()) {
                root_succeeded = true;
            }
        }

        if all_succeeded {
            Self::Success
        } else if !root_succeeded {
            Self::Failed
        } else {
            Self::PartialFailure
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialFailure => write!(f, "partial_failure"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "partial_failure" => Ok(Self::PartialFailure),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// Result of running a chain once. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    pub chain_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub link_results: BTreeMap<String, LinkResult>,
    pub resolved_variables: HashMap<String, Value>,
    /// Links in the order they were dispatched
    pub execution_order: Vec<String>,
}

impl ExecutionResult {
    /// Result for one link.
    pub fn link(&self, id: &str) -> Option<&LinkResult> {
        self.link_results.get(id)
    }

    /// Terminal state of one link.
    pub fn state_of(&self, id: &str) -> Option<LinkState> {
        self.link_results.get(id).map(|r| r.state)
    }

    /// Count links per coarse status as (success, failure, skipped).
    pub fn counts(&self) -> (usize, usize, usize) {
        self.link_results
            .values()
            .fold((0, 0, 0), |(ok, failed, skipped), r| match r.status {
                LinkStatus::Success => (ok + 1, failed, skipped),
                LinkStatus::Failure => (ok, failed + 1, skipped),
                LinkStatus::Skipped => (ok, failed, skipped + 1),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16) -> ChainResponse {
        ChainResponse {
            status,
            headers: BTreeMap::new(),
            body: json!({"ok": true}),
            duration_ms: 12,
            executed_at: Utc::now(),
        }
    }

    fn run_to(state: LinkState, id: &str) -> LinkResult {
        let mut result = LinkResult::pending(id);
        match state {
            LinkState::Succeeded => {
                result.transition(LinkState::Ready).unwrap();
                result.transition(LinkState::Running).unwrap();
                result.succeed(response(200), HashMap::new()).unwrap();
            }
            LinkState::Failed => {
                result.transition(LinkState::Ready).unwrap();
                result.transition(LinkState::Running).unwrap();
                result.fail("boom", Some(response(500)), 5).unwrap();
            }
            LinkState::Skipped => result.skip("upstream failed").unwrap(),
            other => panic!("unsupported target {other}"),
        }
        result
    }

    #[test]
    fn test_legal_transitions() {
        let mut result = LinkResult::pending("a");
        result.transition(LinkState::Ready).unwrap();
        result.transition(LinkState::Running).unwrap();
        result.time_out("too slow", 1000).unwrap();

        assert_eq!(result.state, LinkState::TimedOut);
        assert_eq!(result.status, LinkStatus::Failure);
        assert!(result.state.is_terminal());
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut result = LinkResult::pending("a");
        assert!(result.transition(LinkState::Running).is_err());
        assert!(result.transition(LinkState::Succeeded).is_err());

        let mut done = run_to(LinkState::Succeeded, "b");
        assert!(done.skip("late").is_err());
        assert_eq!(done.state, LinkState::Succeeded);
    }

    #[test]
    fn test_failed_result_keeps_http_status() {
        let result = run_to(LinkState::Failed, "a");
        assert_eq!(result.http_status, Some(500));
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.status, LinkStatus::Failure);
    }

    #[test]
    fn test_aggregate_status() {
        let a_ok = run_to(LinkState::Succeeded, "a");
        let b_ok = run_to(LinkState::Succeeded, "b");
        let a_failed = run_to(LinkState::Failed, "a");
        let b_skipped = run_to(LinkState::Skipped, "b");
        let b_failed = run_to(LinkState::Failed, "b");

        assert_eq!(
            ExecutionStatus::aggregate([&a_ok, &b_ok], &["a"]),
            ExecutionStatus::Success
        );
        assert_eq!(
            ExecutionStatus::aggregate([&a_failed, &b_skipped], &["a"]),
            ExecutionStatus::Failed
        );
        assert_eq!(
            ExecutionStatus::aggregate([&a_ok, &b_failed], &["a"]),
            ExecutionStatus::PartialFailure
        );
    }

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            ExecutionStatus::Success,
            ExecutionStatus::PartialFailure,
            ExecutionStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<ExecutionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_link_result_wire_shape() {
        let result = run_to(LinkState::Succeeded, "a");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["state"], "succeeded");
        assert_eq!(value["httpStatus"], 200);
        assert_eq!(value["durationMs"], 12);
        assert!(value.get("error").is_none());
    }
}
