//! Event records fanned out to observers of run progress.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::run::{Run, RunSummary};
use super::test_result::{TestPatch, TestResult};
use crate::id::now_ms;

/// Event type constants
pub mod event_types {
    pub const RUN_STARTED: &str = "run:started";
    pub const RUN_FINISHED: &str = "run:finished";
    pub const RUN_SUMMARY: &str = "run:summary";
    pub const TEST_STARTED: &str = "test:started";
    pub const TEST_UPDATED: &str = "test:updated";
    pub const TEST_FINISHED: &str = "test:finished";
    pub const BASELINE_ACCEPTED: &str = "baseline:accepted";
}

/// Ephemeral progress message. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    /// Event type (e.g., "run:started", "test:finished")
    #[serde(rename = "type")]
    pub event_type: String,
    /// Run the event belongs to
    pub run_id: String,
    /// Event-specific payload data
    pub payload: Value,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl EventRecord {
    /// Create a new event with the given type and payload
    pub fn new(event_type: &str, run_id: &str, payload: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            run_id: run_id.to_string(),
            payload,
            timestamp: now_ms(),
        }
    }

    /// Create a run:started event
    pub fn run_started(run: &Run) -> Self {
        Self::new(event_types::RUN_STARTED, &run.id, serde_json::json!({ "run": run }))
    }

    /// Create a run:finished event
    pub fn run_finished(run: &Run) -> Self {
        Self::new(event_types::RUN_FINISHED, &run.id, serde_json::json!({ "run": run }))
    }

    /// Create a run:summary event
    pub fn run_summary(run_id: &str, summary: &RunSummary) -> Self {
        Self::new(event_types::RUN_SUMMARY, run_id, serde_json::json!({ "summary": summary }))
    }

    /// Create a test:started event
    pub fn test_started(test: &TestResult) -> Self {
        Self::new(event_types::TEST_STARTED, &test.run_id, serde_json::json!({ "test": test }))
    }

    /// Create a test:updated event carrying only the patched fields
    pub fn test_updated(run_id: &str, test_id: &str, patch: &TestPatch) -> Self {
        Self::new(
            event_types::TEST_UPDATED,
            run_id,
            serde_json::json!({
                "test_id": test_id,
                "update": patch
            }),
        )
    }

    /// Create a test:finished event
    pub fn test_finished(test: &TestResult) -> Self {
        Self::new(event_types::TEST_FINISHED, &test.run_id, serde_json::json!({ "test": test }))
    }

    /// Create a baseline:accepted event
    pub fn baseline_accepted(test: &TestResult) -> Self {
        Self::new(
            event_types::BASELINE_ACCEPTED,
            &test.run_id,
            serde_json::json!({
                "test": test,
                "baseline": test.baseline
            }),
        )
    }

    pub fn is_run_event(&self) -> bool {
        self.event_type.starts_with("run:")
    }

    pub fn is_test_event(&self) -> bool {
        self.event_type.starts_with("test:")
    }
}
