//! Run record and related types
//!
//! A Run is one execution session over many test results. Its summary counters
//! are advanced in place by atomic increments, never by rewriting the summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::now;

/// The core Run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    //=== Identity ===
    /// Unique, sortable identifier ("run-1738300800123-a1b2")
    pub id: String,

    //=== Timing ===
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// finished_at - started_at, in milliseconds
    pub duration_ms: Option<i64>,

    /// Why the run ended (None while running)
    pub reason: Option<RunReason>,

    //=== Aggregates ===
    pub summary: RunSummary,

    /// Where the run executed
    pub environment: RunEnvironment,
}

impl Run {
    /// Create a freshly started run expecting `expected_tests` results.
    pub fn new(id: impl Into<String>, expected_tests: u64) -> Self {
        Self {
            id: id.into(),
            started_at: now(),
            finished_at: None,
            duration_ms: None,
            reason: None,
            summary: RunSummary {
                total: expected_tests,
                ..Default::default()
            },
            environment: RunEnvironment::capture(),
        }
    }

    /// Stamp the run as finished now with the given reason.
    pub fn finish(&mut self, reason: RunReason) {
        let finished_at = now();
        self.duration_ms = Some((finished_at - self.started_at).num_milliseconds());
        self.finished_at = Some(finished_at);
        self.reason = Some(reason);
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Aggregate counters for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: u64,
    pub finished: u64,
    pub passed: u64,
    pub failed: u64,
    pub changed: u64,
    pub skipped: u64,
    pub new: u64,
}

/// Document field paths of the summary counters
pub mod summary_fields {
    pub const FINISHED: &str = "summary.finished";
    pub const PASSED: &str = "summary.passed";
    pub const FAILED: &str = "summary.failed";
    pub const NEW: &str = "summary.new";
}

/// Document field paths written when a run is finalized
pub mod finish_fields {
    pub const FINISHED_AT: &str = "finished_at";
    pub const DURATION_MS: &str = "duration_ms";
    pub const REASON: &str = "reason";
}

/// Termination reason of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunReason {
    Passed,
    Interrupted,
    Failed,
}

impl std::fmt::Display for RunReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunReason::Passed => "passed",
            RunReason::Interrupted => "interrupted",
            RunReason::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of the environment a run executed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEnvironment {
    pub platform: String,
    pub ci: bool,
    pub runtime_version: String,
}

impl RunEnvironment {
    pub fn capture() -> Self {
        let ci = std::env::var("CI")
            .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        Self {
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            ci,
            runtime_version: format!("vizreg {}", env!("CARGO_PKG_VERSION")),
        }
    }
}
