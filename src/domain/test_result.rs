//! Test result record and the partial updates applied to it
//!
//! A TestResult is created `running`, may be patched any number of times while
//! running, and reaches a terminal status exactly once through finish. After
//! that only baseline promotion rewrites it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::summary_fields;
use super::story::StoryIdentifier;
use crate::id::now;

/// The outcome record for one story rendering within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    //=== Identity ===
    /// Metadata key of this document
    pub id: String,
    pub run_id: String,
    pub story: StoryIdentifier,

    //=== Result ===
    pub status: TestStatus,
    /// Blob path of the baseline image this test compared against
    pub baseline: Option<String>,
    /// Blob path of the screenshot captured in this run
    pub current: Option<String>,
    /// Blob path of the rendered difference
    pub diff: Option<String>,
    /// Percentage of differing pixels
    pub diff_ratio: Option<f64>,
    pub message: Option<String>,

    //=== Timestamps ===
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TestResult {
    /// Create a running test result.
    pub fn new(id: impl Into<String>, run_id: impl Into<String>, story: StoryIdentifier, baseline: Option<String>) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            story,
            status: TestStatus::Running,
            baseline,
            current: None,
            diff: None,
            diff_ratio: None,
            message: None,
            started_at: now(),
            finished_at: None,
        }
    }

    /// Whether the terminal transition already happened
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Merge a patch, leaving absent fields untouched.
    pub fn apply(&mut self, patch: &TestPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(baseline) = &patch.baseline {
            self.baseline = Some(baseline.clone());
        }
        if let Some(current) = &patch.current {
            self.current = Some(current.clone());
        }
        if let Some(diff) = &patch.diff {
            self.diff = Some(diff.clone());
        }
        if let Some(ratio) = patch.diff_ratio {
            self.diff_ratio = Some(ratio);
        }
        if let Some(message) = &patch.message {
            self.message = Some(message.clone());
        }
    }
}

/// Status of a test result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Screenshot capture or comparison still in progress
    Running,
    /// Matched the baseline
    Passed,
    /// Differed from the baseline
    Failed,
    /// No baseline existed; this result created one
    New,
}

impl TestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestStatus::Running)
    }

    /// Run summary counter advanced when a test finishes with this status
    pub fn summary_field(&self) -> Option<&'static str> {
        match self {
            TestStatus::Running => None,
            TestStatus::Passed => Some(summary_fields::PASSED),
            TestStatus::Failed => Some(summary_fields::FAILED),
            TestStatus::New => Some(summary_fields::NEW),
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TestStatus::Running => "running",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::New => "new",
        };
        f.write_str(s)
    }
}

/// Which of a test's three images a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Baseline,
    Current,
    Diff,
}

/// An image supplied by a caller: either already stored, or raw bytes to store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageInput {
    /// Blob path of an image that is already persisted
    Path(String),
    /// Encoded image bytes that still need persisting
    Bytes(Vec<u8>),
}

impl From<Vec<u8>> for ImageInput {
    fn from(bytes: Vec<u8>) -> Self {
        ImageInput::Bytes(bytes)
    }
}

/// Caller-facing partial update of a running test
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestUpdate {
    pub status: Option<TestStatus>,
    pub baseline: Option<ImageInput>,
    pub current: Option<ImageInput>,
    pub diff: Option<ImageInput>,
    pub diff_ratio: Option<f64>,
    pub message: Option<String>,
}

impl TestUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_image(mut self, kind: ImageKind, image: impl Into<ImageInput>) -> Self {
        let image = Some(image.into());
        match kind {
            ImageKind::Baseline => self.baseline = image,
            ImageKind::Current => self.current = image,
            ImageKind::Diff => self.diff = image,
        }
        self
    }

    pub fn with_diff_ratio(mut self, ratio: f64) -> Self {
        self.diff_ratio = Some(ratio);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Final result of a test, handed to finish
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub story: StoryIdentifier,
    pub status: TestStatus,
    pub baseline: Option<ImageInput>,
    pub current: Option<ImageInput>,
    pub diff: Option<ImageInput>,
    pub diff_ratio: Option<f64>,
    pub message: Option<String>,
}

impl TestOutcome {
    pub fn new(story: StoryIdentifier, status: TestStatus) -> Self {
        Self {
            story,
            status,
            baseline: None,
            current: None,
            diff: None,
            diff_ratio: None,
            message: None,
        }
    }

    pub fn with_image(mut self, kind: ImageKind, image: impl Into<ImageInput>) -> Self {
        let image = Some(image.into());
        match kind {
            ImageKind::Baseline => self.baseline = image,
            ImageKind::Current => self.current = image,
            ImageKind::Diff => self.diff = image,
        }
        self
    }

    pub fn with_diff_ratio(mut self, ratio: f64) -> Self {
        self.diff_ratio = Some(ratio);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Split into the story and the update that finish merges.
    pub fn into_update(self) -> (StoryIdentifier, TestUpdate) {
        let update = TestUpdate {
            status: Some(self.status),
            baseline: self.baseline,
            current: self.current,
            diff: self.diff,
            diff_ratio: self.diff_ratio,
            message: self.message,
        };
        (self.story, update)
    }
}

/// A TestUpdate after image bytes were persisted: only blob paths remain.
///
/// This is what gets merged into the stored document and what `test:updated`
/// events carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::story::{Theme, Viewport};

    fn story() -> StoryIdentifier {
        StoryIdentifier::new("card--default", Theme::Light, Viewport::new(800, 600))
    }

    #[test]
    fn test_new_test_result_is_running() {
        let result = TestResult::new("key", "run-1", story(), None);
        assert_eq!(result.status, TestStatus::Running);
        assert!(!result.is_finished());
        assert!(result.baseline.is_none());
    }

    #[test]
    fn test_apply_preserves_absent_fields() {
        let mut result = TestResult::new("key", "run-1", story(), Some("baselines/a.png".into()));
        result.message = Some("keep me".into());

        result.apply(&TestPatch {
            current: Some("runs/run-1/current/a.png".into()),
            diff_ratio: Some(0.25),
            ..Default::default()
        });

        assert_eq!(result.baseline.as_deref(), Some("baselines/a.png"));
        assert_eq!(result.current.as_deref(), Some("runs/run-1/current/a.png"));
        assert_eq!(result.diff_ratio, Some(0.25));
        assert_eq!(result.message.as_deref(), Some("keep me"));
        assert_eq!(result.status, TestStatus::Running);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TestStatus::Running.is_terminal());
        assert!(TestStatus::Passed.is_terminal());
        assert!(TestStatus::Failed.is_terminal());
        assert!(TestStatus::New.is_terminal());
    }

    #[test]
    fn test_status_summary_field() {
        assert_eq!(TestStatus::Running.summary_field(), None);
        assert_eq!(TestStatus::Passed.summary_field(), Some("summary.passed"));
        assert_eq!(TestStatus::Failed.summary_field(), Some("summary.failed"));
        assert_eq!(TestStatus::New.summary_field(), Some("summary.new"));
    }

    #[test]
    fn test_patch_serializes_only_present_fields() {
        let patch = TestPatch {
            status: Some(TestStatus::Running),
            message: Some("capturing".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, serde_json::json!({"status": "running", "message": "capturing"}));
    }

    #[test]
    fn test_outcome_into_update_carries_status() {
        let outcome = TestOutcome::new(story(), TestStatus::Failed)
            .with_image(ImageKind::Current, vec![1, 2, 3])
            .with_diff_ratio(1.5);
        let (s, update) = outcome.into_update();
        assert_eq!(s, story());
        assert_eq!(update.status, Some(TestStatus::Failed));
        assert_eq!(update.current, Some(ImageInput::Bytes(vec![1, 2, 3])));
        assert_eq!(update.diff_ratio, Some(1.5));
    }
}
