//! Test lifecycle: starting, patching and finishing test results, and
//! promoting a result's screenshot to the story's baseline.
//!
//! State machine per test result:
//!
//! ```text
//! running --update--> running
//! running --finish--> passed | failed | new
//! any     --accept--> passed            (baseline promotion)
//! ```
//!
//! Document fields are merged read-then-write (last write wins for one
//! identifier). Run summary counters are only ever advanced through atomic
//! increments committed in the same batch as the finished test, so tests of the
//! same run may finish concurrently and a failed finish can simply be retried.

use std::sync::Arc;

use futures::future::try_join_all;

use crate::domain::{
    EventRecord, ImageInput, ImageKind, Run, StoryIdentifier, TestOutcome, TestPatch, TestResult, TestStatus,
    TestUpdate, summary_fields,
};
use crate::error::{Result, VizregError};
use crate::events::EventPublisher;
use crate::id::now;
use crate::paths::{self, KeySpace};
use crate::storage::{Batch, BlobStore, MetadataStore, get_record};

/// Owns test results and baseline promotion.
pub struct TestManager<S: MetadataStore, B: BlobStore> {
    store: Arc<S>,
    blobs: Arc<B>,
    keys: KeySpace,
    events: EventPublisher<S>,
}

impl<S: MetadataStore, B: BlobStore> TestManager<S, B> {
    pub fn new(store: Arc<S>, blobs: Arc<B>, keys: KeySpace, events: EventPublisher<S>) -> Self {
        Self {
            store,
            blobs,
            keys,
            events,
        }
    }

    /// Create a running test result, linking the story's baseline if one exists.
    ///
    /// Run summary counters are left alone; they only move on finish.
    pub async fn start_test(&self, run_id: &str, story: StoryIdentifier) -> Result<TestResult> {
        let baseline = self.linked_baseline(&story).await;
        let key = self.keys.test(run_id, &story);
        let test = TestResult::new(key.clone(), run_id, story, baseline);

        let batch = Batch::new()
            .set_record(key.clone(), &test)?
            .set_add(self.keys.run_tests(run_id), key);
        self.store.exec(batch).await?;

        log::debug!("Started test {} in run {}", test.story, run_id);
        self.events.publish_record(&EventRecord::test_started(&test)).await?;
        Ok(test)
    }

    /// Merge a partial update into a running test result.
    ///
    /// Image bytes are written to the blob store first and replaced by their
    /// paths; the stored document and the `test:updated` event only ever carry paths.
    /// The status may only stay `running`; terminal statuses go through `finish_test`.
    pub async fn update_test(&self, run_id: &str, story: &StoryIdentifier, update: TestUpdate) -> Result<()> {
        if let Some(status) = update.status.filter(|status| status.is_terminal()) {
            return Err(VizregError::InvalidState(format!(
                "cannot move {} to {} without finishing it",
                story, status
            )));
        }

        let key = self.keys.test(run_id, story);
        let mut test = self
            .load(&key)
            .await?
            .ok_or_else(|| VizregError::TestNotFound(key.clone()))?;
        if test.is_finished() {
            return Err(VizregError::AlreadyFinished(key));
        }

        let patch = self.persist_images(run_id, story, update).await?;
        test.apply(&patch);
        self.store.set(&key, serde_json::to_value(&test)?).await?;

        self.events
            .publish_record(&EventRecord::test_updated(run_id, &key, &patch))
            .await?;
        Ok(())
    }

    /// Record the terminal result of a test and advance the run summary.
    ///
    /// Returns the run with its updated summary, or None when the run document
    /// is missing, in which case the test is still written and `test:finished`
    /// still emitted but no counters move.
    pub async fn finish_test(&self, run_id: &str, outcome: TestOutcome) -> Result<Option<Run>> {
        let (story, update) = outcome.into_update();
        let status = update.status.unwrap_or(TestStatus::Running);
        if !status.is_terminal() {
            return Err(VizregError::InvalidState(format!(
                "cannot finish {} with status {}",
                story, status
            )));
        }

        let key = self.keys.test(run_id, &story);
        let mut test = match self.load(&key).await? {
            Some(test) if test.is_finished() => return Err(VizregError::AlreadyFinished(key)),
            Some(test) => test,
            None => {
                log::warn!("Finishing test {} that was never started in run {}", story, run_id);
                let baseline = self.linked_baseline(&story).await;
                TestResult::new(key.clone(), run_id, story.clone(), baseline)
            }
        };

        let patch = self.persist_images(run_id, &story, update).await?;
        test.apply(&patch);
        test.finished_at = Some(now());

        let run_key = self.keys.run(run_id);
        let run_exists = self.store.get(&run_key).await?.is_some();

        let mut batch = Batch::new()
            .set_record(key.clone(), &test)?
            .set_add(self.keys.run_tests(run_id), key);
        if run_exists {
            batch = batch.increment(run_key.clone(), summary_fields::FINISHED, 1);
            if let Some(field) = status.summary_field() {
                batch = batch.increment(run_key.clone(), field, 1);
            }
        } else {
            log::warn!("Run {} not found, summary not updated", run_id);
        }
        self.store.exec(batch).await?;

        let run: Option<Run> = if run_exists {
            get_record(self.store.as_ref(), &run_key).await?
        } else {
            None
        };
        log::debug!("Finished test {} in run {} as {}", test.story, run_id, status);

        self.events
            .publish_finish(&test, run.as_ref().map(|run| &run.summary))
            .await?;
        Ok(run)
    }

    /// Get a test result.
    pub async fn get_test(&self, run_id: &str, story: &StoryIdentifier) -> Result<Option<TestResult>> {
        self.load(&self.keys.test(run_id, story)).await
    }

    /// Every test result registered for a run (empty for an unknown run).
    pub async fn list_tests_for_run(&self, run_id: &str) -> Result<Vec<TestResult>> {
        let keys = self.store.set_members(&self.keys.run_tests(run_id)).await?;
        let tests = try_join_all(keys.iter().map(|key| self.load(key))).await?;
        Ok(tests.into_iter().flatten().collect())
    }

    /// Promote a test's current screenshot to the story's baseline.
    ///
    /// Overwrites any previous baseline for the story, clears the diff and marks
    /// the test passed.
    pub async fn accept_baseline(&self, run_id: &str, story: &StoryIdentifier) -> Result<TestResult> {
        let key = self.keys.test(run_id, story);
        let mut test = self
            .load(&key)
            .await?
            .ok_or_else(|| VizregError::TestNotFound(key.clone()))?;

        let current = test
            .current
            .clone()
            .ok_or_else(|| VizregError::NoCurrentImage(key.clone()))?;
        let bytes = self
            .blobs
            .read(&current)
            .await
            .ok_or_else(|| VizregError::NoCurrentImage(format!("{} ({} unreadable)", key, current)))?;

        let baseline = paths::baseline_path(story);
        self.blobs.write(&baseline, &bytes).await?;

        let stale_diff = test.diff.take();
        test.baseline = Some(baseline);
        test.diff_ratio = None;
        test.status = TestStatus::Passed;
        self.store.set(&key, serde_json::to_value(&test)?).await?;

        if let Some(diff) = stale_diff {
            self.blobs.delete(&diff).await;
        }

        log::info!("Accepted baseline for {} from run {}", story, run_id);
        self.events
            .publish_record(&EventRecord::baseline_accepted(&test))
            .await?;
        Ok(test)
    }

    /// Bytes of the story's current baseline, if any.
    pub async fn get_baseline(&self, story: &StoryIdentifier) -> Option<Vec<u8>> {
        self.blobs.read(&paths::baseline_path(story)).await
    }

    /// Bytes of any stored image referenced by a test result.
    pub async fn read_image(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.read(path).await
    }

    /// Baseline path of the story if a baseline image is stored.
    async fn linked_baseline(&self, story: &StoryIdentifier) -> Option<String> {
        let path = paths::baseline_path(story);
        if self.blobs.exists(&path).await { Some(path) } else { None }
    }

    async fn load(&self, key: &str) -> Result<Option<TestResult>> {
        get_record(self.store.as_ref(), key).await
    }

    /// Write any raw image bytes to their blob paths, producing a path-only patch.
    async fn persist_images(&self, run_id: &str, story: &StoryIdentifier, update: TestUpdate) -> Result<TestPatch> {
        Ok(TestPatch {
            status: update.status,
            baseline: self.persist_image(run_id, story, ImageKind::Baseline, update.baseline).await?,
            current: self.persist_image(run_id, story, ImageKind::Current, update.current).await?,
            diff: self.persist_image(run_id, story, ImageKind::Diff, update.diff).await?,
            diff_ratio: update.diff_ratio,
            message: update.message,
        })
    }

    async fn persist_image(
        &self,
        run_id: &str,
        story: &StoryIdentifier,
        kind: ImageKind,
        image: Option<ImageInput>,
    ) -> Result<Option<String>> {
        match image {
            None => Ok(None),
            Some(ImageInput::Path(path)) => Ok(Some(path)),
            Some(ImageInput::Bytes(bytes)) => {
                let path = match kind {
                    ImageKind::Baseline => paths::baseline_path(story),
                    ImageKind::Current => paths::current_path(run_id, story),
                    ImageKind::Diff => paths::diff_path(run_id, story),
                };
                self.blobs.write(&path, &bytes).await?;
                Ok(Some(path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunReason, Theme, Viewport, event_types};
    use crate::runs::RunManager;
    use crate::storage::{DEFAULT_CHANNEL_CAPACITY, FsBlobStore, JsonlStore, Op};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    /// Store whose first batch touching a counter fails.
    struct FlakyStore {
        inner: JsonlStore,
        failed: AtomicBool,
    }

    #[async_trait]
    impl MetadataStore for FlakyStore {
        async fn connect(&self) -> Result<()> {
            self.inner.connect().await
        }

        async fn disconnect(&self) -> Result<()> {
            self.inner.disconnect().await
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        async fn get(&self, key: &str) -> Result<Option<Value>> {
            self.inner.get(key).await
        }

        async fn set_members(&self, key: &str) -> Result<Vec<String>> {
            self.inner.set_members(key).await
        }

        async fn increment(&self, key: &str, field: &str, by: i64) -> Result<i64> {
            self.inner.increment(key, field, by).await
        }

        async fn exec(&self, batch: Batch) -> Result<()> {
            let counts = batch.ops().iter().any(|op| matches!(op, Op::Increment { .. }));
            if counts && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(VizregError::StorageUnavailable("connection reset".to_string()));
            }
            self.inner.exec(batch).await
        }

        async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>> {
            self.inner.subscribe(channel).await
        }
    }

    struct Fixture {
        store: Arc<JsonlStore>,
        blobs: Arc<FsBlobStore>,
        runs: RunManager<JsonlStore>,
        tests: TestManager<JsonlStore, FsBlobStore>,
        events: EventPublisher<JsonlStore>,
        _temp: TempDir,
    }

    async fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(JsonlStore::in_memory(DEFAULT_CHANNEL_CAPACITY));
        store.connect().await.unwrap();
        let blobs = Arc::new(FsBlobStore::new(temp.path()));
        let keys = KeySpace::default();
        let events = EventPublisher::new(store.clone(), keys.clone());
        Fixture {
            runs: RunManager::new(store.clone(), keys.clone(), events.clone()),
            tests: TestManager::new(store.clone(), blobs.clone(), keys, events.clone()),
            store,
            blobs,
            events,
            _temp: temp,
        }
    }

    fn story(id: &str) -> StoryIdentifier {
        StoryIdentifier::new(id, Theme::Light, Viewport::new(1280, 720))
    }

    #[tokio::test]
    async fn test_start_then_get_is_running_without_baseline() {
        let f = fixture().await;
        let run = f.runs.start_run(1).await.unwrap();

        f.tests.start_test(&run.id, story("a")).await.unwrap();
        let test = f.tests.get_test(&run.id, &story("a")).await.unwrap().unwrap();

        assert_eq!(test.status, TestStatus::Running);
        assert!(test.finished_at.is_none());
        assert!(test.baseline.is_none());
        assert_eq!(test.run_id, run.id);
    }

    #[tokio::test]
    async fn test_start_links_existing_baseline() {
        let f = fixture().await;
        let baseline = paths::baseline_path(&story("a"));
        f.blobs.write(&baseline, b"approved").await.unwrap();

        let test = f.tests.start_test("run-1", story("a")).await.unwrap();
        assert_eq!(test.baseline, Some(baseline));
    }

    #[tokio::test]
    async fn test_start_does_not_touch_summary() {
        let f = fixture().await;
        let run = f.runs.start_run(2).await.unwrap();
        f.tests.start_test(&run.id, story("a")).await.unwrap();
        f.tests.start_test(&run.id, story("a")).await.unwrap();

        let stored = f.runs.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.summary, run.summary);
        assert_eq!(f.tests.list_tests_for_run(&run.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_tests_for_empty_run() {
        let f = fixture().await;
        let run = f.runs.start_run(0).await.unwrap();
        assert!(f.tests.list_tests_for_run(&run.id).await.unwrap().is_empty());
        assert!(f.tests.list_tests_for_run("run-unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_persists_bytes_and_merges() {
        let f = fixture().await;
        let mut rx = f.events.subscribe_run("run-1").await.unwrap();
        f.tests.start_test("run-1", story("a")).await.unwrap();
        f.tests
            .update_test("run-1", &story("a"), TestUpdate::new().with_message("capturing"))
            .await
            .unwrap();
        f.tests
            .update_test(
                "run-1",
                &story("a"),
                TestUpdate::new().with_image(ImageKind::Current, b"shot".to_vec()),
            )
            .await
            .unwrap();

        let test = f.tests.get_test("run-1", &story("a")).await.unwrap().unwrap();
        let current = paths::current_path("run-1", &story("a"));
        assert_eq!(test.current.as_deref(), Some(current.as_str()));
        assert_eq!(test.message.as_deref(), Some("capturing"));
        assert_eq!(test.status, TestStatus::Running);
        assert_eq!(f.tests.read_image(&current).await, Some(b"shot".to_vec()));

        assert_eq!(rx.next().await.unwrap().event_type, event_types::TEST_STARTED);
        assert_eq!(rx.next().await.unwrap().event_type, event_types::TEST_UPDATED);
        let update = rx.next().await.unwrap();
        assert_eq!(update.event_type, event_types::TEST_UPDATED);
        assert_eq!(update.payload["update"]["current"], current.as_str());
        assert!(update.payload["update"].get("message").is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_test_fails() {
        let f = fixture().await;
        let err = f
            .tests
            .update_test("run-1", &story("a"), TestUpdate::new().with_diff_ratio(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, VizregError::TestNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_after_finish_fails() {
        let f = fixture().await;
        f.tests.start_test("run-1", story("a")).await.unwrap();
        f.tests
            .finish_test("run-1", TestOutcome::new(story("a"), TestStatus::Passed))
            .await
            .unwrap();

        let err = f
            .tests
            .update_test("run-1", &story("a"), TestUpdate::new().with_message("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, VizregError::AlreadyFinished(_)));
    }

    #[tokio::test]
    async fn test_finish_advances_summary() {
        let f = fixture().await;
        let run = f.runs.start_run(3).await.unwrap();
        for id in ["a", "b", "c"] {
            f.tests.start_test(&run.id, story(id)).await.unwrap();
        }

        f.tests
            .finish_test(&run.id, TestOutcome::new(story("a"), TestStatus::Passed))
            .await
            .unwrap();
        f.tests
            .finish_test(&run.id, TestOutcome::new(story("b"), TestStatus::New))
            .await
            .unwrap();
        let run = f
            .tests
            .finish_test(
                &run.id,
                TestOutcome::new(story("c"), TestStatus::Failed)
                    .with_image(ImageKind::Diff, b"diff".to_vec())
                    .with_diff_ratio(12.5)
                    .with_message("pixels differ"),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(run.summary.total, 3);
        assert_eq!(run.summary.finished, 3);
        assert_eq!(run.summary.passed, 1);
        assert_eq!(run.summary.new, 1);
        assert_eq!(run.summary.failed, 1);

        let failed = f.tests.get_test(&run.id, &story("c")).await.unwrap().unwrap();
        assert_eq!(failed.status, TestStatus::Failed);
        assert_eq!(failed.diff_ratio, Some(12.5));
        assert!(failed.finished_at.is_some());
        assert_eq!(f.tests.read_image(failed.diff.as_deref().unwrap()).await, Some(b"diff".to_vec()));
    }

    #[tokio::test]
    async fn test_finish_emits_test_finished_then_summary() {
        let f = fixture().await;
        let run = f.runs.start_run(1).await.unwrap();
        f.tests.start_test(&run.id, story("a")).await.unwrap();
        let mut rx = f.events.subscribe_all().await.unwrap();

        f.tests
            .finish_test(&run.id, TestOutcome::new(story("a"), TestStatus::Passed))
            .await
            .unwrap();

        let first = rx.next().await.unwrap();
        let second = rx.next().await.unwrap();
        assert_eq!(first.event_type, event_types::TEST_FINISHED);
        assert_eq!(second.event_type, event_types::RUN_SUMMARY);
        assert_eq!(second.payload["summary"]["finished"], 1);
    }

    #[tokio::test]
    async fn test_finish_without_run_skips_summary() {
        let f = fixture().await;
        let mut rx = f.events.subscribe_run("run-orphan").await.unwrap();
        f.tests.start_test("run-orphan", story("a")).await.unwrap();

        let run = f
            .tests
            .finish_test("run-orphan", TestOutcome::new(story("a"), TestStatus::Passed))
            .await
            .unwrap();

        assert!(run.is_none());
        assert!(f.store.get(&KeySpace::default().run("run-orphan")).await.unwrap().is_none());
        let test = f.tests.get_test("run-orphan", &story("a")).await.unwrap().unwrap();
        assert_eq!(test.status, TestStatus::Passed);

        assert_eq!(rx.next().await.unwrap().event_type, event_types::TEST_STARTED);
        assert_eq!(rx.next().await.unwrap().event_type, event_types::TEST_FINISHED);
        assert!(rx.try_next().is_none());
    }

    #[tokio::test]
    async fn test_finish_twice_is_rejected_without_double_count() {
        let f = fixture().await;
        let run = f.runs.start_run(1).await.unwrap();
        f.tests.start_test(&run.id, story("a")).await.unwrap();
        f.tests
            .finish_test(&run.id, TestOutcome::new(story("a"), TestStatus::Passed))
            .await
            .unwrap();

        let err = f
            .tests
            .finish_test(&run.id, TestOutcome::new(story("a"), TestStatus::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, VizregError::AlreadyFinished(_)));

        let stored = f.runs.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.summary.finished, 1);
        assert_eq!(stored.summary.failed, 0);
    }

    #[tokio::test]
    async fn test_finish_with_running_status_is_invalid() {
        let f = fixture().await;
        let err = f
            .tests
            .finish_test("run-1", TestOutcome::new(story("a"), TestStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, VizregError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_finish_unstarted_test_is_registered() {
        let f = fixture().await;
        let run = f.runs.start_run(1).await.unwrap();

        f.tests
            .finish_test(&run.id, TestOutcome::new(story("late"), TestStatus::New))
            .await
            .unwrap();

        let listed = f.tests.list_tests_for_run(&run.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, TestStatus::New);
    }

    #[tokio::test]
    async fn test_accept_baseline_promotes_current() {
        let f = fixture().await;
        let run = f.runs.start_run(1).await.unwrap();
        f.blobs
            .write(&paths::baseline_path(&story("a")), b"old-baseline")
            .await
            .unwrap();
        f.tests.start_test(&run.id, story("a")).await.unwrap();
        f.tests
            .finish_test(
                &run.id,
                TestOutcome::new(story("a"), TestStatus::Failed)
                    .with_image(ImageKind::Current, b"new-look".to_vec())
                    .with_image(ImageKind::Diff, b"diff".to_vec())
                    .with_diff_ratio(3.2),
            )
            .await
            .unwrap();
        let diff = paths::diff_path(&run.id, &story("a"));

        let accepted = f.tests.accept_baseline(&run.id, &story("a")).await.unwrap();

        assert_eq!(accepted.status, TestStatus::Passed);
        assert_eq!(accepted.baseline, Some(paths::baseline_path(&story("a"))));
        assert!(accepted.diff.is_none());
        assert!(accepted.diff_ratio.is_none());
        assert!(accepted.finished_at.is_some());
        assert_eq!(f.tests.get_baseline(&story("a")).await, Some(b"new-look".to_vec()));
        assert_eq!(f.blobs.read(&diff).await, None);

        let stored = f.tests.get_test(&run.id, &story("a")).await.unwrap().unwrap();
        assert_eq!(stored, accepted);
    }

    #[tokio::test]
    async fn test_accept_baseline_without_current_fails() {
        let f = fixture().await;
        f.tests.start_test("run-1", story("a")).await.unwrap();

        let err = f.tests.accept_baseline("run-1", &story("a")).await.unwrap_err();
        assert!(matches!(err, VizregError::NoCurrentImage(_)));
    }

    #[tokio::test]
    async fn test_accept_baseline_unknown_test_fails() {
        let f = fixture().await;
        let err = f.tests.accept_baseline("run-1", &story("a")).await.unwrap_err();
        assert!(matches!(err, VizregError::TestNotFound(_)));
    }

    #[tokio::test]
    async fn test_accepted_baseline_is_linked_by_next_run() {
        let f = fixture().await;
        let first = f.runs.start_run(1).await.unwrap();
        f.tests.start_test(&first.id, story("a")).await.unwrap();
        f.tests
            .finish_test(
                &first.id,
                TestOutcome::new(story("a"), TestStatus::New).with_image(ImageKind::Current, b"v1".to_vec()),
            )
            .await
            .unwrap();
        f.tests.accept_baseline(&first.id, &story("a")).await.unwrap();
        f.runs.finish_run(&first.id, RunReason::Passed).await.unwrap();

        let second = f.runs.start_run(1).await.unwrap();
        let test = f.tests.start_test(&second.id, story("a")).await.unwrap();
        assert_eq!(test.baseline, Some(paths::baseline_path(&story("a"))));
    }

    #[tokio::test]
    async fn test_operations_fail_when_disconnected() {
        let f = fixture().await;
        f.store.disconnect().await.unwrap();

        let err = f.tests.start_test("run-1", story("a")).await.unwrap_err();
        assert!(matches!(err, VizregError::StorageUnavailable(_)));
        let err = f.tests.get_test("run-1", &story("a")).await.unwrap_err();
        assert!(matches!(err, VizregError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_update_cannot_reach_terminal_status() {
        let f = fixture().await;
        let run = f.runs.start_run(1).await.unwrap();
        f.tests.start_test(&run.id, story("a")).await.unwrap();

        let err = f
            .tests
            .update_test(&run.id, &story("a"), TestUpdate::new().with_status(TestStatus::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, VizregError::InvalidState(_)));

        f.tests
            .update_test(&run.id, &story("a"), TestUpdate::new().with_status(TestStatus::Running))
            .await
            .unwrap();
        let test = f.tests.get_test(&run.id, &story("a")).await.unwrap().unwrap();
        assert_eq!(test.status, TestStatus::Running);
        assert!(test.finished_at.is_none());
        let stored = f.runs.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.summary.failed, 0);
    }

    #[tokio::test]
    async fn test_finish_unstarted_test_links_baseline() {
        let f = fixture().await;
        let run = f.runs.start_run(1).await.unwrap();
        let baseline = paths::baseline_path(&story("a"));
        f.blobs.write(&baseline, b"approved").await.unwrap();

        f.tests
            .finish_test(&run.id, TestOutcome::new(story("a"), TestStatus::Passed))
            .await
            .unwrap();

        let test = f.tests.get_test(&run.id, &story("a")).await.unwrap().unwrap();
        assert_eq!(test.baseline, Some(baseline));
    }

    #[tokio::test]
    async fn test_failed_finish_can_be_retried() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FlakyStore {
            inner: JsonlStore::in_memory(DEFAULT_CHANNEL_CAPACITY),
            failed: AtomicBool::new(false),
        });
        store.connect().await.unwrap();
        let keys = KeySpace::default();
        let events = EventPublisher::new(store.clone(), keys.clone());
        let runs = RunManager::new(store.clone(), keys.clone(), events.clone());
        let tests = TestManager::new(store.clone(), Arc::new(FsBlobStore::new(temp.path())), keys, events);

        let run = runs.start_run(1).await.unwrap();
        tests.start_test(&run.id, story("a")).await.unwrap();

        let err = tests
            .finish_test(&run.id, TestOutcome::new(story("a"), TestStatus::Passed))
            .await
            .unwrap_err();
        assert!(matches!(err, VizregError::StorageUnavailable(_)));
        let test = tests.get_test(&run.id, &story("a")).await.unwrap().unwrap();
        assert_eq!(test.status, TestStatus::Running);
        assert!(test.finished_at.is_none());

        let summary = tests
            .finish_test(&run.id, TestOutcome::new(story("a"), TestStatus::Passed))
            .await
            .unwrap()
            .unwrap()
            .summary;
        assert_eq!(summary.finished, 1);
        assert_eq!(summary.passed, 1);
    }
}
