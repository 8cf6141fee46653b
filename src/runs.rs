//! Run lifecycle: opening, finalizing and querying runs.
//!
//! Summary counters are not written here after creation. They are advanced by
//! `TestManager::finish_test` through the store's atomic increments.

use std::sync::Arc;

use futures::future::try_join_all;

use crate::domain::{EventRecord, Run, RunReason, finish_fields};
use crate::error::{Result, VizregError};
use crate::events::EventPublisher;
use crate::id::generate_run_id;
use crate::paths::KeySpace;
use crate::storage::{Batch, MetadataStore, get_record};

/// Owns creation and finalization of runs.
pub struct RunManager<S: MetadataStore> {
    store: Arc<S>,
    keys: KeySpace,
    events: EventPublisher<S>,
}

impl<S: MetadataStore> RunManager<S> {
    pub fn new(store: Arc<S>, keys: KeySpace, events: EventPublisher<S>) -> Self {
        Self { store, keys, events }
    }

    /// Open a new run expecting `expected_tests` results (0 if unknown).
    pub async fn start_run(&self, expected_tests: u64) -> Result<Run> {
        let run = Run::new(generate_run_id(), expected_tests);

        let batch = Batch::new()
            .set_record(self.keys.run(&run.id), &run)?
            .set_add(self.keys.runs_index(), run.id.clone());
        self.store.exec(batch).await?;

        log::info!("Started run {} expecting {} tests", run.id, expected_tests);
        self.events.publish_record(&EventRecord::run_started(&run)).await?;
        Ok(run)
    }

    /// Finalize a run.
    ///
    /// Only the finish fields are written, so counter increments from tests
    /// finishing at the same time are kept. A run missing from the store is
    /// created with a zeroed summary first so finalization never fails on it.
    /// A second call overwrites the reason and recomputes the duration.
    pub async fn finish_run(&self, run_id: &str, reason: RunReason) -> Result<Run> {
        let run_key = self.keys.run(run_id);
        let mut batch = Batch::new();
        let mut stamped = match self.get_run(run_id).await? {
            Some(run) => run,
            None => {
                log::warn!("Finishing unknown run {}, synthesizing an empty one", run_id);
                let run = Run::new(run_id, 0);
                batch = batch.set_if_absent(run_key.clone(), &run)?;
                run
            }
        };
        stamped.finish(reason);

        let batch = batch
            .set_field(run_key.clone(), finish_fields::FINISHED_AT, &stamped.finished_at)?
            .set_field(run_key.clone(), finish_fields::DURATION_MS, &stamped.duration_ms)?
            .set_field(run_key.clone(), finish_fields::REASON, &stamped.reason)?
            .set_add(self.keys.runs_index(), run_id);
        self.store.exec(batch).await?;

        let run: Run = get_record(self.store.as_ref(), &run_key)
            .await?
            .ok_or_else(|| VizregError::Storage(format!("run {} missing after finish", run_id)))?;

        log::info!(
            "Finished run {} ({}): {}/{} finished, {} passed, {} failed, {} new",
            run.id,
            reason,
            run.summary.finished,
            run.summary.total,
            run.summary.passed,
            run.summary.failed,
            run.summary.new
        );

        self.events.publish_record(&EventRecord::run_finished(&run)).await?;
        self.events
            .publish_record(&EventRecord::run_summary(&run.id, &run.summary))
            .await?;
        Ok(run)
    }

    /// Get a run by ID.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        get_record(self.store.as_ref(), &self.keys.run(run_id)).await
    }

    /// List every indexed run, newest first.
    pub async fn list_all_runs(&self) -> Result<Vec<Run>> {
        let mut ids = self.store.set_members(&self.keys.runs_index()).await?;
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let runs = try_join_all(ids.iter().map(|id| self.get_run(id))).await?;
        Ok(runs.into_iter().flatten().collect())
    }
}
