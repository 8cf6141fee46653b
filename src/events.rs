//! Event fan-out to per-run and global channels.
//!
//! Every event goes to two channels, the run's own and the global one, in a
//! single store batch so no subscriber observes a partial fan-out. Delivery is
//! at-most-once: a subscriber that is not listening, or falls too far behind,
//! misses events.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::domain::{EventRecord, RunSummary, TestResult};
use crate::error::Result;
use crate::paths::KeySpace;
use crate::storage::{Batch, MetadataStore};

/// Publishes lifecycle events through the metadata store's pub/sub.
pub struct EventPublisher<S: MetadataStore> {
    store: Arc<S>,
    keys: KeySpace,
}

impl<S: MetadataStore> Clone for EventPublisher<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            keys: self.keys.clone(),
        }
    }
}

impl<S: MetadataStore> EventPublisher<S> {
    pub fn new(store: Arc<S>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Wrap `payload` in an event and publish it.
    pub async fn publish(&self, event_type: &str, run_id: &str, payload: Value) -> Result<EventRecord> {
        let event = EventRecord::new(event_type, run_id, payload);
        self.send(std::slice::from_ref(&event)).await?;
        Ok(event)
    }

    /// Publish a prepared event.
    pub async fn publish_record(&self, event: &EventRecord) -> Result<()> {
        self.send(std::slice::from_ref(event)).await
    }

    /// Publish the outcome of a finished test.
    ///
    /// `test:finished` always precedes `run:summary`, and both travel in one
    /// batch. Without a summary (the run document is missing) only
    /// `test:finished` is sent.
    pub async fn publish_finish(&self, test: &TestResult, summary: Option<&RunSummary>) -> Result<()> {
        let mut events = vec![EventRecord::test_finished(test)];
        if let Some(summary) = summary {
            events.push(EventRecord::run_summary(&test.run_id, summary));
        }
        self.send(&events).await
    }

    async fn send(&self, events: &[EventRecord]) -> Result<()> {
        let mut batch = Batch::new();
        for event in events {
            let message = serde_json::to_string(event)?;
            batch = batch
                .publish(self.keys.run_channel(&event.run_id), message.clone())
                .publish(self.keys.global_channel(), message);
        }
        self.store.exec(batch).await?;
        for event in events {
            log::debug!("Published {} for {}", event.event_type, event.run_id);
        }
        Ok(())
    }

    /// Listen to the events of one run.
    pub async fn subscribe_run(&self, run_id: &str) -> Result<EventStream> {
        let rx = self.store.subscribe(&self.keys.run_channel(run_id)).await?;
        Ok(EventStream { rx })
    }

    /// Listen to the events of every run.
    pub async fn subscribe_all(&self) -> Result<EventStream> {
        let rx = self.store.subscribe(&self.keys.global_channel()).await?;
        Ok(EventStream { rx })
    }
}

/// Decoded view over a channel subscription.
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<String>,
}

impl EventStream {
    /// Next event, or None once the store disconnects.
    ///
    /// Messages dropped because this subscriber lagged are skipped, as are
    /// messages that do not decode as events.
    pub async fn next(&mut self) -> Option<EventRecord> {
        loop {
            match self.rx.recv().await {
                Ok(message) => match serde_json::from_str(&message) {
                    Ok(event) => return Some(event),
                    Err(e) => log::warn!("Dropping undecodable event: {}", e),
                },
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Event subscriber lagged, {} events missed", missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued.
    pub fn try_next(&mut self) -> Option<EventRecord> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => match serde_json::from_str(&message) {
                    Ok(event) => return Some(event),
                    Err(e) => log::warn!("Dropping undecodable event: {}", e),
                },
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    log::warn!("Event subscriber lagged, {} events missed", missed);
                }
                Err(_) => return None,
            }
        }
    }
}
