//! Harness - the explicitly owned entry point for test executors
//!
//! A Harness owns the store handles and both lifecycle managers. Connection
//! state belongs to the harness's store, so independent harnesses never share
//! a hidden global connection.

use std::sync::Arc;

use crate::config::HarnessConfig;
use crate::error::Result;
use crate::events::{EventPublisher, EventStream};
use crate::paths::KeySpace;
use crate::results::TestManager;
use crate::runs::RunManager;
use crate::storage::{BlobStore, FsBlobStore, JsonlStore, MetadataStore};

/// Type alias for the harness built from configuration
pub type LocalHarness = Harness<JsonlStore, FsBlobStore>;

/// Run and test lifecycle over a metadata store and a blob store.
pub struct Harness<S: MetadataStore, B: BlobStore> {
    store: Arc<S>,
    blobs: Arc<B>,
    keys: KeySpace,
    events: EventPublisher<S>,
    runs: RunManager<S>,
    tests: TestManager<S, B>,
}

impl<S: MetadataStore, B: BlobStore> Harness<S, B> {
    pub fn new(store: Arc<S>, blobs: Arc<B>, keys: KeySpace) -> Self {
        let events = EventPublisher::new(store.clone(), keys.clone());
        let runs = RunManager::new(store.clone(), keys.clone(), events.clone());
        let tests = TestManager::new(store.clone(), blobs.clone(), keys.clone(), events.clone());
        Self {
            store,
            blobs,
            keys,
            events,
            runs,
            tests,
        }
    }

    /// Connect the metadata store. Calling this on a connected harness is a no-op.
    pub async fn connect(&self) -> Result<()> {
        self.store.connect().await
    }

    /// Disconnect the metadata store. Subsequent operations fail with `StorageUnavailable`.
    pub async fn disconnect(&self) -> Result<()> {
        self.store.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_connected()
    }

    /// Run lifecycle operations
    pub fn runs(&self) -> &RunManager<S> {
        &self.runs
    }

    /// Test lifecycle operations
    pub fn tests(&self) -> &TestManager<S, B> {
        &self.tests
    }

    pub fn events(&self) -> &EventPublisher<S> {
        &self.events
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn blobs(&self) -> &Arc<B> {
        &self.blobs
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Listen to the events of one run.
    pub async fn subscribe_run(&self, run_id: &str) -> Result<EventStream> {
        self.events.subscribe_run(run_id).await
    }

    /// Listen to the events of every run.
    pub async fn subscribe_all(&self) -> Result<EventStream> {
        self.events.subscribe_all().await
    }
}

impl LocalHarness {
    /// Build a harness from configuration. Nothing is opened until `connect`.
    pub fn from_config(config: &HarnessConfig) -> Self {
        let store = match &config.journal {
            Some(path) => JsonlStore::open(path, config.event_buffer),
            None => JsonlStore::in_memory(config.event_buffer),
        };
        let blobs = FsBlobStore::new(&config.images_dir);
        Self::new(Arc::new(store), Arc::new(blobs), KeySpace::new(config.key_prefix.clone()))
    }
}
