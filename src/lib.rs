//! Vizreg - run and test lifecycle storage for visual regression testing
//!
//! Vizreg owns the authoritative state of test runs and their individual test
//! results. It persists that state and the associated screenshots, keeps each
//! run's summary counters consistent while many tests finish concurrently,
//! promotes screenshots to baselines, and fans out progress events.

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod harness;
pub mod id;
pub mod paths;
pub mod results;
pub mod runs;
pub mod storage;

pub use config::HarnessConfig;
pub use error::{Result, VizregError};
pub use harness::{Harness, LocalHarness};
