//! Domain types for Vizreg
//!
//! - Run: one execution session with its aggregate summary
//! - TestResult: outcome of one story rendering within a run
//! - StoryIdentifier: the (story, theme, viewport) tuple naming a rendering
//! - EventRecord: ephemeral progress messages

pub mod event;
pub mod run;
pub mod story;
pub mod test_result;

pub use event::{EventRecord, event_types};
pub use run::{Run, RunEnvironment, RunReason, RunSummary, finish_fields, summary_fields};
pub use story::{StoryIdentifier, Theme, Viewport};
pub use test_result::{ImageInput, ImageKind, TestOutcome, TestPatch, TestResult, TestStatus, TestUpdate};
