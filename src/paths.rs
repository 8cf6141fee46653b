//! Storage keys and image paths.
//!
//! Pure functions from run IDs and story identifiers to metadata keys, pub/sub
//! channel names and blob paths. Nothing here depends on process state, so the
//! same inputs map to the same locations across restarts.
//!
//! Collision freedom comes from escaping: every byte outside `[A-Za-z0-9.-]` in a
//! caller-supplied component becomes `%XX`, which leaves `_`, `:` and `/` free to
//! act as unambiguous separators.
//!
//! Inputs are not validated. Empty story IDs or zero-sized viewports are the
//! caller's responsibility.

use crate::domain::StoryIdentifier;

/// Image file extension for every stored image
pub const IMAGE_EXT: &str = "png";

/// Escape one caller-supplied component.
pub fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Stable key for a story rendering, independent of any run.
///
/// Format: `{story_id}_{theme}_{width}x{height}`
pub fn story_key(story: &StoryIdentifier) -> String {
    format!(
        "{}_{}_{}x{}",
        escape_component(&story.story_id),
        story.theme.as_str(),
        story.viewport.width,
        story.viewport.height
    )
}

/// Blob path of the approved baseline for a story.
pub fn baseline_path(story: &StoryIdentifier) -> String {
    format!("baselines/{}.{}", story_key(story), IMAGE_EXT)
}

/// Blob path of the screenshot captured for a story in a run.
pub fn current_path(run_id: &str, story: &StoryIdentifier) -> String {
    format!("runs/{}/current/{}.{}", escape_component(run_id), story_key(story), IMAGE_EXT)
}

/// Blob path of the difference image for a story in a run.
pub fn diff_path(run_id: &str, story: &StoryIdentifier) -> String {
    format!("runs/{}/diff/{}.{}", escape_component(run_id), story_key(story), IMAGE_EXT)
}

/// Namespaced metadata keys and channel names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("vizreg")
    }
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Set of every run ID ever started
    pub fn runs_index(&self) -> String {
        format!("{}:runs", self.prefix)
    }

    /// Run document
    pub fn run(&self, run_id: &str) -> String {
        format!("{}:run:{}", self.prefix, escape_component(run_id))
    }

    /// Set of test keys belonging to a run
    pub fn run_tests(&self, run_id: &str) -> String {
        format!("{}:run:{}:tests", self.prefix, escape_component(run_id))
    }

    /// Test result document
    pub fn test(&self, run_id: &str, story: &StoryIdentifier) -> String {
        format!("{}:test:{}:{}", self.prefix, escape_component(run_id), story_key(story))
    }

    /// Channel carrying the events of one run
    pub fn run_channel(&self, run_id: &str) -> String {
        format!("{}:events:{}", self.prefix, escape_component(run_id))
    }

    /// Channel carrying the events of every run
    pub fn global_channel(&self) -> String {
        format!("{}:events", self.prefix)
    }
}
