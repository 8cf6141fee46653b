//! Story identifiers: the (story, theme, viewport) tuple naming a renderable UI state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Color theme a story is rendered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser viewport in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Names one rendering of a story, independent of any run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoryIdentifier {
    pub story_id: String,
    pub theme: Theme,
    pub viewport: Viewport,
}

impl StoryIdentifier {
    pub fn new(story_id: impl Into<String>, theme: Theme, viewport: Viewport) -> Self {
        Self {
            story_id: story_id.into(),
            theme,
            viewport,
        }
    }
}

impl fmt::Display for StoryIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} {}]", self.story_id, self.theme, self.viewport)
    }
}
