//! Analysis request handed to the external agent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prompts longer than this many characters are piped through a temp file.
pub const DEFAULT_LARGE_PROMPT_THRESHOLD: usize = 1000;

/// How a prompt is delivered to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    /// Passed as a command argument.
    Small,
    /// Written to a temporary file piped into stdin.
    Large,
}

impl SizeClass {
    /// Classifies a prompt by its length in characters.
    pub fn for_prompt(prompt: &str, threshold: usize) -> Self {
        if prompt.chars().count() > threshold {
            Self::Large
        } else {
            Self::Small
        }
    }
}

/// A single analysis request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequest {
    prompt: String,
    input_file: Option<PathBuf>,
    output_file: PathBuf,
}

impl AgentRequest {
    /// Creates a request whose raw agent output is persisted to `output_file`.
    pub fn new(prompt: impl Into<String>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            input_file: None,
            output_file: output_file.into(),
        }
    }

    /// Attaches a file whose contents are piped to the agent's stdin.
    pub fn with_input_file(mut self, input_file: impl Into<PathBuf>) -> Self {
        self.input_file = Some(input_file.into());
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn input_file(&self) -> Option<&Path> {
        self.input_file.as_deref()
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    /// Size class using the given character threshold.
    pub fn size_class(&self, threshold: usize) -> SizeClass {
        SizeClass::for_prompt(&self.prompt, threshold)
    }
}
