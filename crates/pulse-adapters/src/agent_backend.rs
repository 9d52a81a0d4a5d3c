//! Command construction for agent CLIs.
//!
//! Small prompts travel as the last command argument, optionally with an
//! input file connected to stdin. Prompts above the size threshold are written
//! to a scoped temporary file that becomes the agent's stdin; the file lives
//! exactly as long as the [`AgentCommand`] that owns it.

use pulse_proto::{AgentRequest, DEFAULT_LARGE_PROMPT_THRESHOLD, SizeClass};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// How the prompt reaches the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDelivery {
    /// Prompt is the final argv entry.
    Argument,
    /// Prompt is piped from a temporary file.
    TempFile,
}

/// An agent CLI and the flags it is always invoked with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBackend {
    /// The executable to run.
    pub command: String,
    /// Standard flags placed before the prompt.
    #[serde(default)]
    pub args: Vec<String>,
    /// Prompts longer than this many characters use piped-file mode.
    #[serde(default = "default_threshold")]
    pub large_prompt_threshold: usize,
}

fn default_threshold() -> usize {
    DEFAULT_LARGE_PROMPT_THRESHOLD
}

impl Default for AgentBackend {
    fn default() -> Self {
        Self::kilocode()
    }
}

impl AgentBackend {
    /// KiloCode in non-interactive ask mode with JSON event output.
    pub fn kilocode() -> Self {
        Self::custom("kilocode", ["-m", "ask", "--auto", "--json"])
    }

    /// Claude CLI in print mode with JSON output.
    pub fn claude() -> Self {
        Self::custom(
            "claude",
            [
                "--dangerously-skip-permissions",
                "--print",
                "--output-format",
                "json",
            ],
        )
    }

    /// An arbitrary command with fixed leading arguments.
    pub fn custom<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            large_prompt_threshold: DEFAULT_LARGE_PROMPT_THRESHOLD,
        }
    }

    /// Overrides the direct/piped size threshold.
    pub fn with_large_prompt_threshold(mut self, threshold: usize) -> Self {
        self.large_prompt_threshold = threshold;
        self
    }

    /// Builds the concrete command for a request.
    ///
    /// In piped-file mode the prompt is written to disk here; the returned
    /// command removes the file when dropped.
    pub fn build_command(&self, request: &AgentRequest) -> io::Result<AgentCommand> {
        let mut args = self.args.clone();

        match request.size_class(self.large_prompt_threshold) {
            SizeClass::Small => {
                args.push(escape_argument(request.prompt()));
                Ok(AgentCommand {
                    program: self.command.clone(),
                    args,
                    stdin: request.input_file().map(Path::to_path_buf),
                    delivery: PromptDelivery::Argument,
                    temp_file: None,
                })
            }
            SizeClass::Large => {
                if let Some(input) = request.input_file() {
                    warn!(
                        input = %input.display(),
                        "Input file ignored: large prompts occupy stdin"
                    );
                }

                let mut temp_file = tempfile::Builder::new()
                    .prefix("pulse-prompt-")
                    .suffix(".txt")
                    .tempfile()?;
                temp_file.write_all(request.prompt().as_bytes())?;
                temp_file.flush()?;

                debug!(
                    chars = request.prompt().chars().count(),
                    path = %temp_file.path().display(),
                    "Using file-based execution for large prompt"
                );

                Ok(AgentCommand {
                    program: self.command.clone(),
                    args,
                    stdin: Some(temp_file.path().to_path_buf()),
                    delivery: PromptDelivery::TempFile,
                    temp_file: Some(temp_file),
                })
            }
        }
    }
}

/// argv entries cannot carry NUL bytes; everything else is passed verbatim
/// since no shell is involved.
fn escape_argument(prompt: &str) -> String {
    prompt.replace('\0', "")
}

/// A fully-resolved agent invocation.
#[derive(Debug)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    /// File connected to the child's stdin, if any.
    pub stdin: Option<PathBuf>,
    pub delivery: PromptDelivery,
    /// Keeps the piped prompt on disk until the command is dropped.
    temp_file: Option<NamedTempFile>,
}

impl AgentCommand {
    /// Path of the temporary prompt file in piped-file mode.
    pub fn temp_file_path(&self) -> Option<&Path> {
        self.temp_file.as_ref().map(NamedTempFile::path)
    }
}
