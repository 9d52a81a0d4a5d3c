//! Process invoker for running prompts through an agent CLI.
//!
//! Spawns the agent, collects its output into a bounded buffer and races the
//! whole run against a hard deadline. Either the deadline or a buffer overflow
//! terminates the child (SIGTERM, then SIGKILL after a grace period) and the
//! call fails; other in-flight invocations are unaffected.

use crate::agent_backend::AgentBackend;
use crate::agent_stream::{AgentEvent, parse_events};
use async_trait::async_trait;
use pulse_proto::{AgentError, AgentRequest};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Bytes of stderr kept for diagnostics; the rest is drained and discarded.
pub const STDERR_CAPTURE_LIMIT: usize = 1000;

const READ_CHUNK_SIZE: usize = 8 * 1024;
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Limits applied to every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokerConfig {
    /// Hard deadline for the whole run, spawn to exit.
    pub timeout: Duration,
    /// Ceiling on captured stdout bytes.
    pub max_buffer_size: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_buffer_size: 10 * 1024 * 1024,
        }
    }
}

/// Everything captured from a finished agent run.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    pub stdout: String,
    /// First [`STDERR_CAPTURE_LIMIT`] bytes of stderr.
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl RawOutput {
    /// Output captured from a run that exited with code 0.
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            elapsed: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Lazily classified stdout lines. Each call starts a fresh sequence.
    pub fn events(&self) -> impl Iterator<Item = AgentEvent> + '_ {
        parse_events(&self.stdout)
    }
}

/// Byte buffer that refuses to grow past a fixed ceiling.
#[derive(Debug)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Appends a chunk, failing as soon as the cumulative size exceeds the limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), AgentError> {
        if self.bytes.len() + chunk.len() > self.limit {
            return Err(AgentError::BufferOverflow { limit: self.limit });
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the captured bytes, replacing invalid UTF-8.
    pub fn into_string(self) -> String {
        String::from_utf8(self.bytes)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
    }
}

/// Runs a request against the external agent.
///
/// Implemented by [`ProcessInvoker`]; tests substitute scripted runners.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, request: &AgentRequest) -> Result<RawOutput, AgentError>;
}

/// Spawns agent subprocesses with a deadline and a bounded output buffer.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    backend: AgentBackend,
    config: InvokerConfig,
}

impl ProcessInvoker {
    pub fn new(backend: AgentBackend, config: InvokerConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &AgentBackend {
        &self.backend
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Executes the request and returns the captured output.
    ///
    /// A non-zero exit code is reported in [`RawOutput::exit_code`] but only
    /// becomes an error when the agent also produced no stdout at all.
    pub async fn execute(&self, request: &AgentRequest) -> Result<RawOutput, AgentError> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;

        // Owns the temp prompt file (if any) until this function returns.
        let agent_command = self.backend.build_command(request)?;

        let stdin = match &agent_command.stdin {
            Some(path) => Stdio::from(open_stdin(path, &agent_command.program).await?),
            None => Stdio::null(),
        };

        let mut command = Command::new(&agent_command.program);
        command
            .args(&agent_command.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| AgentError::Spawn {
            command: agent_command.program.clone(),
            source,
        })?;

        debug!(
            pid = child.id(),
            program = %agent_command.program,
            delivery = ?agent_command.delivery,
            "Agent process spawned"
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let captured = tokio::select! {
            result = capture_output(stdout, stderr, self.config.max_buffer_size) => result,
            () = tokio::time::sleep_until(deadline) => Err(self.timeout_error()),
        };

        let (stdout, stderr) = match captured {
            Ok(captured) => captured,
            Err(e) => {
                warn!(
                    pid = child.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Terminating agent process"
                );
                terminate_child(&mut child).await;
                return Err(e);
            }
        };

        // stdout closed; the process still has to exit before the deadline.
        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(pid = child.id(), "Agent closed stdout but did not exit before deadline");
                terminate_child(&mut child).await;
                return Err(self.timeout_error());
            }
        };

        let elapsed = started.elapsed();
        info!(
            exit_code = status.code(),
            bytes = stdout.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Agent process finished"
        );

        if !status.success() && stdout.trim().is_empty() {
            return Err(AgentError::process_failure(status.code(), stderr));
        }

        Ok(RawOutput {
            stdout,
            stderr,
            exit_code: status.code(),
            elapsed,
        })
    }

    fn timeout_error(&self) -> AgentError {
        AgentError::Timeout {
            timeout_ms: self.config.timeout.as_millis() as u64,
        }
    }
}

#[async_trait]
impl AgentRunner for ProcessInvoker {
    async fn run(&self, request: &AgentRequest) -> Result<RawOutput, AgentError> {
        self.execute(request).await
    }
}

/// Opens the file piped to the agent's stdin.
///
/// A file that cannot be opened is a spawn failure, not a retryable I/O error.
async fn open_stdin(path: &Path, program: &str) -> Result<std::fs::File, AgentError> {
    let spawn_error = |e: std::io::Error| AgentError::Spawn {
        command: program.to_string(),
        source: std::io::Error::new(
            e.kind(),
            format!("cannot open stdin file {}: {e}", path.display()),
        ),
    };

    let file = tokio::fs::File::open(path).await.map_err(spawn_error)?;
    Ok(file.into_std().await)
}

/// Reads stdout into a bounded buffer while draining stderr.
///
/// Returns on the first error, so an overflow stops reading immediately.
async fn capture_output(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    max_buffer_size: usize,
) -> Result<(String, String), AgentError> {
    let read_stdout = async {
        let mut buffer = OutputBuffer::new(max_buffer_size);
        if let Some(mut stdout) = stdout {
            let mut chunk = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let n = stdout.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                buffer.push(&chunk[..n])?;
            }
        }
        Ok::<_, AgentError>(buffer.into_string())
    };

    let read_stderr = async {
        let mut captured = Vec::new();
        if let Some(mut stderr) = stderr {
            let mut chunk = [0u8; 1024];
            loop {
                let n = stderr.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                let room = STDERR_CAPTURE_LIMIT.saturating_sub(captured.len());
                captured.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
        Ok::<_, AgentError>(String::from_utf8_lossy(&captured).into_owned())
    };

    tokio::try_join!(read_stdout, read_stderr)
}

#[cfg(not(unix))]
async fn terminate_child(child: &mut Child) {
    let _ = child.kill().await;
}

/// Sends SIGTERM, waits out the grace period, then SIGKILLs.
#[cfg(unix)]
async fn terminate_child(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(id) = child.id() else {
        return; // Already reaped
    };
    let pid = Pid::from_raw(id as i32);

    debug!(pid = %pid, "Sending SIGTERM");
    let _ = kill(pid, Signal::SIGTERM);

    if tokio::time::timeout(TERMINATION_GRACE, child.wait())
        .await
        .is_ok()
    {
        return;
    }

    debug!(pid = %pid, "Grace period expired, sending SIGKILL");
    let _ = child.kill().await;
}

/// Writes the raw agent output verbatim to `path`, creating parent directories.
pub async fn persist_output(path: &Path, output: &RawOutput) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, output.stdout.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_buffer_rejects_chunk_past_limit() {
        let mut buffer = OutputBuffer::new(8);
        buffer.push(b"12345").unwrap();
        assert_eq!(buffer.len(), 5);

        let err = buffer.push(b"6789").unwrap_err();
        assert!(matches!(err, AgentError::BufferOverflow { limit: 8 }));
        // Rejected chunk is not appended
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_output_buffer_accepts_exact_limit() {
        let mut buffer = OutputBuffer::new(4);
        buffer.push(b"ab").unwrap();
        buffer.push(b"cd").unwrap();
        assert_eq!(buffer.into_string(), "abcd");
    }

    #[test]
    fn test_output_buffer_replaces_invalid_utf8() {
        let mut buffer = OutputBuffer::new(16);
        buffer.push(&[b'o', b'k', 0xff]).unwrap();
        assert_eq!(buffer.into_string(), "ok\u{fffd}");
    }

    #[test]
    fn test_raw_output_events() {
        let raw = RawOutput::from_stdout(
            "{\"type\":\"completion_result\",\"content\":\"{}\"}\nbanner\n",
        );
        assert!(raw.success());
        let events: Vec<_> = raw.events().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AgentEvent::CompletionResult { .. }));
    }

    #[tokio::test]
    async fn test_persist_output_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent").join("raw.ndjson");
        let raw = RawOutput::from_stdout("line one\nline two\n");

        persist_output(&path, &raw).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "line one\nline two\n"
        );
    }
}
