//! # pulse-adapters
//!
//! Agent adapters for the Pulse invocation layer.
//!
//! This crate owns everything that touches the external agent process:
//! - [`AgentBackend`] builds the command line for an agent CLI (KiloCode,
//!   Claude or a custom command) in direct-argument or piped-file mode
//! - [`ProcessInvoker`] spawns the agent, races its output against a hard
//!   deadline and caps the bytes it is allowed to buffer
//! - [`AgentEvent`] classifies each line of the agent's NDJSON output
//!
//! The [`AgentRunner`] trait is the seam the orchestrator depends on, so tests
//! can substitute scripted runners for real subprocesses.

mod agent_backend;
mod agent_stream;
mod invoker;

pub use agent_backend::{AgentBackend, AgentCommand, PromptDelivery};
pub use agent_stream::{
    AgentEvent, EXPECTED_RESULT_KEYS, REASONING_SAY_KIND, extract_json_object, parse_events,
};
pub use invoker::{
    AgentRunner, InvokerConfig, OutputBuffer, ProcessInvoker, RawOutput, STDERR_CAPTURE_LIMIT,
    persist_output,
};
