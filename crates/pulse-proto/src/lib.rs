//! # pulse-proto
//!
//! Shared types for the Pulse agent invocation layer.
//!
//! This crate provides the foundational abstractions used across all Pulse crates:
//! - The analysis request handed to the external agent
//! - The strictly-typed sentiment result returned to callers
//! - The error taxonomy shared by the invoker, the parser and the orchestrator

mod error;
mod request;
mod result;

pub use error::{AgentError, ErrorKind, Result, is_rejection_message};
pub use request::{AgentRequest, DEFAULT_LARGE_PROMPT_THRESHOLD, SizeClass};
pub use result::{NO_SUMMARY, RiskLevel, Sentiment, ValidatedResult};
