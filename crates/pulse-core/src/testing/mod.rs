//! Test doubles for deterministic orchestrator tests.

pub mod mock_runner;

pub use mock_runner::{MockRunner, MockStep};
