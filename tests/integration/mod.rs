//! Integration tests for bincover
//!
//! Drives the `echo-arg` demo binary through a real `CoverageCollector`:
//! argument delivery, exit code recovery, coverage mode accounting, and the
//! merged profile written at teardown.

pub mod infrastructure;
pub mod scenarios;

// Re-export commonly used types for convenience
pub use infrastructure::{CollectorTestHarness, ECHO_ARG_COVER_MODE};
