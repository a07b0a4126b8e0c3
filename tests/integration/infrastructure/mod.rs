pub mod profile_assertions;

pub use collector_harness::{CollectorTestHarness, ECHO_ARG_COVER_MODE};
pub use profile_assertions::*;
