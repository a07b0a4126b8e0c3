//! Run instrumented binaries out of process and merge their coverage profiles.
//!
//! The caller side is [`CoverageCollector`]: `setup`, any number of
//! `run_binary` calls, then `tear_down` to write one merged profile. The
//! callee side is [`run_instrumented`], which wraps the binary's real
//! entrypoint and reports its exit code and coverage mode back to the caller.

pub type Result<T> = color_eyre::eyre::Result<T>;

pub mod args_channel;
pub mod collector;
pub mod environment;
pub mod instrument;
pub mod metadata;
pub mod process_runner;
pub mod profile;
pub mod violation;

pub use args_channel::ArgChannel;
pub use collector::{CoverageCollector, Invocation, RunOutput};
pub use environment::Environment;
pub use instrument::{run_instrumented, CoverageRuntime, EntryOutcome, NoCoverage};
pub use metadata::{Metadata, MetadataExtractor, SentinelProtocol};
pub use profile::{merge_profiles, CoverMode};
pub use violation::ContractViolation;
