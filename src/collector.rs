use eyre::{eyre, WrapErr};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{Builder, TempPath};
use tracing::{debug, info, warn};

use crate::args_channel::ArgChannel;
use crate::environment::Environment;
use crate::instrument::{ARGS_FILE_FLAG, COVER_PROFILE_FLAG, TEST_RUN_FLAG};
use crate::metadata::{MetadataExtractor, SentinelProtocol};
use crate::process_runner::{run_process, ProcessSpec};
use crate::profile::{merge_profiles, CoverMode};
use crate::violation::ContractViolation;
use crate::Result;

const COVERAGE_FILE_PREFIX: &str = "temp_coverage";

/// Name of the test that wraps the binary's entrypoint when none is given.
pub const DEFAULT_TEST_NAME: &str = "TestRunMain";

/// One call of an instrumented binary.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Path of the instrumented binary
    pub binary: PathBuf,
    /// Test selector naming the entrypoint wrapper
    pub test_name: String,
    /// Overrides applied on top of the ambient environment
    pub environment: Environment,
    /// Logical arguments, delivered through the args channel
    pub args: Vec<String>,
    /// Text fed to the binary's stdin
    pub stdin: Option<String>,
    /// Kill the binary if it runs longer than this
    pub deadline: Option<Duration>,
}

impl Invocation {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            test_name: DEFAULT_TEST_NAME.to_string(),
            environment: Environment::new(),
            args: Vec::new(),
            stdin: None,
            deadline: None,
        }
    }

    pub fn test_name(mut self, test_name: impl Into<String>) -> Self {
        self.test_name = test_name.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.set(key, value);
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment.extend(environment);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// What the wrapped entrypoint printed and the exit code it reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Combined stdout and stderr bytes ahead of the metadata, unmodified.
    pub output: Vec<u8>,
    pub exit_code: i32,
}

impl RunOutput {
    /// The output as text, with invalid UTF-8 replaced.
    pub fn output_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}

/// Runs an instrumented binary repeatedly and merges the coverage of every
/// run into one profile.
///
/// Lifecycle: [`setup`](Self::setup), any number of
/// [`run_binary`](Self::run_binary) calls, then [`tear_down`](Self::tear_down).
/// Runs share one args channel, so a collector must not be driven from
/// several tasks at once.
pub struct CoverageCollector<E = SentinelProtocol> {
    /// Where the merged profile is written at teardown
    merged_profile: PathBuf,
    /// Whether runs request a coverage profile
    collect_coverage: bool,
    /// Number of runs that contributed a profile
    run_count: usize,
    /// Present between setup and teardown
    arg_channel: Option<ArgChannel>,
    /// Mode shared by every profile collected so far
    cover_mode: Option<CoverMode>,
    /// Per-run profiles, in run order
    coverage_files: Vec<TempPath>,
    extractor: E,
}

impl CoverageCollector<SentinelProtocol> {
    /// Creates a collector writing its merged profile to `merged_profile`.
    ///
    /// With `collect_coverage` off the collector still runs binaries and
    /// recovers their output and exit code, but requests no profiles.
    pub fn new(merged_profile: impl Into<PathBuf>, collect_coverage: bool) -> Self {
        Self::with_extractor(merged_profile, collect_coverage, SentinelProtocol)
    }
}

impl<E: MetadataExtractor> CoverageCollector<E> {
    pub fn with_extractor(
        merged_profile: impl Into<PathBuf>,
        collect_coverage: bool,
        extractor: E,
    ) -> Self {
        Self {
            merged_profile: merged_profile.into(),
            collect_coverage,
            run_count: 0,
            arg_channel: None,
            cover_mode: None,
            coverage_files: Vec::new(),
            extractor,
        }
    }

    /// Allocates the args channel. Must be called before any run.
    pub fn setup(&mut self) -> Result<()> {
        if self.merged_profile.as_os_str().is_empty() {
            return Err(eyre!("merged coverage profile filename cannot be empty"));
        }
        if self.arg_channel.is_some() {
            debug!("Coverage collector already set up");
            return Ok(());
        }
        self.arg_channel = Some(ArgChannel::new()?);
        info!(
            "Coverage collector ready (coverage {}, merged profile {})",
            if self.collect_coverage { "on" } else { "off" },
            self.merged_profile.display()
        );
        Ok(())
    }

    /// Runs the instrumented binary once and returns what its entrypoint
    /// printed and the exit code it reported.
    ///
    /// Launch failures, a non-zero process exit, and args channel I/O
    /// failures are returned as errors. Calling this before
    /// [`setup`](Self::setup), a callee that does not emit metadata, and
    /// inconsistent coverage modes are contract violations and panic.
    pub async fn run_binary(&mut self, invocation: &Invocation) -> Result<RunOutput> {
        let channel = match self.arg_channel.as_mut() {
            Some(channel) => channel,
            None => ContractViolation::NotReady.abort(),
        };
        channel.write(&invocation.args)?;
        let channel_path = channel.path().to_path_buf();

        let coverage_file = if self.collect_coverage {
            let file = Builder::new()
                .prefix(COVERAGE_FILE_PREFIX)
                .tempfile()
                .wrap_err("error creating temporary coverage profile")?;
            Some(file.into_temp_path())
        } else {
            None
        };

        let mut args = vec![format!("{}={}", TEST_RUN_FLAG, invocation.test_name)];
        if let Some(ref path) = coverage_file {
            args.push(format!("{}={}", COVER_PROFILE_FLAG, path.display()));
        }
        args.push(format!("{}={}", ARGS_FILE_FLAG, channel_path.display()));
        debug!("Logical arguments: {:?}", invocation.args);

        let spec = ProcessSpec {
            program: invocation.binary.clone(),
            args,
            environment: invocation.environment.clone(),
            stdin: invocation.stdin.clone(),
            deadline: invocation.deadline,
        };
        let output = run_process(&spec).await?;

        let extracted = self
            .extractor
            .extract(&output.combined)
            .unwrap_or_else(|violation| violation.abort());

        if let Some(path) = coverage_file {
            let mode = accept_cover_mode(self.cover_mode, &extracted.metadata.cover_mode)
                .unwrap_or_else(|violation| violation.abort());
            self.cover_mode = Some(mode);
            self.run_count += 1;
            self.coverage_files.push(path);
            debug!("Recorded coverage run {} ({})", self.run_count, mode);
        }

        Ok(RunOutput {
            output: extracted.user_output,
            exit_code: extracted.metadata.exit_code,
        })
    }

    /// Merges the profiles of every coverage run into the merged profile
    /// and releases the collector's temporary files.
    ///
    /// Writes nothing when no coverage run happened. Temporary files are
    /// released even when the merge fails; calling this again is a no-op.
    pub fn tear_down(&mut self) -> Result<()> {
        let merged = match self.cover_mode {
            Some(mode) if !self.coverage_files.is_empty() => {
                merge_profiles(mode, &self.coverage_files, &self.merged_profile)
            }
            _ => {
                debug!("No coverage runs recorded, skipping profile merge");
                Ok(())
            }
        };
        let failures = self.release_resources();
        if failures > 0 {
            warn!("{} temporary file(s) could not be removed", failures);
        }
        merged
    }
}

impl<E> CoverageCollector<E> {
    /// Removes the args channel and per-run profiles. Failures are logged
    /// and counted, never raised.
    fn release_resources(&mut self) -> usize {
        let mut failures = 0;
        if let Some(channel) = self.arg_channel.take() {
            let path = channel.path().to_path_buf();
            if let Err(e) = channel.close() {
                warn!("Failed to remove args file {}: {}", path.display(), e);
                failures += 1;
            }
        }
        for file in self.coverage_files.drain(..) {
            let path = file.to_path_buf();
            if let Err(e) = file.close() {
                warn!("Failed to remove coverage profile {}: {}", path.display(), e);
                failures += 1;
            }
        }
        failures
    }

    pub fn is_ready(&self) -> bool {
        self.arg_channel.is_some()
    }

    pub fn run_count(&self) -> usize {
        self.run_count
    }

    pub fn cover_mode(&self) -> Option<CoverMode> {
        self.cover_mode
    }

    pub fn collect_coverage(&self) -> bool {
        self.collect_coverage
    }

    pub fn merged_profile(&self) -> &Path {
        &self.merged_profile
    }

    /// Per-run profiles awaiting merge, in run order.
    pub fn coverage_profiles(&self) -> impl Iterator<Item = &Path> {
        self.coverage_files.iter().map(|path| &**path)
    }
}

impl<E> Drop for CoverageCollector<E> {
    fn drop(&mut self) {
        self.release_resources();
    }
}

/// Checks a run's reported coverage mode against the collector's mode.
fn accept_cover_mode(
    current: Option<CoverMode>,
    found: &str,
) -> std::result::Result<CoverMode, ContractViolation> {
    match current {
        // Once a mode is adopted, anything else (empty included) is a mismatch.
        Some(current) if current.as_str() != found => {
            return Err(ContractViolation::CoverModeMismatch {
                expected: current.to_string(),
                found: found.to_string(),
            });
        }
        None if found.is_empty() => return Err(ContractViolation::EmptyCoverMode),
        _ => {}
    }
    found
        .parse()
        .map_err(|_| ContractViolation::UnsupportedCoverMode(found.to_string()))
}
