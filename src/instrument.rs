//! Callee side of the harness protocol.
//!
//! An instrumented binary routes its entrypoint through [`run_instrumented`].
//! The wrapper removes the harness flags from the command line, appends the
//! arguments delivered through the args channel, runs the entrypoint, and
//! reports the entrypoint's exit code and the coverage mode after its output.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::args_channel::read_args;
use crate::metadata::{Metadata, SentinelProtocol};
use crate::profile::CoverMode;
use crate::Result;

pub const TEST_FLAG_PREFIX: &str = "-test.";
pub const TEST_RUN_FLAG: &str = "-test.run";
pub const COVER_PROFILE_FLAG: &str = "-test.coverprofile";
pub const ARGS_FILE_FLAG: &str = "-args-file";

/// Coverage instrumentation active in the current process.
pub trait CoverageRuntime {
    /// Mode of the active instrumentation, `None` when the build is not
    /// instrumented.
    fn cover_mode(&self) -> Option<CoverMode>;

    /// Writes the profile gathered so far to `path`.
    fn write_profile(&self, path: &Path) -> io::Result<()>;
}

/// Runtime for builds without coverage instrumentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCoverage;

impl CoverageRuntime for NoCoverage {
    fn cover_mode(&self) -> Option<CoverMode> {
        None
    }

    fn write_profile(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// What the wrapped entrypoint produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOutcome {
    /// Output not yet written to stdout; emitted ahead of the metadata.
    pub output: String,
    pub exit_code: i32,
}

impl EntryOutcome {
    pub fn new(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
        }
    }
}

impl From<i32> for EntryOutcome {
    fn from(exit_code: i32) -> Self {
        Self {
            output: String::new(),
            exit_code,
        }
    }
}

/// Harness flags found on the raw command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarnessFlags {
    pub test_run: Option<String>,
    pub cover_profile: Option<PathBuf>,
    pub args_file: Option<PathBuf>,
}

/// Normalizes `--flag` to `-flag` so both spellings are recognized.
fn single_dash(arg: &str) -> &str {
    if arg.starts_with("--") {
        &arg[1..]
    } else {
        arg
    }
}

fn flag_value<'a>(arg: &'a str, flag: &str) -> Option<&'a str> {
    arg.strip_prefix(flag)?.strip_prefix('=')
}

/// Splits harness flags from the program's own arguments.
///
/// The first element (the program name) is kept as is. Returns the remaining
/// arguments with every harness flag removed, together with the flags found.
pub fn split_harness_flags<I>(raw_args: I) -> (Vec<String>, HarnessFlags)
where
    I: IntoIterator<Item = String>,
{
    let mut args = Vec::new();
    let mut flags = HarnessFlags::default();
    let mut raw_args = raw_args.into_iter();

    if let Some(program) = raw_args.next() {
        args.push(program);
    }

    while let Some(arg) = raw_args.next() {
        let flag = single_dash(&arg);
        if flag == ARGS_FILE_FLAG {
            flags.args_file = raw_args.next().map(PathBuf::from);
        } else if let Some(path) = flag_value(flag, ARGS_FILE_FLAG) {
            flags.args_file = Some(PathBuf::from(path));
        } else if flag == TEST_RUN_FLAG {
            flags.test_run = raw_args.next();
        } else if flag == COVER_PROFILE_FLAG {
            flags.cover_profile = raw_args.next().map(PathBuf::from);
        } else if flag.starts_with(TEST_FLAG_PREFIX) {
            // Other harness flags are boolean or `=`-joined.
            if let Some(selector) = flag_value(flag, TEST_RUN_FLAG) {
                flags.test_run = Some(selector.to_string());
            } else if let Some(path) = flag_value(flag, COVER_PROFILE_FLAG) {
                flags.cover_profile = Some(PathBuf::from(path));
            }
        } else {
            args.push(arg);
        }
    }

    (args, flags)
}

/// Builds the argument vector the entrypoint sees: the raw arguments without
/// harness flags, followed by the contents of the args channel if one was
/// named.
pub fn reconcile_args<I>(raw_args: I) -> Result<(Vec<String>, HarnessFlags)>
where
    I: IntoIterator<Item = String>,
{
    let (mut args, flags) = split_harness_flags(raw_args);
    if let Some(ref path) = flags.args_file {
        args.extend(read_args(path)?);
    }
    Ok((args, flags))
}

/// Runs `entrypoint` under the harness protocol and writes its output and
/// metadata to `out`. Returns the entrypoint's logical exit code.
///
/// Order on `out`: the entrypoint's returned output, then the start marker,
/// the metadata record, and the end marker.
pub fn run_with<R, F, O, W>(
    runtime: &R,
    raw_args: Vec<String>,
    out: &mut W,
    entrypoint: F,
) -> Result<i32>
where
    R: CoverageRuntime + ?Sized,
    F: FnOnce(Vec<String>) -> O,
    O: Into<EntryOutcome>,
    W: Write,
{
    let (args, flags) = reconcile_args(raw_args)?;
    let outcome: EntryOutcome = entrypoint(args).into();

    out.write_all(outcome.output.as_bytes())?;
    out.flush()?;

    let cover_mode = runtime.cover_mode();
    if let (Some(_), Some(path)) = (cover_mode, flags.cover_profile.as_ref()) {
        runtime.write_profile(path)?;
    }

    let metadata = Metadata {
        cover_mode: cover_mode.map(|mode| mode.to_string()).unwrap_or_default(),
        exit_code: outcome.exit_code,
    };
    SentinelProtocol.embed(out, &metadata)?;
    Ok(outcome.exit_code)
}

/// Process entrypoint wrapper for instrumented binaries.
///
/// The entrypoint must report its exit status through its return value
/// rather than exiting the process, otherwise no metadata is emitted. The
/// wrapper always exits with status 0 once the metadata is written; the
/// entrypoint's exit code travels in the metadata. Failures of the wrapper
/// itself are printed to stderr and exit with status 1.
pub fn run_instrumented<R, F, O>(runtime: &R, entrypoint: F) -> !
where
    R: CoverageRuntime + ?Sized,
    F: FnOnce(Vec<String>) -> O,
    O: Into<EntryOutcome>,
{
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match run_with(runtime, std::env::args().collect(), &mut out, entrypoint) {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            let _ = out.flush();
            eprintln!("instrumented binary harness error: {:#}", e);
            std::process::exit(1)
        }
    }
}
