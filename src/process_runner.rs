use eyre::{eyre, WrapErr};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::Signal;
use nix::unistd::pipe2;
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::environment::Environment;
use crate::Result;

/// Attempts made when exec reports the binary is still open for writing.
const SPAWN_BUSY_ATTEMPTS: u32 = 10;
const SPAWN_BUSY_BACKOFF: Duration = Duration::from_millis(20);

/// A single child process launch.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    /// Program to execute
    pub program: PathBuf,
    /// Arguments for the program
    pub args: Vec<String>,
    /// Overrides applied on top of the ambient environment
    pub environment: Environment,
    /// Text fed to the child's stdin, which is closed afterwards
    pub stdin: Option<String>,
    /// Kill the child if it has not exited by then
    pub deadline: Option<Duration>,
}

impl ProcessSpec {
    /// Program and arguments as one line, for diagnostics.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured combined stdout and stderr of a child that exited with status 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub combined: Vec<u8>,
}

impl ProcessOutput {
    pub fn combined_lossy(&self) -> String {
        String::from_utf8_lossy(&self.combined).into_owned()
    }
}

fn describe_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code: {}", code),
        (None, Some(raw)) => match Signal::try_from(raw) {
            Ok(signal) => format!("terminated by signal {:?}", signal),
            Err(_) => format!("terminated by signal {}", raw),
        },
        (None, None) => format!("exit status: {:?}", status),
    }
}

/// Runs `spec` to completion, capturing stdout and stderr interleaved in
/// the order the child wrote them.
///
/// Errors when the child cannot be started, exits non-zero, is killed by a
/// signal, or outlives its deadline. A non-zero exit error carries the
/// command line and the captured output.
pub async fn run_process(spec: &ProcessSpec) -> Result<ProcessOutput> {
    info!("Running instrumented binary: {}", spec.command_line());

    // One pipe shared by stdout and stderr keeps their relative ordering.
    let (reader, writer) = pipe2(OFlag::O_CLOEXEC).wrap_err("error creating output pipe")?;
    let writer_for_stderr = writer
        .try_clone()
        .wrap_err("error duplicating output pipe")?;

    let mut command = Command::new(&spec.program);
    command.args(&spec.args);
    command.envs(spec.environment.iter());
    command.stdout(Stdio::from(writer));
    command.stderr(Stdio::from(writer_for_stderr));
    command.stdin(if spec.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    command.kill_on_drop(true);

    let spawned = spawn_when_not_busy(&mut command).await;
    // The command still holds the write ends; drop it so the read side
    // sees EOF once the child exits.
    drop(command);
    let mut child = spawned.wrap_err_with(|| {
        format!("error launching instrumented binary {}", spec.program.display())
    })?;
    debug!("Instrumented binary spawned with PID: {:?}", child.id());

    let collect = collect_output(&mut child, File::from(reader), spec.stdin.as_deref());
    let (status, combined) = match spec.deadline {
        Some(deadline) => {
            let finished = timeout(deadline, collect).await;
            match finished {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Instrumented binary exceeded its deadline, killing it");
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill instrumented binary: {}", e);
                    }
                    return Err(eyre!(
                        "instrumented binary did not finish within {:?}: {}",
                        deadline,
                        spec.command_line()
                    ));
                }
            }
        }
        None => collect.await?,
    };

    if !status.success() {
        return Err(eyre!(
            "unexpected error running instrumented binary: {}\n{}\noutput:\n{}",
            spec.command_line(),
            describe_status(status),
            String::from_utf8_lossy(&combined)
        ));
    }

    debug!("Instrumented binary exited cleanly, {} byte(s) captured", combined.len());
    Ok(ProcessOutput { combined })
}

/// Spawns `command`, retrying while the kernel refuses to exec a file that
/// some process still holds open for writing (`ETXTBSY`). A freshly written
/// binary can hit this when a concurrent fork inherited its write handle.
async fn spawn_when_not_busy(command: &mut Command) -> std::io::Result<Child> {
    let mut attempt = 1;
    loop {
        match command.spawn() {
            Err(e)
                if e.raw_os_error() == Some(Errno::ETXTBSY as i32)
                    && attempt < SPAWN_BUSY_ATTEMPTS =>
            {
                debug!("Instrumented binary busy (attempt {}), retrying spawn", attempt);
                tokio::time::sleep(SPAWN_BUSY_BACKOFF * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Feeds stdin, drains the output pipe, and waits for the child, all
/// concurrently so neither side can block the other.
async fn collect_output(
    child: &mut Child,
    reader: File,
    input: Option<&str>,
) -> Result<(ExitStatus, Vec<u8>)> {
    let stdin = child.stdin.take();
    let feed = async move {
        if let (Some(mut stdin), Some(input)) = (stdin, input) {
            // A child that exits without reading closes the pipe early.
            match stdin.write_all(input.as_bytes()).await {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("Instrumented binary closed stdin before reading all input");
                }
                other => other.wrap_err("error writing instrumented binary stdin")?,
            }
        }
        Ok::<_, eyre::Report>(())
    };

    let mut reader = tokio::fs::File::from_std(reader);
    let drain = async move {
        let mut combined = Vec::new();
        reader
            .read_to_end(&mut combined)
            .await
            .wrap_err("error reading instrumented binary output")?;
        Ok::<_, eyre::Report>(combined)
    };

    let (fed, combined, status) = tokio::join!(feed, drain, child.wait());
    fed?;
    let status = status.wrap_err("error waiting for instrumented binary")?;
    Ok((status, combined?))
}
