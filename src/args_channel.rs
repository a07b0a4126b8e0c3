use eyre::WrapErr;
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::{Builder, NamedTempFile};
use tracing::debug;

use crate::Result;

const ARGS_FILE_PREFIX: &str = "integ_args";

/// Side-channel file carrying the logical argument vector into the child.
///
/// One channel is allocated per collector and overwritten by every run, so
/// runs sharing a channel must not overlap.
pub struct ArgChannel {
    file: NamedTempFile,
}

impl ArgChannel {
    /// Allocates a fresh channel file in the system temp directory.
    pub fn new() -> Result<Self> {
        let file = Builder::new()
            .prefix(ARGS_FILE_PREFIX)
            .tempfile()
            .wrap_err("error creating temporary args file")?;
        debug!("Allocated args channel at {}", file.path().display());
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Replaces the channel's content with `args`, one per line.
    ///
    /// The file is truncated first so nothing from a previous, longer write
    /// survives.
    pub fn write<S: AsRef<str>>(&mut self, args: &[S]) -> Result<()> {
        let joined = args
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n");

        let file = self.file.as_file_mut();
        file.set_len(0).wrap_err("error truncating args file")?;
        file.seek(SeekFrom::Start(0))
            .wrap_err("error rewinding args file")?;
        file.write_all(joined.as_bytes())
            .wrap_err("error writing args file")?;
        file.flush().wrap_err("error flushing args file")?;

        debug!("Wrote {} argument(s) to args channel", args.len());
        Ok(())
    }

    /// Removes the channel file, reporting the failure instead of ignoring it.
    pub fn close(self) -> std::io::Result<()> {
        self.file.close()
    }
}

/// Parses channel content: split on newlines, trim, drop blank lines.
pub fn parse_args(content: &str) -> Vec<String> {
    content
        .split('\n')
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads and parses the channel file at `path`.
pub fn read_args(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .wrap_err_with(|| format!("error reading args file {}", path.display()))?;
    Ok(parse_args(&content))
}
