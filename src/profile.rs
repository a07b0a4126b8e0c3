use eyre::{eyre, WrapErr};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::Result;

const MODE_HEADER_PREFIX: &str = "mode: ";

/// Accumulation strategy of an instrumented binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoverMode {
    /// Hit or not hit.
    Set,
    /// Saturating hit counters.
    Count,
    /// Hit counters safe under concurrency.
    Atomic,
}

impl CoverMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverMode::Set => "set",
            CoverMode::Count => "count",
            CoverMode::Atomic => "atomic",
        }
    }

    /// The header line that opens every profile written in this mode.
    pub fn header(&self) -> String {
        format!("{}{}", MODE_HEADER_PREFIX, self.as_str())
    }
}

impl fmt::Display for CoverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoverMode {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "set" => Ok(CoverMode::Set),
            "count" => Ok(CoverMode::Count),
            "atomic" => Ok(CoverMode::Atomic),
            other => Err(eyre!(
                "unknown coverage mode \"{}\": must be set, count, or atomic",
                other
            )),
        }
    }
}

/// Reads the mode from the first `mode:` header line of a profile.
pub fn detect_mode(profile: &str) -> Result<CoverMode> {
    profile
        .lines()
        .find_map(|line| line.trim_end().strip_prefix(MODE_HEADER_PREFIX))
        .ok_or_else(|| eyre!("missing coverage mode header in coverage profile"))?
        .trim()
        .parse()
}

/// Everything after the `header` line, trimmed. `None` when no line equals
/// the header.
fn profile_body<'a>(profile: &'a str, header: &str) -> Option<&'a str> {
    let mut offset = 0;
    for line in profile.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == header {
            return Some(profile[offset..].trim());
        }
    }
    None
}

/// Concatenates profile texts sharing `mode` under a single header.
///
/// Bodies keep their input order; bodies that are empty contribute no line.
pub fn merge_profile_texts<S: AsRef<str>>(mode: CoverMode, profiles: &[S]) -> Result<String> {
    let header = mode.header();
    let mut merged = header.clone();
    for profile in profiles {
        let body = profile_body(profile.as_ref(), &header).ok_or_else(|| {
            eyre!("missing coverage mode from coverage profile, file may be corrupted")
        })?;
        if !body.is_empty() {
            merged.push('\n');
            merged.push_str(body);
        }
    }
    Ok(merged)
}

/// Merges the profiles at `inputs` into one profile written to `output`.
pub fn merge_profiles<P: AsRef<Path>>(mode: CoverMode, inputs: &[P], output: &Path) -> Result<()> {
    let mut profiles = Vec::with_capacity(inputs.len());
    for input in inputs {
        let input = input.as_ref();
        debug!("Reading coverage profile {}", input.display());
        let profile = fs::read_to_string(input)
            .wrap_err_with(|| format!("error reading coverage profile {}", input.display()))?;
        profiles.push(profile);
    }

    let merged = merge_profile_texts(mode, &profiles)
        .wrap_err("error merging coverage profiles")?;
    fs::write(output, merged)
        .wrap_err_with(|| format!("error writing merged coverage profile {}", output.display()))?;

    info!(
        "Merged {} coverage profile(s) into {}",
        inputs.len(),
        output.display()
    );
    Ok(())
}
