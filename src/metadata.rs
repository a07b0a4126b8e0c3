use serde::{Deserialize, Serialize};
use std::io::{self, Write};

use crate::violation::ContractViolation;

pub const START_OF_METADATA: &str = "START_OF_METADATA";
pub const END_OF_METADATA: &str = "END_OF_METADATA";

/// Result record the callee reports after its entrypoint returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Coverage mode of the instrumentation runtime, empty when none is active.
    pub cover_mode: String,
    /// Logical exit code of the wrapped entrypoint.
    pub exit_code: i32,
}

/// Captured output split into what the user program printed and the
/// metadata reported alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Bytes before the start marker, exactly as the callee wrote them.
    pub user_output: Vec<u8>,
    pub metadata: Metadata,
}

/// Recovers the callee's metadata from its captured output.
///
/// The collector only talks to this trait, so the transport can move off the
/// combined output stream without touching run handling.
pub trait MetadataExtractor {
    fn extract(&self, raw_output: &[u8]) -> Result<Extracted, ContractViolation>;
}

/// Sentinel-delimited metadata embedded at the end of the combined output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SentinelProtocol;

impl SentinelProtocol {
    /// Writes the start marker, the JSON record, and the end marker, each on
    /// its own line.
    pub fn embed<W: Write>(&self, writer: &mut W, metadata: &Metadata) -> io::Result<()> {
        let payload = serde_json::to_string(metadata).map_err(io::Error::other)?;
        writeln!(writer, "{}", START_OF_METADATA)?;
        writeln!(writer, "{}", payload)?;
        writeln!(writer, "{}", END_OF_METADATA)?;
        writer.flush()
    }
}

fn find_marker(haystack: &[u8], marker: &str) -> Option<usize> {
    haystack
        .windows(marker.len())
        .position(|window| window == marker.as_bytes())
}

impl MetadataExtractor for SentinelProtocol {
    fn extract(&self, raw_output: &[u8]) -> Result<Extracted, ContractViolation> {
        let start = find_marker(raw_output, START_OF_METADATA)
            .ok_or(ContractViolation::MissingStartMarker)?;
        let tail = &raw_output[start + START_OF_METADATA.len()..];
        let end = find_marker(tail, END_OF_METADATA).ok_or(ContractViolation::MissingEndMarker)?;

        let payload = tail[..end].trim_ascii();
        let metadata: Metadata = serde_json::from_slice(payload)
            .map_err(|e| ContractViolation::MalformedMetadata(e.to_string()))?;

        Ok(Extracted {
            user_output: raw_output[..start].to_vec(),
            metadata,
        })
    }
}
