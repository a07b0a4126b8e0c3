use thiserror::Error;
use tracing::error;

/// A broken harness invariant.
///
/// These are kept apart from the recoverable [`crate::Result`] errors: a
/// violation means either the callee does not implement the metadata
/// protocol or the collector is being driven incorrectly, and carrying on
/// would silently corrupt coverage accounting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("run_binary called before setup")]
    NotReady,
    #[error("metadata start marker is unexpectedly missing")]
    MissingStartMarker,
    #[error("metadata end marker is unexpectedly missing")]
    MissingEndMarker,
    #[error("malformed metadata payload: {0}")]
    MalformedMetadata(String),
    #[error("coverage mode cannot be empty when coverage collection is enabled")]
    EmptyCoverMode,
    #[error("unexpected coverage mode \"{0}\" encountered, coverage mode must be set, count, or atomic")]
    UnsupportedCoverMode(String),
    #[error("cannot merge profiles with different coverage modes (expected \"{expected}\", found \"{found}\")")]
    CoverModeMismatch { expected: String, found: String },
}

impl ContractViolation {
    /// Escalates the violation into a panic carrying its diagnostic.
    pub fn abort(self) -> ! {
        error!("contract violation: {}", self);
        panic!("{}", self)
    }
}
