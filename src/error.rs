//! Error types for polling cycles
//!
//! Two layers of failure exist:
//!
//! - [`TargetError`]: one target could not be polled. These are absorbed by the
//!   orchestrator and the sources, the target is simply absent from the cycle.
//! - [`PollError`]: errors that escape a source. Only [`PollError::SchemaMismatch`]
//!   is ever returned from a probe, the remaining variants surface while
//!   building sources.

use std::fmt;
use std::time::Duration;

/// Result type alias for source-level operations
pub type PollResult<T> = Result<T, PollError>;

/// Why a single target is missing from a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum TargetError {
    /// The target name does not resolve to a provider handle
    NotFound(String),

    /// The call (or the batch it belonged to) ran past its deadline
    Timeout(Duration),

    /// Transport or protocol failure, with whatever detail the adapter had
    Failure(String),

    /// The adapter does not implement the requested capability
    Unsupported(&'static str),
}

impl TargetError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TargetError::Timeout(_))
    }
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::NotFound(name) => write!(f, "target not found: {name}"),
            TargetError::Timeout(after) => write!(f, "timed out after {after:?}"),
            TargetError::Failure(detail) => write!(f, "query failed: {detail}"),
            TargetError::Unsupported(capability) => {
                write!(f, "adapter does not support {capability}")
            }
        }
    }
}

impl std::error::Error for TargetError {}

/// Errors that escape a source
#[derive(Debug, Clone, PartialEq)]
pub enum PollError {
    /// A value was added to a set with a different number of labels
    SchemaMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// The discovery directory could not be queried
    DirectoryUnavailable(String),

    /// Invalid source configuration
    Config(String),
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::SchemaMismatch {
                name,
                expected,
                actual,
            } => write!(
                f,
                "value '{name}' has {actual} label values, value set declares {expected} labels"
            ),
            PollError::DirectoryUnavailable(msg) => write!(f, "directory unavailable: {msg}"),
            PollError::Config(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for PollError {}

impl From<reqwest::Error> for PollError {
    fn from(err: reqwest::Error) -> Self {
        PollError::DirectoryUnavailable(err.to_string())
    }
}
