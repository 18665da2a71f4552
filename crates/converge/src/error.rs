//! Error types for reconciliation.
//!
//! Errors are split by origin: configuration problems are caught before any
//! provider call, provider failures carry a severity so the engine knows
//! whether to retry, and state-store failures always abort the pass.

use std::path::PathBuf;
use thiserror::Error;

use crate::resource::ResourceRef;

/// Severity of a provider failure, for retry logic.
///
/// Providers classify their own failures. The engine retries transient
/// failures with backoff and surfaces permanent ones immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Temporary condition (throttling, timeout) worth retrying
    Transient,
    /// Definitive rejection that will not succeed on retry
    Permanent,
}

impl Severity {
    /// Whether failures of this severity are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this severity.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "Temporary failure",
            Self::Permanent => "Permanent failure",
        }
    }
}

/// A failure reported by a provider adapter.
///
/// Every provider operation reports failures in this shape: a severity,
/// a short machine-readable code, and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ProviderError {
    /// Whether the failure is worth retrying
    pub severity: Severity,
    /// Short machine-readable code, e.g. `throttled` or `bucket-not-empty`
    pub code: String,
    /// Human-readable description of what went wrong
    pub message: String,
}

impl ProviderError {
    /// Create a transient (retryable) provider error.
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Transient,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a permanent (non-retryable) provider error.
    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Permanent,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.severity.is_retryable()
    }
}

fn join_refs(refs: &[ResourceRef]) -> String {
    refs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors in the resource catalog, detected before any provider call.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Malformed resource address (expected `kind.name`)
    #[error("invalid resource address '{input}' (expected kind.name)")]
    BadAddress {
        /// The string that failed to parse
        input: String,
    },

    /// Malformed attribute reference expression
    #[error("invalid reference '{input}' (expected ${{kind.name.attribute}})")]
    BadReference {
        /// The expression that failed to parse
        input: String,
    },

    /// Two resources share the same kind and name
    #[error("duplicate resource: {resource}")]
    DuplicateResource {
        /// The address declared more than once
        resource: ResourceRef,
    },

    /// A `depends_on` entry names a resource that is not declared
    #[error("{resource} depends on undeclared resource {dependency}")]
    UnknownDependency {
        /// The resource carrying the bad dependency
        resource: ResourceRef,
        /// The missing dependency target
        dependency: ResourceRef,
    },

    /// An attribute reference names a resource that is not declared
    #[error("{resource} references undeclared resource {target}")]
    UnknownReference {
        /// The resource whose attribute holds the reference
        resource: ResourceRef,
        /// The missing reference target
        target: ResourceRef,
    },

    /// A resource depends on itself
    #[error("{resource} depends on itself")]
    SelfDependency {
        /// The self-referential resource
        resource: ResourceRef,
    },

    /// No adapter is registered for a resource kind
    #[error("no provider registered for kind '{kind}' (required by {resource})")]
    UnknownKind {
        /// The resource with the unhandled kind
        resource: ResourceRef,
        /// The kind nothing is registered for
        kind: String,
    },

    /// A target filter names a resource that is not declared
    #[error("unknown target: {target}")]
    UnknownTarget {
        /// The address passed as a target
        target: ResourceRef,
    },

    /// The dependency graph contains at least one cycle
    #[error("dependency cycle between: {}", join_refs(members))]
    Cycle {
        /// Every resource participating in a cycle
        members: Vec<ResourceRef>,
    },
}

/// Errors from the state store. Always fatal to the running pass.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading the state document failed
    #[error("failed to read state from {path}: {source}")]
    Read {
        /// Path of the state document
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Writing the state document failed
    #[error("failed to write state to {path}: {source}")]
    Write {
        /// Path of the state document
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// The state document does not parse
    #[error("state document is corrupt: {0}")]
    Corrupt(String),

    /// The state document was written by a newer tool version
    #[error("state schema version {found} is newer than supported version {supported}")]
    Version {
        /// Version found in the document
        found: u32,
        /// Highest version this build understands
        supported: u32,
    },
}

/// Errors that abort a reconciliation pass outright.
///
/// Per-resource provider failures do not appear here: those are collected
/// into the pass report so unrelated resources can still converge.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The resource catalog is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The state store failed
    #[error(transparent)]
    State(#[from] StateError),

    /// Refreshing observed state failed permanently; nothing can be diffed
    #[error("failed to refresh {resource}: {source}")]
    Refresh {
        /// The resource whose read failed
        resource: ResourceRef,
        /// The provider failure
        source: ProviderError,
    },

    /// The worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    Pool(String),
}

/// Result type for engine operations.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_retryable() {
        assert!(Severity::Transient.is_retryable());
        assert!(!Severity::Permanent.is_retryable());
    }

    #[test]
    fn test_provider_error_constructors() {
        let err = ProviderError::transient("throttled", "rate limit exceeded");
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "throttled: rate limit exceeded");

        let err = ProviderError::permanent("bucket-not-empty", "bucket holds 3 objects");
        assert!(!err.is_retryable());
        assert_eq!(err.code, "bucket-not-empty");
    }

    #[test]
    fn test_cycle_lists_members() {
        let err = ConfigError::Cycle {
            members: vec![
                ResourceRef::new("function", "synthesize"),
                ResourceRef::new("gateway_route", "api"),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("function.synthesize"));
        assert!(text.contains("gateway_route.api"));
    }
}
