//! Error types for graph building, planning and applying.
//!
//! Planning errors (`Cycle`, `UnresolvedReference`, `PlanConflict`,
//! `PreventDestroy`) are raised before anything is mutated. Provider errors
//! are scoped to a single node and carry a transient flag that drives the
//! retry logic.

use crate::types::{Reference, ResourceId};
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Message from the provider
    pub message: String,
    /// Whether the failure is worth retrying (throttling, timeouts)
    pub transient: bool,
}

impl ProviderError {
    /// A permanent failure, never retried.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    /// A transient failure, retried with backoff.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.transient
    }
}

/// Errors that can occur while reconciling declarations.
#[derive(Debug, Error)]
pub enum Error {
    /// Declarations form a dependency cycle
    #[error("dependency cycle: {}", format_cycle(.path))]
    Cycle {
        /// Resources on the cycle, first element repeated at the end
        path: Vec<ResourceId>,
    },

    /// A reference names a resource that is not declared
    #[error("{consumer} references undeclared resource {producer}")]
    UnresolvedReference {
        /// Resource holding the reference
        consumer: ResourceId,
        /// Missing producer
        producer: ResourceId,
    },

    /// A reference names an output the producer never produced
    #[error("{consumer} references {reference}, but {} has no output {:?}", .reference.target, .reference.attribute)]
    MissingOutput {
        /// Resource holding the reference
        consumer: ResourceId,
        /// The dangling reference
        reference: Reference,
    },

    /// Two declarations claim the same identity
    #[error("resource {identity} is declared more than once")]
    PlanConflict {
        /// Duplicated identity
        identity: ResourceId,
    },

    /// The plan would destroy a resource marked `prevent_destroy`
    #[error("resource {identity} has prevent_destroy set but the plan would destroy it")]
    PreventDestroy {
        /// Protected identity
        identity: ResourceId,
    },

    /// A provider operation failed for one node
    #[error("{identity}: provider error: {source}")]
    Provider {
        /// Failing resource
        identity: ResourceId,
        /// Underlying adapter failure
        #[source]
        source: ProviderError,
    },

    /// The state file cannot be read back
    #[error("state corrupted at {}: {message}. Manual recovery required", .path.display())]
    StateCorruption {
        /// State file location
        path: PathBuf,
        /// Parse or validation failure
        message: String,
    },

    /// Another run holds the state lock
    #[error("state is locked by another run ({})", .path.display())]
    StateLocked {
        /// Lock file location
        path: PathBuf,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error was raised before any mutation (plan-time).
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self,
            Self::Cycle { .. }
                | Self::UnresolvedReference { .. }
                | Self::PlanConflict { .. }
                | Self::PreventDestroy { .. }
        )
    }

    /// The resource the error is scoped to, if any.
    pub fn identity(&self) -> Option<&ResourceId> {
        match self {
            Self::UnresolvedReference { consumer, .. } | Self::MissingOutput { consumer, .. } => {
                Some(consumer)
            }
            Self::PlanConflict { identity }
            | Self::PreventDestroy { identity }
            | Self::Provider { identity, .. } => Some(identity),
            Self::Cycle { path } => path.first(),
            _ => None,
        }
    }
}

fn format_cycle(path: &[ResourceId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;
