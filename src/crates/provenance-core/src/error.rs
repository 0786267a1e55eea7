//! Error types and error handling for pipeline execution
//!
//! All errors implement `std::error::Error` via `thiserror`. The taxonomy
//! follows the engine's propagation policy:
//!
//! ```text
//! PipelineError
//! ├── Validation        - structural graph errors, fatal at build time
//! ├── Configuration     - bad wiring (unknown plugin, missing sink), fatal
//! ├── Integrity         - audit-trail violations, always fatal, never a warning
//! ├── NodeExecution     - a plugin call failed terminally, row-scoped
//! ├── RetryExhausted    - retry budget spent, row-scoped
//! ├── Shutdown          - operation raced a run-level abort
//! ├── Audit             - the audit sink refused a write
//! ├── Checkpoint        - persistence layer errors
//! └── Serialization     - row payload / record encoding errors
//! ```
//!
//! Integrity violations (join-cardinality mismatch, unresolved routing label,
//! double-completed reorder ticket, checkpoint hash mismatch) abort the run:
//! continuing would mean the audit trail no longer reflects reality.

use thiserror::Error;

/// Convenience result type using [`PipelineError`]
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Comprehensive error type for all engine operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Graph structure validation failed (cycle, unknown node, dead end)
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// Bad wiring: unknown plugin name, node kind mismatch, missing entry
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Audit/integrity violation. Always fatal: the trail would no longer
    /// reflect reality if execution continued.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// A routing label had no registered edge. A distinct variant so callers
    /// can tell a bad label from other integrity faults, but the propagation
    /// policy is the same: fatal.
    #[error("No edge labeled '{label}' out of node '{node}'")]
    UnresolvedRoute {
        /// Node the token stood at
        node: String,
        /// Label the plugin routed to
        label: String,
    },

    /// The per-row work-queue ceiling was exceeded
    #[error("Routing loop detected for row '{row_id}': {iterations} work-queue iterations")]
    RoutingLoop {
        /// Row whose token never reached a terminal state
        row_id: String,
        /// Iterations consumed before giving up
        iterations: u64,
    },

    /// A plugin call failed terminally at a node
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Node id where the failure occurred
        node: String,
        /// Error reported by the plugin
        error: String,
    },

    /// A retryable failure survived the whole retry budget
    #[error("Node '{node}' still failing after {attempts} attempts: {error}")]
    RetryExhausted {
        /// Node id where the failure occurred
        node: String,
        /// Attempts made, including the first
        attempts: usize,
        /// Last error observed
        error: String,
    },

    /// Operation refused because the run is shutting down
    #[error("Run is shutting down: {0}")]
    Shutdown(String),

    /// The audit sink refused a write
    #[error("Audit trail error: {0}")]
    Audit(String),

    /// Checkpoint persistence or compatibility error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] provenance_checkpoint::CheckpointError),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Create a node execution error with context
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create an integrity violation
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    /// Whether this error is fatal to the whole run, as opposed to row-scoped
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Configuration(_)
                | Self::Integrity(_)
                | Self::UnresolvedRoute { .. }
                | Self::RoutingLoop { .. }
                | Self::Audit(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_route_display() {
        let err = PipelineError::UnresolvedRoute {
            node: "gate-1".to_string(),
            label: "left".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No edge labeled 'left' out of node 'gate-1'"
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_row_scoped_errors_not_fatal() {
        assert!(!PipelineError::node_execution("n", "boom").is_fatal());
        let retry = PipelineError::RetryExhausted {
            node: "n".to_string(),
            attempts: 3,
            error: "capacity".to_string(),
        };
        assert!(!retry.is_fatal());
    }

    #[test]
    fn test_integrity_is_fatal() {
        assert!(PipelineError::integrity("promised 2 branches, saw 1").is_fatal());
    }
}
