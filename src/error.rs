//! Unified error handling for edgesim
//!
//! This module provides a centralized error type that consolidates the
//! domain-specific errors raised throughout the simulator:
//! - Topology errors (malformed device graph, fatal, run never starts)
//! - Ledger errors (capacity exhaustion, local, handled within a step)
//! - Placement errors (no feasible assignment, fatal for the run)
//! - Migration errors (destination cannot accept cache bytes)
//! - Configuration errors (rejected at construction)

use crate::graph::TopologyError;
use crate::ledger::LedgerError;

/// Unified error type for edgesim
///
/// Fatal run errors carry the step index at which the run stopped so the
/// partial metric trace can be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Malformed or disconnected device graph
    #[error(transparent)]
    InvalidTopology(#[from] TopologyError),

    /// Per-device capacity exhausted during a placement pass
    ///
    /// Recoverable within a step: the search rejects the tentative
    /// assignment or backtracks. Surfaced only when it escapes the step.
    #[error(transparent)]
    ResourceExhausted(#[from] LedgerError),

    /// No assignment satisfies per-device capacity for all layers
    #[error("no feasible placement at step {step}")]
    NoFeasiblePlacement { step: usize },

    /// Cache relocation failed: destination cannot accept the bytes
    #[error("migration of layer {layer} to device {destination} failed at step {step}")]
    MigrationFailed {
        step: usize,
        layer: usize,
        destination: usize,
    },

    /// Invalid configuration value, named by field
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl SimError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            SimError::InvalidConfiguration(_) => ErrorCategory::User,
            SimError::ResourceExhausted(_) => ErrorCategory::Recoverable,
            SimError::InvalidTopology(_)
            | SimError::NoFeasiblePlacement { .. }
            | SimError::MigrationFailed { .. } => ErrorCategory::Fatal,
        }
    }

    /// Check if this error is recoverable within a single step
    pub fn is_recoverable(&self) -> bool {
        self.category() == ErrorCategory::Recoverable
    }

    /// Check if this error aborts the run
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }

    /// The step index attached to fatal run errors, if any
    pub fn step(&self) -> Option<usize> {
        match self {
            SimError::NoFeasiblePlacement { step } | SimError::MigrationFailed { step, .. } => {
                Some(*step)
            }
            _ => None,
        }
    }
}

/// Error category for handling decisions
///
/// - User: invalid input or configuration, fix the experiment file
/// - Recoverable: handled inside a placement pass, retry elsewhere
/// - Fatal: the run stops, partial metrics are retained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User error - invalid input or configuration
    User,
    /// Recoverable error - handled within a step
    Recoverable,
    /// Fatal error - aborts the run
    Fatal,
}

/// Result alias used across the crate
pub type SimResult<T> = std::result::Result<T, SimError>;
