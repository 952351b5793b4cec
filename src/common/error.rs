//! Error types for reactive_ltl

use std::fmt;

/// Main error type for the planning session
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerError {
    /// Malformed or unsatisfiable LTL input, detected at automaton build time
    Formula {
        message: String,
        position: Option<usize>,
    },
    /// Degenerate region definition (zero area, self-intersecting, ...)
    Geometry { region: String, message: String },
    /// Iteration or wall-clock budget exhausted without a feasible plan
    Timeout { iterations: usize },
    /// Environment change destroyed the structure reachable from the root
    UnrecoverableRepair { reason: String },
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::Formula { message, position } => match position {
                Some(pos) => write!(f, "Formula error at offset {}: {}", pos, message),
                None => write!(f, "Formula error: {}", message),
            },
            PlannerError::Geometry { region, message } => {
                write!(f, "Geometry error in region '{}': {}", region, message)
            }
            PlannerError::Timeout { iterations } => {
                write!(f, "Planning budget exhausted after {} iterations", iterations)
            }
            PlannerError::UnrecoverableRepair { reason } => {
                write!(f, "Unrecoverable repair: {}", reason)
            }
        }
    }
}

impl std::error::Error for PlannerError {}

/// Result type alias for planning operations
pub type PlannerResult<T> = Result<T, PlannerError>;
