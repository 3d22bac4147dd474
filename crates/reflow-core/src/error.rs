//! Error types for reflow-core
//!
//! These are API errors returned to the caller. Structural problems inside a
//! document (cycles, unresolved references, bad composite configuration) are
//! not errors: they become `Value::Unresolved` plus a [`crate::Diagnostic`].

use crate::{ComponentIdx, DefId, SlotRef};
use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Component not found: {0}")]
    ComponentNotFound(ComponentIdx),

    #[error("State variable {variable} not found on {component}")]
    StateVariableNotFound {
        component: ComponentIdx,
        variable: String,
    },

    #[error("Unknown component type: {0}")]
    UnknownComponentType(DefId),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Unknown action {operation} on component type {component_type}")]
    UnknownAction {
        component_type: DefId,
        operation: String,
    },

    #[error("Cannot invert {slot}: {reason}")]
    Uninvertible { slot: SlotRef, reason: String },

    #[error("Inverse walk exceeded {0} steps")]
    InverseBudgetExceeded(usize),

    #[error("Invalid variant index {0}: variant indices start at 1")]
    InvalidVariantIndex(u64),

    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Missing action argument: {0}")]
    MissingArgument(String),

    #[error("Invalid composite: {0}")]
    InvalidComposite(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Evaluation error: {0}")]
    EvaluationError(String),
}

impl Error {
    pub(crate) fn type_error(expected: &str, got: &crate::Value) -> Self {
        Error::TypeError {
            expected: expected.to_string(),
            got: got.type_name().to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
