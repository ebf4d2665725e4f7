//! Error types for the dof resolver and the assembly engine.
//!
//! Fatal conditions (caller bugs and malformed model configurations) are
//! reported as [`DofError`] values and propagated to the caller, which decides
//! whether to abort the run. Persistence failures are reported separately as
//! [`ContextError`] so that a checkpoint manager can retry without treating
//! the condition as fatal.
use crate::dof::{DofHandle, DofId, EquationNumber};
use crate::field::ValueMode;
use std::error::Error;
use std::fmt;

/// A fatal error raised by dof queries or model configuration checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DofError {
    /// The requested operation is undefined for the dof's kind, e.g. asking a
    /// slave dof for its own equation number or local coordinate system.
    UnsupportedOperation {
        dof: DofHandle,
        operation: &'static str,
    },
    /// A slave dof was configured with an empty master list.
    EmptyMasterList { dof: DofHandle },
    /// A slave dof master weight is not a finite number.
    NonFiniteWeight { dof: DofHandle, index: usize },
    /// A master reference points outside the dof store.
    InvalidMaster { dof: DofHandle, master: DofHandle },
    /// The slave→master graph contains a cycle through the given dof.
    CyclicDependency { dof: DofHandle },
    /// Two free dofs were assigned the same equation number.
    DuplicateEquationNumber {
        dof: DofHandle,
        other: DofHandle,
        equation: EquationNumber,
    },
    /// The dof has no equation number under the requested numbering.
    Unnumbered { dof: DofHandle },
    /// No dof with the given id exists at the given node.
    MissingDof { node: usize, dof_id: DofId },
    /// The unknown source cannot produce a value for the given equation.
    ValueUnavailable {
        equation: EquationNumber,
        mode: ValueMode,
    },
}

impl fmt::Display for DofError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DofError::UnsupportedOperation { dof, operation } => {
                write!(f, "operation `{}` is undefined for dof {:?}", operation, dof)
            }
            DofError::EmptyMasterList { dof } => {
                write!(f, "slave dof {:?} has an empty master list", dof)
            }
            DofError::NonFiniteWeight { dof, index } => {
                write!(f, "slave dof {:?} has a non-finite weight at position {}", dof, index)
            }
            DofError::InvalidMaster { dof, master } => {
                write!(f, "slave dof {:?} references master {:?} outside the store", dof, master)
            }
            DofError::CyclicDependency { dof } => {
                write!(f, "slave→master dependency cycle detected through dof {:?}", dof)
            }
            DofError::DuplicateEquationNumber { dof, other, equation } => {
                write!(
                    f,
                    "dofs {:?} and {:?} share equation number {:?}",
                    dof, other, equation
                )
            }
            DofError::Unnumbered { dof } => {
                write!(f, "dof {:?} has no equation number under the current numbering", dof)
            }
            DofError::MissingDof { node, dof_id } => {
                write!(f, "node {} carries no dof with id {:?}", node, dof_id)
            }
            DofError::ValueUnavailable { equation, mode } => {
                write!(
                    f,
                    "no value available for equation {:?} in mode {:?}",
                    equation, mode
                )
            }
        }
    }
}

impl Error for DofError {}

/// Result of a persistence save/restore operation.
///
/// Unlike [`DofError`], these are not fatal: the caller owns the retry policy.
#[derive(Debug)]
pub enum ContextError {
    /// The underlying stream failed.
    Io(std::io::Error),
    /// The payload could not be serialized or deserialized.
    Format(serde_json::Error),
    /// The payload was read but is inconsistent (mismatched array lengths,
    /// out-of-range master references) or targets a dof of the wrong kind.
    Malformed(String),
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::Io(err) => write!(f, "context i/o failure: {}", err),
            ContextError::Format(err) => write!(f, "context format failure: {}", err),
            ContextError::Malformed(msg) => write!(f, "malformed context: {}", msg),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ContextError::Io(err) => Some(err),
            ContextError::Format(err) => Some(err),
            ContextError::Malformed(_) => None,
        }
    }
}

impl From<std::io::Error> for ContextError {
    fn from(err: std::io::Error) -> Self {
        ContextError::Io(err)
    }
}

impl From<serde_json::Error> for ContextError {
    fn from(err: serde_json::Error) -> Self {
        ContextError::Format(err)
    }
}
