//! User-facing compile errors.
//!
//! These are the recoverable errors the walker reports with source-line
//! context. Compiler-internal invariant violations are not represented
//! here: code that detects a "cannot happen" condition panics.

use thiserror::Error;

/// An error in the user's program, formatted with source-line context by
/// the raising phase.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UserError {
    /// Operand or copy types do not agree.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("undefined function: {0}")]
    UndefinedFunction(String),

    #[error("undefined type: {0}")]
    UndefinedType(String),

    /// A name was defined twice in the same scope.
    #[error("double define: {0}")]
    DoubleDefine(String),

    /// An annotation was applied to a function that does not declare the
    /// matching property.
    #[error("invalid annotation: {0}")]
    InvalidAnnotation(String),

    #[error("missing required option: {0}")]
    InvalidOption(String),

    /// Any other error in the user's program (self-assignment, wrong
    /// output arity, and similar).
    #[error("{0}")]
    Invalid(String),
}

pub type UserResult<T> = Result<T, UserError>;
