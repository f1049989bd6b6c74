//! Rill Frontend
//!
//! Lowers typed expression trees to dataflow instructions through the
//! `CompilerBackend` contract. The walker is the only component that
//! decides *what* code evaluates an expression; the backend decides how
//! the instructions are represented.

pub mod ast;
pub mod context;
pub mod typecheck;
pub mod walker;

pub use ast::{ExprKind, ExprTree};
pub use context::{Context, FnProp, FunctionContext};
pub use walker::ExprWalker;
