//! Rill Foundation
//!
//! Core language model shared by the rill compiler frontend and the
//! intermediate representation: the type algebra, variable and argument
//! descriptors, the builtin operator vocabulary, the foreign-function
//! registry, and the task/refcount model of the flume engine.

pub mod arg;
pub mod backend;
pub mod error;
pub mod foreign;
pub mod ops;
pub mod refcount;
pub mod settings;
pub mod task;
pub mod types;
pub mod var;

pub use arg::{Arg, Const};
pub use backend::{CompilerBackend, Redirects};
pub use error::{UserError, UserResult};
pub use foreign::{ForeignRegistry, IntrinsicFunction, SpecialFunction};
pub use ops::{op_eval, BuiltinOp, Op};
pub use refcount::{has_read_refcount, has_write_refcount, Counters, RefCountKind};
pub use settings::Settings;
pub use task::{TaskMode, TaskPropKey, TaskProps, WaitMode};
pub use types::{check_copy, FunctionType, PrimKind, StructType, Type};
pub use var::{Alloc, DefKind, Var};
