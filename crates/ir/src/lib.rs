//! Rill IR
//!
//! The dataflow intermediate representation produced by the middle end.
//! Instructions operate on named futures; each instruction answers the
//! semantic queries the optimizer passes rely on (data flow, blocking,
//! folding, make-immediate, computed values, refcounts).
//!
//! Pipeline: expression trees -> middle end builder -> IR tree -> passes

pub mod builder;
pub mod instr;
pub mod opt;
pub mod tree;

pub use builder::MiddleEnd;
pub use instr::{
    Fetched, InitType, Instruction, MakeImmChange, MakeImmRequest, Opcode, RenameMode,
};
pub use opt::computed::{ComputedValue, CvMap, ResultVal};
pub use opt::validate::Validator;
pub use tree::{
    Block, BlockId, BlockType, CleanupAction, ContId, ContKind, Continuation, Function, Program,
    Statement,
};
