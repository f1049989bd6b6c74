//! The emission contract between the expression walker and the middle end.
//!
//! The walker lowers expression trees by calling these operations; the IR
//! crate's builder implements them by constructing the instruction tree.
//! The walker never sees the constructed form.

use crate::arg::Arg;
use crate::foreign::IntrinsicFunction;
use crate::ops::BuiltinOp;
use crate::task::{TaskMode, TaskProps, WaitMode};
use crate::var::Var;

/// Standard stream redirections of an external command.
#[derive(Debug, Clone, Default)]
pub struct Redirects {
    pub stdin: Option<Arg>,
    pub stdout: Option<Arg>,
    pub stderr: Option<Arg>,
}

impl Redirects {
    /// The redirect filenames present, in stdin/stdout/stderr order.
    pub fn redirections(&self) -> Vec<Arg> {
        [&self.stdin, &self.stdout, &self.stderr]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

/// The operations the walker requires of an emitter.
///
/// Invariant: `Sync`-mode emission never crosses a task boundary that
/// would require remote execution.
pub trait CompilerBackend {
    /// Declare a variable in the current block.
    fn declare(&mut self, var: &Var);

    fn add_comment(&mut self, text: &str);

    // --- primitive data movement ---

    fn assign_scalar(&mut self, dst: &Var, src: Arg);
    fn assign_file(&mut self, dst: &Var, src: Arg);
    fn assign_array(&mut self, dst: &Var, src: Arg);
    fn assign_bag(&mut self, dst: &Var, src: Arg);
    fn assign_ref(&mut self, dst: &Var, src: &Var);
    fn retrieve_scalar(&mut self, dst: &Var, src: &Var);
    fn retrieve_file(&mut self, dst: &Var, src: &Var);
    fn retrieve_array(&mut self, dst: &Var, src: &Var);
    fn retrieve_bag(&mut self, dst: &Var, src: &Var);
    /// Retrieve a container's contents, recursing through nested futures.
    fn retrieve_recursive(&mut self, dst: &Var, src: &Var);
    fn store_recursive(&mut self, dst: &Var, src: Arg);
    fn retrieve_ref(&mut self, dst: &Var, src: &Var);
    fn copy_file(&mut self, dst: &Var, src: &Var);
    /// Snapshot the current value of an updateable.
    fn latest_value(&mut self, dst: &Var, src: &Var);

    // --- dereference ---

    fn deref_scalar(&mut self, dst: &Var, src: &Var);
    fn deref_file(&mut self, dst: &Var, src: &Var);

    // --- containers ---

    fn array_lookup_ref_imm(&mut self, dst: &Var, array: &Var, index: Arg, array_is_ref: bool);
    fn array_lookup_future(&mut self, dst: &Var, array: &Var, index: &Var, array_is_ref: bool);
    fn array_insert_imm(&mut self, array: &Var, index: Arg, member: &Var);
    fn array_insert_future(&mut self, array: &Var, index: &Var, member: &Var);
    fn array_build(&mut self, array: &Var, keys: Vec<Arg>, vals: Vec<Var>);
    fn bag_insert(&mut self, bag: &Var, member: &Var);

    // --- structs ---

    fn struct_lookup(&mut self, dst: &Var, struct_var: &Var, field: &str);
    fn struct_ref_lookup(&mut self, dst: &Var, struct_var: &Var, field: &str);

    // --- operators ---

    fn local_op(&mut self, op: BuiltinOp, out: Option<&Var>, inputs: Vec<Arg>);
    fn async_op(&mut self, op: BuiltinOp, out: Option<&Var>, inputs: Vec<Arg>, props: TaskProps);

    // --- control ---

    #[allow(clippy::too_many_arguments)]
    fn start_wait_statement(
        &mut self,
        name: &str,
        wait_vars: Vec<Var>,
        mode: WaitMode,
        recursive: bool,
        task_mode: TaskMode,
        props: TaskProps,
    );
    fn end_wait_statement(&mut self);
    fn start_foreach_loop(&mut self, name: &str, container: &Var, member: &Var, key: Option<&Var>);
    fn end_foreach_loop(&mut self);
    fn start_if_statement(&mut self, condition: Arg, has_else: bool);
    fn start_else_block(&mut self);
    fn end_if_statement(&mut self);

    // --- function dispatch ---

    fn function_call(
        &mut self,
        name: &str,
        inputs: Vec<Arg>,
        outputs: Vec<Var>,
        mode: TaskMode,
        props: TaskProps,
    );
    fn builtin_function_call(
        &mut self,
        name: &str,
        inputs: Vec<Arg>,
        outputs: Vec<Var>,
        props: TaskProps,
    );
    fn builtin_local_function_call(&mut self, name: &str, inputs: Vec<Arg>, outputs: Vec<Var>);
    fn intrinsic_call(
        &mut self,
        intrinsic: IntrinsicFunction,
        inputs: Vec<Var>,
        outputs: Vec<Var>,
        props: TaskProps,
    );
    #[allow(clippy::too_many_arguments)]
    fn run_external(
        &mut self,
        cmd: &str,
        args: Vec<Arg>,
        in_files: Vec<Arg>,
        out_files: Vec<Var>,
        redirects: Redirects,
        has_side_effects: bool,
        deterministic: bool,
    );

    // --- checkpointing ---

    fn checkpoint_lookup_enabled(&mut self, out: &Var);
    fn checkpoint_write_enabled(&mut self, out: &Var);
    fn lookup_checkpoint(&mut self, exists: &Var, val: &Var, key: Arg);
    fn write_checkpoint(&mut self, key: Arg, val: Arg);
    fn pack_values(&mut self, dst: &Var, inputs: Vec<Arg>);
    fn unpack_values(&mut self, dsts: Vec<Var>, src: &Var);
    /// Schedule a blob local for release at block end.
    fn free_blob(&mut self, blob: &Var);
}
