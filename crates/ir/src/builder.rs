//! The middle-end builder.
//!
//! Implements the walker-facing `CompilerBackend` contract by constructing
//! the IR tree. Structured constructs (wait, foreach, if) open
//! continuations and push their body blocks onto a cursor stack; the
//! matching `end_*` calls pop with shape checks. Unbalanced emission is a
//! programmer error and panics.

use rill_foundation::{
    Arg, BuiltinOp, CompilerBackend, ForeignRegistry, IntrinsicFunction, Redirects, TaskMode,
    TaskProps, Var, WaitMode,
};

use crate::instr::{
    Builtin, EngineOp, FunctionCall, Instruction, LocalFunctionCall, RunExternal,
};
use crate::tree::{
    BlockId, BlockType, CleanupAction, ContId, ContKind, Function, Program, Statement,
};

#[derive(Debug, Clone, Copy)]
enum OpenKind {
    Wait,
    Foreach,
    If { has_else: bool, in_else: bool },
}

#[derive(Debug)]
struct Open {
    cont: ContId,
    kind: OpenKind,
}

struct FunctionBuild {
    func: Function,
    block_stack: Vec<BlockId>,
    open_stack: Vec<Open>,
}

/// Builds a `Program` from the walker's emission calls.
pub struct MiddleEnd {
    program: Program,
    current: Option<FunctionBuild>,
}

impl MiddleEnd {
    pub fn new(foreign: ForeignRegistry) -> Self {
        Self {
            program: Program::new(foreign),
            current: None,
        }
    }

    pub fn foreign(&self) -> &ForeignRegistry {
        &self.program.foreign
    }

    pub fn start_function(&mut self, name: &str, inputs: Vec<Var>, outputs: Vec<Var>) {
        assert!(
            self.current.is_none(),
            "started function {} while another is open",
            name
        );
        let func = Function::new(name, inputs, outputs);
        self.current = Some(FunctionBuild {
            block_stack: vec![func.main_block_id()],
            open_stack: Vec::new(),
            func,
        });
    }

    pub fn end_function(&mut self) {
        let build = self.current.take().expect("no function open");
        assert!(
            build.open_stack.is_empty(),
            "function {} ended with unclosed constructs",
            build.func.name
        );
        assert_eq!(build.block_stack.len(), 1);
        self.program.add_function(build.func);
    }

    pub fn declare_global(&mut self, var: Var, value: Arg) {
        self.program.add_global(var, value);
    }

    /// Finish building; panics if a function is still open.
    pub fn finish(self) -> Program {
        assert!(self.current.is_none(), "function still open at finish");
        self.program
    }

    fn build(&mut self) -> &mut FunctionBuild {
        self.current.as_mut().expect("no function open")
    }

    fn current_block(&mut self) -> BlockId {
        *self.build().block_stack.last().expect("no open block")
    }

    fn push(&mut self, inst: Instruction) {
        let block = self.current_block();
        self.build()
            .func
            .block_mut(block)
            .statements
            .push(Statement::Instruction(inst));
    }

    fn open(&mut self, kind: ContKind, block_type: BlockType, open_kind: OpenKind) -> ContId {
        let parent = self.current_block();
        let build = self.build();
        let cont = build.func.alloc_cont(parent, kind);
        build
            .func
            .block_mut(parent)
            .statements
            .push(Statement::Conditional(cont));
        let body = build.func.alloc_block(block_type, cont);
        build.block_stack.push(body);
        build.open_stack.push(Open {
            cont,
            kind: open_kind,
        });
        cont
    }

    fn close(&mut self, expect: &str) -> Open {
        let build = self.build();
        let open = build
            .open_stack
            .pop()
            .unwrap_or_else(|| panic!("no open construct to close for {}", expect));
        build.block_stack.pop().expect("block stack underflow");
        open
    }
}

impl CompilerBackend for MiddleEnd {
    fn declare(&mut self, var: &Var) {
        let block = self.current_block();
        self.build().func.block_mut(block).vars.push(var.clone());
    }

    fn add_comment(&mut self, text: &str) {
        self.push(Instruction::comment(text));
    }

    fn assign_scalar(&mut self, dst: &Var, src: Arg) {
        assert!(dst.ty().is_prim_future() && !dst.ty().is_file(), "{}", dst);
        assert!(
            src.ty().assignable_to(&dst.ty().deref_result()),
            "{} = {}",
            dst,
            src
        );
        self.push(EngineOp::store(dst.clone(), src));
    }

    fn assign_file(&mut self, dst: &Var, src: Arg) {
        assert!(dst.ty().is_file());
        self.push(EngineOp::store(dst.clone(), src));
    }

    fn assign_array(&mut self, dst: &Var, src: Arg) {
        assert!(dst.ty().is_array());
        self.push(EngineOp::store(dst.clone(), src));
    }

    fn assign_bag(&mut self, dst: &Var, src: Arg) {
        assert!(dst.ty().is_bag());
        self.push(EngineOp::store(dst.clone(), src));
    }

    fn assign_ref(&mut self, dst: &Var, src: &Var) {
        assert!(dst.ty().is_ref());
        self.push(EngineOp::store(dst.clone(), src.as_arg()));
    }

    fn retrieve_scalar(&mut self, dst: &Var, src: &Var) {
        assert!(
            (src.ty().is_prim_future() || src.ty().is_updateable()) && !src.ty().is_file()
        );
        self.push(EngineOp::load(dst.clone(), src.clone()));
    }

    fn retrieve_file(&mut self, dst: &Var, src: &Var) {
        assert!(src.ty().is_file());
        self.push(EngineOp::load(dst.clone(), src.clone()));
    }

    fn retrieve_array(&mut self, dst: &Var, src: &Var) {
        assert!(src.ty().is_array());
        self.push(EngineOp::load(dst.clone(), src.clone()));
    }

    fn retrieve_bag(&mut self, dst: &Var, src: &Var) {
        assert!(src.ty().is_bag());
        self.push(EngineOp::load(dst.clone(), src.clone()));
    }

    fn retrieve_recursive(&mut self, dst: &Var, src: &Var) {
        assert!(src.ty().is_container());
        self.push(EngineOp::load_recursive(dst.clone(), src.clone()));
    }

    fn store_recursive(&mut self, dst: &Var, src: Arg) {
        assert!(dst.ty().is_container());
        self.push(EngineOp::store_recursive(dst.clone(), src));
    }

    fn retrieve_ref(&mut self, dst: &Var, src: &Var) {
        assert!(src.ty().is_ref());
        self.push(EngineOp::load(dst.clone(), src.clone()));
    }

    fn copy_file(&mut self, dst: &Var, src: &Var) {
        assert!(dst.ty().is_file() && src.ty().is_file());
        self.push(Builtin::async_(
            BuiltinOp::CopyFile,
            Some(dst.clone()),
            vec![src.as_arg()],
            TaskProps::new(),
        ));
    }

    fn latest_value(&mut self, dst: &Var, src: &Var) {
        assert!(src.ty().is_updateable());
        self.push(EngineOp::latest_value(dst.clone(), src.clone()));
    }

    fn deref_scalar(&mut self, dst: &Var, src: &Var) {
        self.push(EngineOp::deref(dst.clone(), src.clone()));
    }

    fn deref_file(&mut self, dst: &Var, src: &Var) {
        assert!(dst.ty().is_file());
        self.push(EngineOp::deref(dst.clone(), src.clone()));
    }

    fn array_lookup_ref_imm(&mut self, dst: &Var, array: &Var, index: Arg, array_is_ref: bool) {
        self.push(EngineOp::array_lookup_ref_imm(
            dst.clone(),
            array.clone(),
            index,
            array_is_ref,
        ));
    }

    fn array_lookup_future(&mut self, dst: &Var, array: &Var, index: &Var, array_is_ref: bool) {
        self.push(EngineOp::array_lookup_future(
            dst.clone(),
            array.clone(),
            index.clone(),
            array_is_ref,
        ));
    }

    fn array_insert_imm(&mut self, array: &Var, index: Arg, member: &Var) {
        self.push(EngineOp::array_insert_imm(array.clone(), index, member.clone()));
    }

    fn array_insert_future(&mut self, array: &Var, index: &Var, member: &Var) {
        self.push(EngineOp::array_insert_future(
            array.clone(),
            index.clone(),
            member.clone(),
        ));
    }

    fn array_build(&mut self, array: &Var, keys: Vec<Arg>, vals: Vec<Var>) {
        self.push(EngineOp::array_build(array.clone(), keys, vals));
    }

    fn bag_insert(&mut self, bag: &Var, member: &Var) {
        self.push(EngineOp::bag_insert(bag.clone(), member.clone()));
    }

    fn struct_lookup(&mut self, dst: &Var, struct_var: &Var, field: &str) {
        assert!(struct_var.ty().is_struct());
        self.push(EngineOp::struct_lookup(dst.clone(), struct_var.clone(), field));
    }

    fn struct_ref_lookup(&mut self, dst: &Var, struct_var: &Var, field: &str) {
        assert!(struct_var.ty().is_struct_ref());
        self.push(EngineOp::struct_ref_lookup(
            dst.clone(),
            struct_var.clone(),
            field,
        ));
    }

    fn local_op(&mut self, op: BuiltinOp, out: Option<&Var>, inputs: Vec<Arg>) {
        self.push(Builtin::local(op, out.cloned(), inputs));
    }

    fn async_op(&mut self, op: BuiltinOp, out: Option<&Var>, inputs: Vec<Arg>, props: TaskProps) {
        props.assert_internal_types_valid();
        self.push(Builtin::async_(op, out.cloned(), inputs, props));
    }

    fn start_wait_statement(
        &mut self,
        name: &str,
        wait_vars: Vec<Var>,
        mode: WaitMode,
        recursive: bool,
        task_mode: TaskMode,
        props: TaskProps,
    ) {
        self.open(
            ContKind::Wait {
                name: name.to_string(),
                wait_vars,
                mode,
                recursive,
                task_mode,
                props,
            },
            BlockType::WaitBlock,
            OpenKind::Wait,
        );
    }

    fn end_wait_statement(&mut self) {
        let open = self.close("wait");
        assert!(matches!(open.kind, OpenKind::Wait), "mismatched end_wait");
    }

    fn start_foreach_loop(&mut self, name: &str, container: &Var, member: &Var, key: Option<&Var>) {
        assert!(container.ty().is_container());
        self.open(
            ContKind::Foreach {
                name: name.to_string(),
                container: container.clone(),
                member: member.clone(),
                key: key.cloned(),
            },
            BlockType::ForeachBody,
            OpenKind::Foreach,
        );
    }

    fn end_foreach_loop(&mut self) {
        let open = self.close("foreach");
        assert!(matches!(open.kind, OpenKind::Foreach), "mismatched end_foreach");
    }

    fn start_if_statement(&mut self, condition: Arg, has_else: bool) {
        assert!(
            condition.ty().is_bool() || condition.ty().is_int(),
            "if condition must be a local bool or int, got {}",
            condition.ty()
        );
        let cont = self.open(
            ContKind::If {
                condition,
                has_else,
            },
            BlockType::ThenBlock,
            OpenKind::If {
                has_else,
                in_else: false,
            },
        );
        if has_else {
            // Allocate the else block now so the then/else order is fixed.
            self.build().func.alloc_block(BlockType::ElseBlock, cont);
        }
    }

    fn start_else_block(&mut self) {
        let build = self.build();
        let open = build.open_stack.last_mut().expect("no open if");
        match &mut open.kind {
            OpenKind::If { has_else, in_else } => {
                assert!(*has_else, "else block without has_else");
                assert!(!*in_else, "second else block");
                *in_else = true;
            }
            _ => panic!("start_else outside if"),
        }
        let cont = open.cont;
        let else_block = build.func.cont(cont).blocks[1];
        build.block_stack.pop();
        build.block_stack.push(else_block);
    }

    fn end_if_statement(&mut self) {
        let open = self.close("if");
        match open.kind {
            OpenKind::If { has_else, in_else } => {
                assert!(
                    !has_else || in_else,
                    "if with has_else closed before its else block"
                );
            }
            _ => panic!("mismatched end_if"),
        }
    }

    fn function_call(
        &mut self,
        name: &str,
        inputs: Vec<Arg>,
        outputs: Vec<Var>,
        mode: TaskMode,
        props: TaskProps,
    ) {
        props.assert_internal_types_valid();
        self.push(FunctionCall::new(name, inputs, outputs, mode, props));
    }

    fn builtin_function_call(
        &mut self,
        name: &str,
        inputs: Vec<Arg>,
        outputs: Vec<Var>,
        props: TaskProps,
    ) {
        props.assert_internal_types_valid();
        self.push(FunctionCall::foreign(name, inputs, outputs, props));
    }

    fn builtin_local_function_call(&mut self, name: &str, inputs: Vec<Arg>, outputs: Vec<Var>) {
        self.push(LocalFunctionCall::new(name, inputs, outputs));
    }

    fn intrinsic_call(
        &mut self,
        intrinsic: IntrinsicFunction,
        inputs: Vec<Var>,
        outputs: Vec<Var>,
        _props: TaskProps,
    ) {
        match intrinsic {
            IntrinsicFunction::Filename => {
                assert_eq!(inputs.len(), 1);
                assert_eq!(outputs.len(), 1);
                assert!(inputs[0].ty().is_file());
                self.push(EngineOp::get_filename(outputs[0].clone(), inputs[0].clone()));
            }
        }
    }

    fn run_external(
        &mut self,
        cmd: &str,
        args: Vec<Arg>,
        in_files: Vec<Arg>,
        out_files: Vec<Var>,
        redirects: Redirects,
        has_side_effects: bool,
        deterministic: bool,
    ) {
        self.push(RunExternal::new(
            cmd,
            in_files,
            out_files,
            args,
            redirects,
            has_side_effects,
            deterministic,
        ));
    }

    fn checkpoint_lookup_enabled(&mut self, out: &Var) {
        assert!(out.ty().is_prim_value() && out.ty().is_bool());
        self.push(EngineOp::checkpoint_lookup_enabled(out.clone()));
    }

    fn checkpoint_write_enabled(&mut self, out: &Var) {
        assert!(out.ty().is_prim_value() && out.ty().is_bool());
        self.push(EngineOp::checkpoint_write_enabled(out.clone()));
    }

    fn lookup_checkpoint(&mut self, exists: &Var, val: &Var, key: Arg) {
        self.push(EngineOp::lookup_checkpoint(exists.clone(), val.clone(), key));
    }

    fn write_checkpoint(&mut self, key: Arg, val: Arg) {
        self.push(EngineOp::write_checkpoint(key, val));
    }

    fn pack_values(&mut self, dst: &Var, inputs: Vec<Arg>) {
        assert!(dst.ty().is_prim_value() && dst.ty().is_blob());
        self.push(EngineOp::pack_values(dst.clone(), inputs));
    }

    fn unpack_values(&mut self, dsts: Vec<Var>, src: &Var) {
        self.push(EngineOp::unpack_values(dsts, src.clone()));
    }

    fn free_blob(&mut self, blob: &Var) {
        // Released when the enclosing block's scope ends, not inline.
        let block = self.current_block();
        self.build()
            .func
            .block_mut(block)
            .cleanups
            .push(CleanupAction {
                var: blob.clone(),
                action: EngineOp::free_blob(blob.clone()),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Statement;
    use rill_foundation::{Alloc, DefKind, PrimKind, Type};

    fn fut(name: &str, kind: PrimKind) -> Var {
        Var::new(name, Type::future(kind), Alloc::Temp, DefKind::LocalCompiler)
    }

    #[test]
    fn builds_nested_wait_and_if() {
        let mut backend = MiddleEnd::new(ForeignRegistry::new());
        backend.start_function("main", vec![], vec![]);

        let x = fut("x", PrimKind::Int);
        backend.declare(&x);
        backend.assign_scalar(&x, Arg::int_lit(1));

        backend.start_wait_statement(
            "w-0",
            vec![x.clone()],
            WaitMode::WaitOnly,
            false,
            TaskMode::LocalControl,
            TaskProps::new(),
        );
        let cond = Var::new(
            "v_c",
            Type::value(PrimKind::Bool),
            Alloc::Local,
            DefKind::LocalCompiler,
        );
        backend.declare(&cond);
        backend.start_if_statement(cond.as_arg(), true);
        backend.add_comment("then");
        backend.start_else_block();
        backend.add_comment("else");
        backend.end_if_statement();
        backend.end_wait_statement();

        backend.end_function();
        let program = backend.finish();

        let func = program.lookup_function("main").unwrap();
        let main = func.main_block();
        assert_eq!(main.vars, vec![x.clone()]);
        // store + wait
        assert_eq!(main.statements.len(), 2);
        let Statement::Conditional(wait_id) = &main.statements[1] else {
            panic!("expected wait continuation");
        };
        let wait = func.cont(*wait_id);
        assert_eq!(wait.parent, func.main_block_id());
        let wait_body = func.block(wait.blocks[0]);
        let Statement::Conditional(if_id) = &wait_body.statements[0] else {
            panic!("expected if continuation");
        };
        let if_cont = func.cont(*if_id);
        assert_eq!(if_cont.blocks.len(), 2);
        assert_eq!(func.block(if_cont.blocks[0]).block_type, BlockType::ThenBlock);
        assert_eq!(func.block(if_cont.blocks[1]).block_type, BlockType::ElseBlock);
    }

    #[test]
    #[should_panic(expected = "unclosed constructs")]
    fn unbalanced_wait_is_rejected() {
        let mut backend = MiddleEnd::new(ForeignRegistry::new());
        backend.start_function("main", vec![], vec![]);
        backend.start_wait_statement(
            "w-0",
            vec![],
            WaitMode::WaitOnly,
            false,
            TaskMode::Local,
            TaskProps::new(),
        );
        backend.end_function();
    }

    #[test]
    fn free_blob_lands_in_cleanups() {
        let mut backend = MiddleEnd::new(ForeignRegistry::new());
        backend.start_function("main", vec![], vec![]);
        let blob = Var::new(
            "v_blob",
            Type::value(PrimKind::Blob),
            Alloc::Local,
            DefKind::LocalCompiler,
        );
        backend.declare(&blob);
        backend.free_blob(&blob);
        backend.end_function();
        let program = backend.finish();
        let func = program.lookup_function("main").unwrap();
        assert_eq!(func.main_block().cleanups.len(), 1);
        assert_eq!(func.main_block().cleanups[0].var, blob);
    }
}
