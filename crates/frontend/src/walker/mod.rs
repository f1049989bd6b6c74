//! The expression walker.
//!
//! Walks typed expression trees and emits dataflow code through the
//! `CompilerBackend` contract. Expression results land in caller-provided
//! output futures; temporaries are minted in the current scope as needed.

mod arrays;
mod calls;
mod structs;

pub use calls::WrapperCache;

use indexmap::IndexMap;
use tracing::debug;

use rill_foundation::{
    check_copy, Alloc, Arg, BuiltinOp, CompilerBackend, PrimKind, TaskProps, Type, UserError,
    UserResult, Var,
};

use crate::ast::{literals, ExprKind, ExprTree};
use crate::context::Context;
use crate::typecheck;

/// Map applied to variable references during re-lowering.
pub type Renames = IndexMap<String, String>;

pub struct ExprWalker<'a, B: CompilerBackend> {
    backend: &'a mut B,
    wrappers: WrapperCache,
}

impl<'a, B: CompilerBackend> ExprWalker<'a, B> {
    pub fn new(backend: &'a mut B) -> Self {
        Self::with_wrappers(backend, WrapperCache::new())
    }

    /// A walker continuing with wrapper decisions from earlier statements.
    pub fn with_wrappers(backend: &'a mut B, wrappers: WrapperCache) -> Self {
        Self { backend, wrappers }
    }

    pub fn into_wrappers(self) -> WrapperCache {
        self.wrappers
    }

    pub fn backend(&mut self) -> &mut B {
        &mut *self.backend
    }

    /// Wrapper functions that call lowering decided must exist.
    pub fn wrappers(&self) -> &WrapperCache {
        &self.wrappers
    }

    /// Evaluate an expression into the provided output variables. Multiple
    /// outputs are only valid for function calls.
    pub fn eval_to_vars(
        &mut self,
        ctx: &mut Context,
        tree: &ExprTree,
        outs: &[Var],
        renames: Option<&Renames>,
    ) -> UserResult<()> {
        debug!(line = tree.line(), kind = ?tree.kind(), outputs = outs.len(), "walk expression");
        ctx.sync_line(tree.line());

        if tree.kind() == ExprKind::CallFunction {
            return self.call_function_expression(ctx, tree, outs, renames);
        }

        if outs.len() != 1 {
            return Err(UserError::Invalid(format!(
                "{}: cannot assign expression to multiple variables",
                ctx.file_line()
            )));
        }
        let o_var = &outs[0];

        match tree.kind() {
            ExprKind::Variable => {
                let mut src_name = tree.text();
                if let Some(renames) = renames {
                    if let Some(renamed) = renames.get(src_name) {
                        src_name = renamed;
                    }
                }
                let src_var = ctx.lookup_var_user(src_name)?;
                if o_var.name() == src_var.name() {
                    return Err(UserError::Invalid(format!(
                        "{}: assigning variable {} to itself",
                        ctx.file_line(),
                        o_var.name()
                    )));
                }
                self.assign_variable(ctx, o_var, &src_var)
            }
            ExprKind::IntLiteral => {
                let val = literals::extract_int_lit(tree).ok_or_else(|| {
                    UserError::Invalid(format!("{}: malformed int literal", ctx.file_line()))
                })?;
                self.assign_int_lit(o_var, val)
            }
            ExprKind::FloatLiteral => {
                let val = literals::extract_float_lit(tree).ok_or_else(|| {
                    UserError::Invalid(format!("{}: malformed float literal", ctx.file_line()))
                })?;
                self.assign_float_lit(o_var, val)
            }
            ExprKind::StringLiteral => self.assign_string_lit(o_var, tree.text()),
            ExprKind::BoolLiteral => {
                let val = literals::extract_bool_lit(tree).ok_or_else(|| {
                    UserError::Invalid(format!("{}: malformed bool literal", ctx.file_line()))
                })?;
                self.assign_bool_lit(o_var, val)
            }
            ExprKind::Operator => {
                // Unary negation of a literal folds at compile time.
                if let Some(val) = literals::extract_int_lit(tree) {
                    self.assign_int_lit(o_var, val)
                } else if let Some(val) = literals::extract_float_lit(tree) {
                    self.assign_float_lit(o_var, val)
                } else {
                    self.call_operator(ctx, tree, o_var, renames)
                }
            }
            ExprKind::ArrayLoad => self.array_load(ctx, tree, o_var, renames),
            ExprKind::StructLoad => self.struct_load(ctx, tree, o_var, renames),
            ExprKind::ArrayRange => self.array_range(ctx, tree, o_var, renames),
            ExprKind::ArrayElems | ExprKind::ArrayKvElems => {
                self.array_elems(ctx, tree, o_var, renames)
            }
            ExprKind::CallFunction => unreachable!(),
        }
    }

    /// Evaluate an expression, creating a temporary output variable unless
    /// an existing variable can be reused without a copy.
    pub fn eval(
        &mut self,
        ctx: &mut Context,
        tree: &ExprTree,
        ty: &Type,
        store_in_stack: bool,
        renames: Option<&Renames>,
    ) -> UserResult<Var> {
        ctx.sync_line(tree.line());

        if tree.kind() == ExprKind::Variable {
            let mut name = tree.text();
            if let Some(renames) = renames {
                if let Some(renamed) = renames.get(name) {
                    name = renamed;
                }
            }
            let var = ctx.lookup_var_user(name)?;
            // Reuse when storage is adequate; a type conversion still needs
            // a fresh temporary.
            if (var.alloc() == Alloc::Stack || !store_in_stack) && var.ty() == ty {
                return Ok(var);
            }
        }

        if tree.kind() == ExprKind::StructLoad
            && typecheck::find_expr_type(ctx, tree.child(0))?.is_struct()
        {
            return self.lookup_struct_field(ctx, tree, ty, store_in_stack, None, renames);
        }

        let tmp = self.create_tmp(ctx, ty.clone(), store_in_stack)?;
        debug!(tmp = %tmp, "create tmp for expression");
        self.eval_to_vars(ctx, tree, std::slice::from_ref(&tmp), renames)?;
        Ok(tmp)
    }

    // --- variable creation, declared in both scope and backend ---

    pub(crate) fn create_tmp(
        &mut self,
        ctx: &mut Context,
        ty: Type,
        store_in_stack: bool,
    ) -> UserResult<Var> {
        let var = ctx.create_tmp_var(ty, store_in_stack)?;
        self.backend.declare(&var);
        Ok(var)
    }

    pub(crate) fn create_tmp_alias(&mut self, ctx: &mut Context, ty: Type) -> UserResult<Var> {
        let var = ctx.create_alias_var(ty)?;
        self.backend.declare(&var);
        Ok(var)
    }

    pub(crate) fn create_tmp_local_val(&mut self, ctx: &mut Context, ty: Type) -> UserResult<Var> {
        let var = ctx.create_local_value_var(ty, None)?;
        self.backend.declare(&var);
        Ok(var)
    }

    pub(crate) fn create_value_of_var(
        &mut self,
        ctx: &mut Context,
        future: &Var,
    ) -> UserResult<Var> {
        let var = ctx.create_value_of_var(future)?;
        self.backend.declare(&var);
        Ok(var)
    }

    pub(crate) fn create_value_var(
        &mut self,
        ctx: &mut Context,
        ty: Type,
        preferred: &str,
    ) -> UserResult<Var> {
        let var = ctx.create_local_value_var(ty, Some(preferred))?;
        self.backend.declare(&var);
        Ok(var)
    }

    pub(crate) fn create_struct_field_tmp(
        &mut self,
        ctx: &mut Context,
        root: &Var,
        ty: Type,
        path: &[String],
        alloc: Alloc,
    ) -> Var {
        let var = ctx.create_struct_field_var(root, path, ty, alloc);
        self.backend.declare(&var);
        var
    }

    // --- data movement ---

    /// Store a value into a future of the matching type.
    pub fn assign(&mut self, dst: &Var, src: Arg) {
        let ty = dst.ty();
        if ty.is_file() {
            self.backend.assign_file(dst, src);
        } else if ty.is_prim_future() {
            self.backend.assign_scalar(dst, src);
        } else if ty.is_array() {
            self.backend.assign_array(dst, src);
        } else if ty.is_bag() {
            self.backend.assign_bag(dst, src);
        } else {
            panic!("cannot assign to {}", dst);
        }
    }

    /// Retrieve a future into a value variable. Containers are retrieved
    /// one level deep; use `retrieve_container_values` for nested content.
    pub fn retrieve(&mut self, dst: &Var, src: &Var) {
        let ty = src.ty();
        if ty.is_file() {
            self.backend.retrieve_file(dst, src);
        } else if ty.is_prim_future() || ty.is_updateable() {
            self.backend.retrieve_scalar(dst, src);
        } else if ty.is_array() {
            self.backend.retrieve_array(dst, src);
        } else if ty.is_bag() {
            self.backend.retrieve_bag(dst, src);
        } else {
            panic!("don't know how to fetch {}", src);
        }
    }

    /// Create a value variable and retrieve a future into it.
    pub fn retrieve_to_var(&mut self, ctx: &mut Context, future: &Var) -> UserResult<Var> {
        let val = self.create_value_of_var(ctx, future)?;
        self.retrieve(&val, future);
        Ok(val)
    }

    /// Recursively fetch a container's contents into an unpacked value.
    pub fn retrieve_container_values(
        &mut self,
        ctx: &mut Context,
        container: &Var,
    ) -> UserResult<Var> {
        assert!(container.ty().is_container());
        let unpacked = container.ty().unpacked();
        let val = self.create_value_var(ctx, unpacked, container.name())?;
        self.backend.retrieve_recursive(&val, container);
        Ok(val)
    }

    pub fn retrieve_ref(&mut self, dst: &Var, src: &Var) {
        self.backend.retrieve_ref(dst, src);
    }

    pub fn assign_ref(&mut self, dst: &Var, src: &Var) {
        self.backend.assign_ref(dst, src);
    }

    /// Materialize a value into a fresh future of the matching type.
    pub fn assign_to_var(&mut self, ctx: &mut Context, value: Arg) -> UserResult<Var> {
        assert!(value.is_const() || value.var().alloc() == Alloc::Local);
        let result = self.create_tmp(ctx, value.future_type(), false)?;
        self.assign(&result, value);
        Ok(result)
    }

    pub fn async_op(&mut self, op: BuiltinOp, out: &Var, inputs: Vec<Arg>) {
        self.backend.async_op(op, Some(out), inputs, TaskProps::new());
    }

    // --- copies and dereferences ---

    /// Copy `src` into `dst` by value, dispatching on kind.
    pub fn copy_by_value(
        &mut self,
        ctx: &mut Context,
        src: &Var,
        dst: &Var,
        ty: &Type,
    ) -> UserResult<()> {
        if let Some(kind) = ty.prim_kind() {
            if kind == PrimKind::File {
                if dst.maybe_mapped() {
                    return Err(UserError::TypeMismatch(format!(
                        "{}: cannot physically copy into possibly-mapped file variable {}",
                        ctx.file_line(),
                        dst.name()
                    )));
                }
                self.backend.copy_file(dst, src);
            } else {
                self.async_op(BuiltinOp::copy_for(kind), dst, vec![src.as_arg()]);
            }
            return Ok(());
        }
        if ty.is_struct() {
            let mut src_path = Vec::new();
            let mut dst_path = Vec::new();
            return self.copy_struct_by_value(ctx, src, dst, &mut src_path, &mut dst_path, src, dst, ty);
        }
        if ty.is_container() {
            return self.copy_container_by_value(ctx, dst, src);
        }
        if ty.is_ref() {
            return self.copy_ref_by_value(ctx, src, dst, ty);
        }
        panic!(
            "{}: copying type {} by value not supported",
            ctx.file_line(),
            ty
        );
    }

    /// Dereference `src` into `dst`: dst = *src.
    pub fn dereference(&mut self, ctx: &mut Context, dst: &Var, src: &Var) -> UserResult<()> {
        assert!(src.ty().is_ref());
        assert!(src.ty().is_assignable_ref_to(dst.ty()));

        let dst_type = dst.ty();
        if dst_type.is_file() {
            self.backend.deref_file(dst, src);
        } else if dst_type.is_prim_future() {
            self.backend.deref_scalar(dst, src);
        } else if dst_type.is_container() {
            self.deref_then_copy_container(ctx, dst, src)?;
        } else if dst_type.is_struct() {
            self.dereference_struct(ctx, dst, src)?;
        } else {
            panic!("can't dereference type {}", src.ty());
        }
        Ok(())
    }

    fn copy_ref_by_value(
        &mut self,
        ctx: &mut Context,
        src: &Var,
        dst: &Var,
        ty: &Type,
    ) -> UserResult<()> {
        let name = ctx.construct_name("copy-ref-wait");
        self.backend.start_wait_statement(
            &name,
            vec![src.clone()],
            rill_foundation::WaitMode::WaitOnly,
            false,
            rill_foundation::TaskMode::Local,
            TaskProps::new(),
        );
        ctx.enter_block();
        let src_val = self.create_tmp_alias(ctx, ty.deref_result())?;
        self.retrieve_ref(&src_val, src);
        self.assign_ref(dst, &src_val);
        ctx.exit_scope();
        self.backend.end_wait_statement();
        Ok(())
    }

    // --- operators ---

    fn call_operator(
        &mut self,
        ctx: &mut Context,
        tree: &ExprTree,
        out: &Var,
        renames: Option<&Renames>,
    ) -> UserResult<()> {
        let op = typecheck::op_from_tree(ctx, tree, out.ty())?;
        let arg_count = tree.child_count();
        assert_eq!(
            arg_count,
            op.in_kinds.len(),
            "operator {} arity mismatch",
            tree.text()
        );

        let mut inputs = Vec::with_capacity(arg_count);
        for (i, kind) in op.in_kinds.iter().enumerate() {
            let expected = Type::future(*kind);
            let arg = self.eval(ctx, tree.child(i), &expected, false, renames)?;
            inputs.push(arg.as_arg());
        }
        self.async_op(op.code, out, inputs);
        Ok(())
    }

    // --- literal assignment ---

    fn assign_int_lit(&mut self, dst: &Var, val: i64) -> UserResult<()> {
        if dst.ty().is_int() {
            self.assign(dst, Arg::int_lit(val));
        } else {
            assert!(dst.ty().is_float(), "{}", dst);
            self.assign(dst, Arg::float_lit(literals::interpret_int_as_float(val)));
        }
        Ok(())
    }

    fn assign_float_lit(&mut self, dst: &Var, val: f64) -> UserResult<()> {
        assert!(dst.ty().is_float());
        self.assign(dst, Arg::float_lit(val));
        Ok(())
    }

    fn assign_bool_lit(&mut self, dst: &Var, val: bool) -> UserResult<()> {
        assert!(dst.ty().is_bool());
        self.assign(dst, Arg::bool_lit(val));
        Ok(())
    }

    fn assign_string_lit(&mut self, dst: &Var, val: &str) -> UserResult<()> {
        assert!(dst.ty().is_string());
        self.assign(dst, Arg::string_lit(val));
        Ok(())
    }

    fn assign_variable(&mut self, ctx: &mut Context, dst: &Var, src: &Var) -> UserResult<()> {
        let src = if src.ty().is_updateable() {
            self.snapshot_updateable(ctx, src)?
        } else {
            src.clone()
        };
        check_copy(src.ty(), dst.ty())?;
        self.copy_by_value(ctx, &src, dst, &src.ty().clone())
    }

    /// Snapshot an updateable into a fresh future so types match.
    pub(crate) fn snapshot_updateable(
        &mut self,
        ctx: &mut Context,
        src: &Var,
    ) -> UserResult<Var> {
        assert!(src.ty().is_updateable());
        assert!(
            src.ty().is_float(),
            "updateable kind {} not yet supported",
            src.ty()
        );
        let val = self.create_tmp_local_val(ctx, src.ty().value_of_future())?;
        self.backend.latest_value(&val, src);

        // Explicit retrieve and store lets the optimizer remove the
        // intermediate future in most cases.
        self.assign_to_var(ctx, val.as_arg())
    }
}
