//! Struct expression lowering: field access and struct copies.

use rill_foundation::{
    Alloc, CompilerBackend, TaskMode, TaskProps, Type, UserResult, Var, WaitMode,
};

use crate::ast::{ExprKind, ExprTree};
use crate::context::Context;
use crate::typecheck;

use super::{ExprWalker, Renames};

impl<B: CompilerBackend> ExprWalker<'_, B> {
    pub(super) fn struct_load(
        &mut self,
        ctx: &mut Context,
        tree: &ExprTree,
        o_var: &Var,
        renames: Option<&Renames>,
    ) -> UserResult<()> {
        self.lookup_struct_field(ctx, tree, &o_var.ty().clone(), false, Some(o_var), renames)?;
        Ok(())
    }

    /// Resolve a (possibly nested) struct field access. Returns an alias
    /// for the member, or `out_var` once the member has been copied or
    /// dereferenced into it.
    pub(super) fn lookup_struct_field(
        &mut self,
        ctx: &mut Context,
        tree: &ExprTree,
        _ty: &Type,
        store_in_stack: bool,
        out_var: Option<&Var>,
        renames: Option<&Renames>,
    ) -> UserResult<Var> {
        assert!(
            !store_in_stack,
            "struct lookup results cannot be stack stored"
        );
        assert_eq!(tree.kind(), ExprKind::StructLoad);
        assert_eq!(tree.child_count(), 1);

        let field_name = tree.text().to_string();
        let parent_tree = tree.child(0);

        let parent = if parent_tree.kind() == ExprKind::Variable {
            let mut name = parent_tree.text();
            if let Some(renames) = renames {
                if let Some(renamed) = renames.get(name) {
                    name = renamed;
                }
            }
            ctx.lookup_var_user(name)?
        } else {
            let parent_type = typecheck::find_expr_type(ctx, parent_tree)?;
            assert!(parent_type.is_struct() || parent_type.is_struct_ref());
            self.eval(ctx, parent_tree, &parent_type, false, renames)?
        };

        // Walk upward through nested accesses to find the root struct and
        // the full field path from it.
        let mut path = vec![field_name.clone()];
        let mut struct_tree = tree.child(0);
        while struct_tree.kind() == ExprKind::StructLoad {
            path.insert(0, struct_tree.text().to_string());
            struct_tree = struct_tree.child(0);
        }
        let (root_struct, path_from_root) = if struct_tree.kind() == ExprKind::Variable {
            let root = ctx.lookup_var_user(struct_tree.text())?;
            (root, path)
        } else {
            (parent.clone(), vec![field_name.clone()])
        };

        self.struct_lookup(ctx, &parent, &field_name, &root_struct, &path_from_root, out_var)
    }

    /// Look up one struct field. For a plain struct the result is an alias
    /// to the member; for a struct reference it is a reference to the
    /// member, produced asynchronously.
    pub(crate) fn struct_lookup(
        &mut self,
        ctx: &mut Context,
        struct_var: &Var,
        field: &str,
        root_struct: &Var,
        field_path: &[String],
        out_var: Option<&Var>,
    ) -> UserResult<Var> {
        assert!(!field_path.is_empty());
        let member_type = typecheck::find_struct_field_type(ctx, field, struct_var.ty())?;

        let result = if struct_var.ty().is_struct_ref() {
            let result_type = Type::reference(member_type);
            let result = match out_var {
                Some(out) if result_type.assignable_to(out.ty()) => out.clone(),
                _ => self.create_struct_field_tmp(
                    ctx,
                    root_struct,
                    result_type,
                    field_path,
                    Alloc::Temp,
                ),
            };
            self.backend().struct_ref_lookup(&result, struct_var, field);
            result
        } else {
            assert!(struct_var.ty().is_struct());
            let result = self.create_struct_field_tmp(
                ctx,
                root_struct,
                member_type,
                field_path,
                Alloc::Alias,
            );
            self.backend().struct_lookup(&result, struct_var, field);
            result
        };

        match out_var {
            Some(out) if &result == out => Ok(result),
            _ => self.deref_or_copy_result(ctx, result, out_var),
        }
    }

    fn deref_or_copy_result(
        &mut self,
        ctx: &mut Context,
        lookup_result: Var,
        out_var: Option<&Var>,
    ) -> UserResult<Var> {
        match out_var {
            None => Ok(lookup_result),
            Some(out) if lookup_result.ty().is_assignable_ref_to(out.ty()) => {
                self.dereference(ctx, out, &lookup_result)?;
                Ok(out.clone())
            }
            Some(out) => {
                self.copy_by_value(ctx, &lookup_result, out, &out.ty().clone())?;
                Ok(out.clone())
            }
        }
    }

    /// Recursive field-by-field struct copy, generating specialized code
    /// rather than a runtime walk.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn copy_struct_by_value(
        &mut self,
        ctx: &mut Context,
        src_root: &Var,
        dst_root: &Var,
        src_path: &mut Vec<String>,
        dst_path: &mut Vec<String>,
        src: &Var,
        dst: &Var,
        ty: &Type,
    ) -> UserResult<()> {
        assert_eq!(src.ty(), dst.ty());
        let Type::Struct(st) = ty else {
            panic!("struct copy of non-struct {}", ty);
        };

        for (field_name, field_type) in st.fields.clone() {
            src_path.push(field_name.clone());
            dst_path.push(field_name.clone());

            let field_src =
                self.struct_lookup(ctx, src, &field_name, src_root, src_path, None)?;
            let field_dst =
                self.struct_lookup(ctx, dst, &field_name, dst_root, dst_path, None)?;

            if field_type.is_struct() {
                self.copy_struct_by_value(
                    ctx, src_root, dst_root, src_path, dst_path, &field_src, &field_dst,
                    &field_type,
                )?;
            } else {
                self.copy_by_value(ctx, &field_src, &field_dst, &field_type)?;
            }

            src_path.pop();
            dst_path.pop();
        }
        Ok(())
    }

    /// Copy a struct reference into a struct by waiting for the reference
    /// and walking the members.
    pub(super) fn dereference_struct(
        &mut self,
        ctx: &mut Context,
        dst: &Var,
        src: &Var,
    ) -> UserResult<()> {
        let wait_name = ctx.construct_name("copystruct");
        self.backend().start_wait_statement(
            &wait_name,
            vec![src.clone()],
            WaitMode::WaitOnly,
            false,
            TaskMode::Local,
            TaskProps::new(),
        );
        ctx.enter_block();
        let derefed = self.create_tmp_alias(ctx, src.ty().deref_result())?;
        self.retrieve_ref(&derefed, src);
        self.copy_by_value(ctx, &derefed, dst, &dst.ty().clone())?;
        ctx.exit_scope();
        self.backend().end_wait_statement();
        Ok(())
    }
}
