//! Array expression lowering: indexed loads, ranges, literals, and
//! container copies.

use rill_foundation::{
    Arg, CompilerBackend, SpecialFunction, TaskMode, TaskProps, Type, UserError, UserResult, Var,
    WaitMode,
};

use crate::ast::{literals, ArrayElemsView, ArrayRangeView, ExprTree};
use crate::context::Context;
use crate::typecheck;

use super::{ExprWalker, Renames};

impl<B: CompilerBackend> ExprWalker<'_, B> {
    /// Copy one member of an array, selected by index, into the output.
    /// When the output is a reference the copy is avoided.
    pub(super) fn array_load(
        &mut self,
        ctx: &mut Context,
        tree: &ExprTree,
        o_var: &Var,
        renames: Option<&Renames>,
    ) -> UserResult<()> {
        assert_eq!(tree.child_count(), 2, "malformed array load");

        // Work out the concrete array type: the alternative whose member,
        // once dereferenced, matches the output.
        let array_tree = tree.child(0);
        let arr_expr_type = typecheck::find_expr_type(ctx, array_tree)?;
        let arr_type = arr_expr_type
            .union_alternatives()
            .iter()
            .find(|alt| {
                assert!(alt.is_array() || alt.is_array_ref());
                let elem = alt.container_elem();
                let lookup_result = if elem.is_ref() {
                    elem.deref_result()
                } else {
                    elem.clone()
                };
                lookup_result == *o_var.ty()
            })
            .cloned()
            .unwrap_or_else(|| {
                panic!(
                    "no viable array type for looking up {} into {}",
                    arr_expr_type, o_var
                )
            });

        let array_var = self.eval(ctx, array_tree, &arr_type, false, renames)?;
        let member_type = arr_type.container_elem().clone();

        // Any integer expression can index, but its type must agree with
        // the array's key.
        let index_tree = tree.child(1);
        let index_type = typecheck::find_expr_type(ctx, index_tree)?;
        let key_type = array_var.ty().array_key().clone();
        if !index_type.assignable_to(&key_type) {
            return Err(UserError::TypeMismatch(format!(
                "{}: array index type {} does not match key type of {}",
                ctx.file_line(),
                index_type,
                array_var.ty()
            )));
        }

        // The direct result of the lookup is a reference; dereference
        // afterwards unless the output already wants the reference.
        let (lookup_into, do_dereference) = if member_type == *o_var.ty() {
            let tmp = self.create_tmp(ctx, Type::reference(member_type), false)?;
            (tmp, true)
        } else {
            assert!(o_var.ty().is_assignable_ref_to(&member_type));
            (o_var.clone(), false)
        };

        if let Some(index) = literals::extract_int_lit(index_tree) {
            self.backend().array_lookup_ref_imm(
                &lookup_into,
                &array_var,
                Arg::int_lit(index),
                arr_type.is_array_ref(),
            );
        } else {
            let index_var = self.eval(ctx, index_tree, &key_type, false, renames)?;
            self.backend().array_lookup_future(
                &lookup_into,
                &array_var,
                &index_var,
                arr_type.is_array_ref(),
            );
        }

        if do_dereference {
            self.dereference(ctx, o_var, &lookup_into)?;
        }
        Ok(())
    }

    /// `[a:b]` and `[a:b:s]` lower to the range special functions.
    pub(super) fn array_range(
        &mut self,
        ctx: &mut Context,
        tree: &ExprTree,
        o_var: &Var,
        renames: Option<&Renames>,
    ) -> UserResult<()> {
        assert!(o_var.ty().is_array());
        assert!(o_var.ty().container_elem().is_int());
        let range = ArrayRangeView::from_tree(tree)?;

        let int_future = Type::future(rill_foundation::PrimKind::Int);
        let start = self.eval(ctx, range.start, &int_future, false, renames)?;
        let end = self.eval(ctx, range.end, &int_future, false, renames)?;

        let (inputs, special) = match range.step {
            Some(step_tree) => {
                let step = self.eval(ctx, step_tree, &int_future, false, renames)?;
                (vec![start, end, step], SpecialFunction::RangeStep)
            }
            None => (vec![start, end], SpecialFunction::Range),
        };

        let impl_name = ctx
            .foreign()
            .find_special_impl(special)
            .unwrap_or_else(|| panic!("no implementation registered for {:?}", special))
            .to_string();
        let input_args = Arg::from_var_list(&inputs);
        self.backend()
            .builtin_function_call(&impl_name, input_args, vec![o_var.clone()], TaskProps::new());
        Ok(())
    }

    /// Construct an array from literal elements. Counted elements build in
    /// one operation; keyed elements insert one future at a time.
    pub(super) fn array_elems(
        &mut self,
        ctx: &mut Context,
        tree: &ExprTree,
        o_var: &Var,
        renames: Option<&Renames>,
    ) -> UserResult<()> {
        assert!(o_var.ty().is_array());
        let elems = ArrayElemsView::from_tree(tree)?;
        if elems.elem_count() > 0 {
            let arr_type = typecheck::find_expr_type(ctx, tree)?;
            assert!(
                arr_type.assignable_to(o_var.ty()),
                "array literal type {} does not fit {}",
                arr_type,
                o_var
            );
        }

        let key_type = o_var.ty().array_key().clone();
        let val_type = o_var.ty().container_elem().clone();

        let mut vals = Vec::with_capacity(elems.elem_count());
        for val_tree in elems.vals() {
            vals.push(self.eval(ctx, val_tree, &val_type, false, renames)?);
        }

        if elems.has_keys() {
            // User-specified keys are futures, so the build operation is
            // not available.
            let mut key_futures = Vec::with_capacity(elems.elem_count());
            for key_tree in elems.keys() {
                key_futures.push(self.eval(ctx, key_tree, &key_type, false, renames)?);
            }
            for (key, val) in key_futures.iter().zip(&vals) {
                self.backend().array_insert_future(o_var, key, val);
            }
        } else {
            // Counted from zero, known ahead of time.
            assert!(key_type.is_int());
            let keys = (0..elems.elem_count() as i64).map(Arg::int_lit).collect();
            self.backend().array_build(o_var, keys, vals);
        }
        Ok(())
    }

    /// Element-wise copy of an array or bag: wait on the source, then
    /// foreach over it inserting into the destination.
    pub(super) fn copy_container_by_value(
        &mut self,
        ctx: &mut Context,
        dst: &Var,
        src: &Var,
    ) -> UserResult<()> {
        assert!(src.ty().assignable_to(dst.ty()));
        assert!(src.ty().is_container());

        ctx.enter_block();
        let member_type = src.ty().container_elem().clone();
        let key = if src.ty().is_array() {
            let key_type = src.ty().array_key().deref_result();
            Some(ctx.create_local_value_var(key_type, None)?)
        } else {
            None
        };
        // Loop variables are defined by the foreach construct itself, not
        // declared in the enclosing block.
        let member = ctx.create_alias_var(member_type)?;

        let wait_name = ctx.construct_name(&format!("{}-copy-wait", dst.name()));
        let loop_name = ctx.construct_name(&format!("{}-copy", dst.name()));
        self.backend().start_wait_statement(
            &wait_name,
            vec![src.clone()],
            WaitMode::WaitOnly,
            false,
            TaskMode::Local,
            TaskProps::new(),
        );
        self.backend()
            .start_foreach_loop(&loop_name, src, &member, key.as_ref());
        if let Some(key) = &key {
            self.backend().array_insert_imm(dst, key.as_arg(), &member);
        } else {
            self.backend().bag_insert(dst, &member);
        }
        self.backend().end_foreach_loop();
        self.backend().end_wait_statement();
        ctx.exit_scope();
        Ok(())
    }

    /// Dereference a container reference, then copy element-wise.
    pub(super) fn deref_then_copy_container(
        &mut self,
        ctx: &mut Context,
        dst: &Var,
        src: &Var,
    ) -> UserResult<()> {
        assert!(src.ty().is_container_ref());
        assert!(src.ty().is_assignable_ref_to(dst.ty()));
        let wait_name = ctx.construct_name("copy-wait");
        self.backend().start_wait_statement(
            &wait_name,
            vec![src.clone()],
            WaitMode::WaitOnly,
            false,
            TaskMode::Local,
            TaskProps::new(),
        );
        ctx.enter_block();
        let derefed = self.create_tmp_alias(ctx, dst.ty().clone())?;
        self.retrieve_ref(&derefed, src);
        self.copy_container_by_value(ctx, dst, &derefed)?;
        ctx.exit_scope();
        self.backend().end_wait_statement();
        Ok(())
    }
}
