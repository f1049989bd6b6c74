//! Function call lowering.
//!
//! Decides, from the callee's properties, which call form to emit:
//! intrinsic expansion, an async operator, a foreign call, a compiled
//! function call, or a generated wrapper. Annotation futures are waited
//! for and retrieved before the call; checkpointed functions get the full
//! lookup/write protocol around the call.

use indexmap::IndexMap;
use tracing::warn;

use rill_foundation::var::WRAPPER_PREFIX;
use rill_foundation::{
    Alloc, Arg, CompilerBackend, FunctionType, PrimKind, TaskMode, TaskPropKey, TaskProps, Type,
    UserError, UserResult, Var,
};

use crate::ast::ExprTree;
use crate::context::{Context, FnProp};
use crate::typecheck;

use super::{ExprWalker, Renames};

/// Names of wrapper functions call lowering decided must be generated.
/// Generation itself happens in a later phase.
#[derive(Debug, Default)]
pub struct WrapperCache {
    wrappers: IndexMap<String, String>,
}

impl WrapperCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapper name for a wrapped builtin, minting it on first use.
    pub fn wrapper_name(&mut self, function: &str) -> String {
        self.wrappers
            .entry(function.to_string())
            .or_insert_with(|| format!("{}{}", WRAPPER_PREFIX, function))
            .clone()
    }

    /// Functions requiring generated wrappers, with their wrapper names.
    pub fn required(&self) -> impl Iterator<Item = (&str, &str)> {
        self.wrappers.iter().map(|(f, w)| (f.as_str(), w.as_str()))
    }
}

impl<B: CompilerBackend> ExprWalker<'_, B> {
    /// Lower a function call whose arguments may themselves be
    /// expressions.
    pub(super) fn call_function_expression(
        &mut self,
        ctx: &mut Context,
        tree: &ExprTree,
        outs: &[Var],
        renames: Option<&Renames>,
    ) -> UserResult<()> {
        let function = tree.text().to_string();
        let concrete = typecheck::concretise_call(ctx, &function, tree.children(), outs.len())?;

        // Assert statements disappear entirely when asserts are disabled.
        if ctx.foreign().is_assert_variant(&function) && ctx.settings().disable_asserts {
            return Ok(());
        }

        // Evaluate argument expressions left to right into temporaries.
        let mut arg_vars = Vec::with_capacity(tree.child_count());
        for (i, arg_tree) in tree.children().iter().enumerate() {
            let expected = concrete.input(i).clone();
            let expr_type = typecheck::find_expr_type(ctx, arg_tree)?;
            let arg_type = typecheck::check_fun_arg(ctx, &function, i, &expected, &expr_type)?;
            arg_vars.push(self.eval(ctx, arg_tree, &arg_type, false, renames)?);
        }

        // Annotations are processed after the arguments so that argument
        // evaluation stays outside the wait statement.
        let mut props = TaskProps::new();
        let mut opened_wait = false;
        if !tree.annotations().is_empty() {
            let mut prop_futures = Vec::new();
            let mut wait_vars = Vec::new();
            for (key, expr) in tree.annotations() {
                check_call_annotation(ctx, &function, *key)?;
                let expr_type = typecheck::find_expr_type(ctx, expr)?;
                let concrete_type = check_annotation_type(ctx, *key, &expr_type)?;
                let future = self.eval(ctx, expr, &concrete_type, false, renames)?;
                wait_vars.push(future.clone());
                prop_futures.push((*key, future));
            }

            let wait_name = ctx.construct_name("ann-wait");
            self.backend().start_wait_statement(
                &wait_name,
                wait_vars,
                rill_foundation::WaitMode::WaitOnly,
                false,
                TaskMode::LocalControl,
                TaskProps::new(),
            );
            opened_wait = true;
            ctx.enter_block();
            for (key, future) in prop_futures {
                let value = self.retrieve_to_var(ctx, &future)?;
                props.put(key, value.as_arg());
            }
        }

        self.call_function(ctx, &function, &concrete, outs, arg_vars, props)?;

        if opened_wait {
            ctx.exit_scope();
            self.backend().end_wait_statement();
        }
        Ok(())
    }

    /// Adapt arguments to the callee's expectations and emit the call,
    /// with the checkpoint protocol when the function is checkpointed.
    fn call_function(
        &mut self,
        ctx: &mut Context,
        function: &str,
        concrete: &FunctionType,
        o_list: &[Var],
        i_list: Vec<Var>,
        props: TaskProps,
    ) -> UserResult<()> {
        assert_eq!(concrete.inputs.len(), i_list.len());

        // Expected types might not match the current argument types; work
        // out the conversions before the call.
        let mut real_inputs = Vec::with_capacity(i_list.len());
        let mut wait_vars = Vec::new();
        let mut deref_vars = Vec::new();
        let mut opened_scope = false;

        for (input, expected) in i_list.iter().zip(&concrete.inputs) {
            let input_type = input.ty();
            if input_type.assignable_to(expected) {
                real_inputs.push(input.clone());
            } else if input_type.is_assignable_ref_to(expected) {
                if !opened_scope {
                    ctx.enter_block();
                    opened_scope = true;
                }
                // The alias is initialized inside the wait, after the
                // reference closes.
                let derefed = ctx.create_alias_var(expected.clone())?;
                wait_vars.push(input.clone());
                deref_vars.push(derefed.clone());
                real_inputs.push(derefed);
            } else if typecheck::updateable_equiv(input_type, expected) {
                real_inputs.push(self.snapshot_updateable(ctx, input)?);
            } else {
                panic!(
                    "{}: don't know how to convert {} to {}",
                    ctx.file_line(),
                    input_type,
                    expected
                );
            }
        }

        if !wait_vars.is_empty() {
            // Only the priority matters for the wait itself.
            let wait_props = props.filter(&[TaskPropKey::Priority]);
            let wait_name = ctx.construct_name(&format!("call-{}", function));
            self.backend().start_wait_statement(
                &wait_name,
                wait_vars.clone(),
                rill_foundation::WaitMode::WaitOnly,
                false,
                TaskMode::LocalControl,
                wait_props,
            );
            for (derefed, waited) in deref_vars.iter().zip(&wait_vars) {
                self.backend().declare(derefed);
                if waited.ty().is_container_ref() {
                    self.retrieve_ref(derefed, waited);
                } else {
                    panic!("don't know how to deref non-container arg {}", derefed);
                }
            }
        }

        if ctx.has_function_prop(function, FnProp::Checkpointed) {
            let lookup_enabled =
                self.create_tmp_local_val(ctx, Type::value(PrimKind::Bool))?;
            self.backend().checkpoint_lookup_enabled(&lookup_enabled);

            self.backend().start_if_statement(lookup_enabled.as_arg(), true);
            ctx.enter_block();
            self.checkpointed_function_call(ctx, function, concrete, o_list, &real_inputs, &props, true)?;
            ctx.exit_scope();
            self.backend().start_else_block();
            ctx.enter_block();
            self.checkpointed_function_call(ctx, function, concrete, o_list, &real_inputs, &props, false)?;
            ctx.exit_scope();
            self.backend().end_if_statement();
        } else {
            self.backend_function_call(ctx, function, concrete, o_list, &real_inputs, &props)?;
        }

        if !wait_vars.is_empty() {
            self.backend().end_wait_statement();
        }
        if opened_scope {
            ctx.exit_scope();
        }
        Ok(())
    }

    /// The checkpoint protocol around a call:
    ///
    /// ```text
    /// wait (checkpoint_key_futures) {
    ///   checkpoint_key = pack(fetched inputs)
    ///   checkpoint_exists, vals = lookup_checkpoint(checkpoint_key)
    ///   if (checkpoint_exists) {
    ///     ... set output variables
    ///   } else {
    ///     ... call function
    ///     wait (output_futures) {
    ///       write_checkpoint(checkpoint_key, packed outputs)
    ///     }
    ///   }
    /// }
    /// ```
    #[allow(clippy::too_many_arguments)]
    fn checkpointed_function_call(
        &mut self,
        ctx: &mut Context,
        function: &str,
        concrete: &FunctionType,
        o_list: &[Var],
        i_list: &[Var],
        props: &TaskProps,
        lookup_checkpoint: bool,
    ) -> UserResult<()> {
        // All inputs form the key; all outputs form the value.
        let checkpoint_key_futures = i_list;
        let checkpoint_val = o_list;

        if lookup_checkpoint {
            // Wait recursively so container contents can form the key.
            let wait_name = ctx.construct_name(&format!("{}-checkpoint-wait", function));
            self.backend().start_wait_statement(
                &wait_name,
                checkpoint_key_futures.to_vec(),
                rill_foundation::WaitMode::WaitOnly,
                true,
                TaskMode::Local,
                TaskProps::new(),
            );
            ctx.enter_block();
            let key_blob =
                self.pack_checkpoint_data(ctx, Some(function), checkpoint_key_futures)?;

            let existing_val = self.create_tmp_local_val(ctx, Type::value(PrimKind::Blob))?;
            let checkpoint_exists =
                self.create_tmp_local_val(ctx, Type::value(PrimKind::Bool))?;
            self.backend()
                .lookup_checkpoint(&checkpoint_exists, &existing_val, key_blob.as_arg());

            self.backend().start_if_statement(checkpoint_exists.as_arg(), true);
            ctx.enter_block();
            self.set_vars_from_checkpoint(ctx, o_list, &existing_val)?;
            ctx.exit_scope();
            self.backend().start_else_block();
            ctx.enter_block();
        }

        self.backend_function_call(ctx, function, concrete, o_list, i_list, props)?;

        let write_enabled = self.create_tmp_local_val(ctx, Type::value(PrimKind::Bool))?;
        self.backend().checkpoint_write_enabled(&write_enabled);

        self.backend().start_if_statement(write_enabled.as_arg(), false);
        ctx.enter_block();

        // Checkpoint the outputs once set. When the inputs were not
        // already waited for, they join the wait so the key can be packed.
        let wait_vals: Vec<Var> = if lookup_checkpoint {
            checkpoint_val.to_vec()
        } else {
            checkpoint_key_futures
                .iter()
                .chain(checkpoint_val)
                .cloned()
                .collect()
        };
        let wait_name = ctx.construct_name(&format!("{}-checkpoint-wait", function));
        self.backend().start_wait_statement(
            &wait_name,
            wait_vals,
            rill_foundation::WaitMode::WaitOnly,
            true,
            TaskMode::Local,
            TaskProps::new(),
        );
        ctx.enter_block();

        // The key is packed again because the blob cannot pass through the
        // wait; the optimizer removes the redundancy.
        let key_blob2 =
            self.pack_checkpoint_data(ctx, Some(function), checkpoint_key_futures)?;
        let val_blob = self.pack_checkpoint_data(ctx, None, checkpoint_val)?;
        self.backend()
            .write_checkpoint(key_blob2.as_arg(), val_blob.as_arg());

        ctx.exit_scope();
        self.backend().end_wait_statement();
        ctx.exit_scope();
        self.backend().end_if_statement();

        if lookup_checkpoint {
            ctx.exit_scope();
            self.backend().end_if_statement();
            ctx.exit_scope();
            self.backend().end_wait_statement();
        }
        Ok(())
    }

    /// Pack the values of recursively closed variables into a blob. The
    /// blob local is freed at the end of the enclosing block.
    fn pack_checkpoint_data(
        &mut self,
        ctx: &mut Context,
        function_name: Option<&str>,
        vars: &[Var],
    ) -> UserResult<Var> {
        let mut elems = Vec::with_capacity(vars.len() + 1);
        if let Some(name) = function_name {
            // Prefix with the function name so keys never collide across
            // functions.
            elems.push(Arg::string_lit(name));
        }
        for var in vars {
            if var.alloc() == Alloc::Local {
                elems.push(var.as_arg());
            } else if var.ty().is_container() {
                // Recursively fetch to get nested content.
                let fetched = self.retrieve_container_values(ctx, var)?;
                elems.push(fetched.as_arg());
            } else {
                let fetched = self.retrieve_to_var(ctx, var)?;
                elems.push(fetched.as_arg());
            }
        }

        let blob = self.create_tmp_local_val(ctx, Type::value(PrimKind::Blob))?;
        self.backend().pack_values(&blob, elems);
        self.backend().free_blob(&blob);
        Ok(blob)
    }

    /// Unpack a checkpoint blob into the function's output futures.
    fn set_vars_from_checkpoint(
        &mut self,
        ctx: &mut Context,
        outputs: &[Var],
        checkpoint_val: &Var,
    ) -> UserResult<()> {
        assert!(checkpoint_val.ty().is_blob() && checkpoint_val.ty().is_prim_value());
        let mut values = Vec::with_capacity(outputs.len());
        for output in outputs {
            if output.alloc() == Alloc::Local {
                values.push(output.clone());
            } else if output.ty().is_container() {
                let unpacked = output.ty().unpacked();
                values.push(self.create_value_var(ctx, unpacked, output.name())?);
            } else {
                values.push(self.create_value_of_var(ctx, output)?);
            }
        }

        self.backend()
            .unpack_values(values.clone(), checkpoint_val);

        for (value, output) in values.iter().zip(outputs) {
            if value != output {
                if output.ty().is_container() {
                    self.backend().store_recursive(output, value.as_arg());
                } else {
                    self.assign(output, value.as_arg());
                }
            }
        }
        Ok(())
    }

    /// Emit the call instruction appropriate to the function's properties.
    fn backend_function_call(
        &mut self,
        ctx: &mut Context,
        function: &str,
        concrete: &FunctionType,
        o_list: &[Var],
        i_list: &[Var],
        props: &TaskProps,
    ) -> UserResult<()> {
        props.assert_internal_types_valid();
        assert!(
            ctx.lookup_function(function).is_some() || ctx.is_intrinsic(function),
            "call to function {} with no definition",
            function
        );

        if ctx.has_function_prop(function, FnProp::Deprecated) {
            warn!(function, "{}: call to deprecated function", ctx.file_line());
        }

        let input_args = Arg::from_var_list(i_list);
        let outputs = o_list.to_vec();

        if let Some(intrinsic) = ctx.lookup_intrinsic(function) {
            self.backend()
                .intrinsic_call(intrinsic, i_list.to_vec(), outputs, props.clone());
        } else if ctx.has_function_prop(function, FnProp::Builtin) {
            if let Some(op) = ctx.foreign().op_equiv(function) {
                assert!(o_list.len() <= 1);
                let out = o_list.first();
                self.backend().async_op(op, out, input_args, props.clone());
            } else {
                self.backend()
                    .builtin_function_call(function, input_args, outputs, props.clone());
            }
        } else if ctx.has_function_prop(function, FnProp::Composite) {
            let mode = if ctx.has_function_prop(function, FnProp::Sync) {
                TaskMode::Sync
            } else {
                TaskMode::Control
            };
            self.backend()
                .function_call(function, input_args, outputs, mode, props.clone());
        } else {
            self.backend_call_wrapped(ctx, function, concrete, o_list, i_list, props)?;
        }
        Ok(())
    }

    /// Call the wrapper function of an app or wrapped builtin. Parallelism
    /// and location travel as extra arguments so the wrapper body can
    /// apply them after its argument wait.
    fn backend_call_wrapped(
        &mut self,
        ctx: &mut Context,
        function: &str,
        _concrete: &FunctionType,
        o_list: &[Var],
        i_list: &[Var],
        props: &TaskProps,
    ) -> UserResult<()> {
        let wrapper_name = if ctx.has_function_prop(function, FnProp::WrappedBuiltin) {
            self.wrappers_mut().wrapper_name(function)
        } else {
            assert!(ctx.has_function_prop(function, FnProp::App));
            // Wrappers share the function's name for apps.
            function.to_string()
        };

        let mut real_inputs = Arg::from_var_list(i_list);
        if ctx.has_function_prop(function, FnProp::Parallel) {
            let par = props.get(TaskPropKey::Parallelism).cloned().ok_or_else(|| {
                UserError::Invalid(format!(
                    "{}: parallelism not specified for call to parallel function {}",
                    ctx.file_line(),
                    function
                ))
            })?;
            real_inputs.push(par);
        }
        if ctx.has_function_prop(function, FnProp::Targetable) {
            // The target is optional but the slot is always passed.
            real_inputs.push(props.get_with_default(TaskPropKey::Location));
        }

        assert!(ctx.has_function_prop(function, FnProp::Sync));
        // Only the priority applies to the sync call itself, but the rest
        // stay attached so a later local replacement keeps correct props.
        self.backend().function_call(
            &wrapper_name,
            real_inputs,
            o_list.to_vec(),
            TaskMode::Sync,
            props.clone(),
        );
        Ok(())
    }

    fn wrappers_mut(&mut self) -> &mut WrapperCache {
        &mut self.wrappers
    }
}

/// Annotations are only valid on functions declaring the matching
/// property.
fn check_call_annotation(ctx: &Context, function: &str, key: TaskPropKey) -> UserResult<()> {
    if let Some(intrinsic) = ctx.lookup_intrinsic(function) {
        if !intrinsic.valid_props().contains(&key) {
            return Err(UserError::InvalidAnnotation(format!(
                "{}: cannot specify {} for intrinsic function {}",
                ctx.file_line(),
                key,
                function
            )));
        }
        return Ok(());
    }
    match key {
        TaskPropKey::Parallelism if !ctx.has_function_prop(function, FnProp::Parallel) => {
            Err(UserError::Invalid(format!(
                "{}: called non-parallel function {} with parallelism",
                ctx.file_line(),
                function
            )))
        }
        TaskPropKey::Location if !ctx.has_function_prop(function, FnProp::Targetable) => {
            Err(UserError::Invalid(format!(
                "{}: called non-targetable function {} with target",
                ctx.file_line(),
                function
            )))
        }
        _ => Ok(()),
    }
}

/// Annotation expressions must be integer futures.
fn check_annotation_type(ctx: &Context, key: TaskPropKey, expr_type: &Type) -> UserResult<Type> {
    let expected = Type::future(PrimKind::Int);
    if expr_type.assignable_to(&expected) {
        Ok(expected)
    } else {
        Err(UserError::TypeMismatch(format!(
            "{}: annotation {} must be an integer, got {}",
            ctx.file_line(),
            key,
            expr_type
        )))
    }
}
