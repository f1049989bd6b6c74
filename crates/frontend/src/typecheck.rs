//! Type reconciliation between expression trees and lowering targets.
//!
//! Earlier phases have already checked the program; this module recomputes
//! the types the walker needs at lowering time, reconciling unions and
//! function signatures against concrete argument expressions.

use rill_foundation::{
    ops, Op, PrimKind, Type, UserError, UserResult,
};

use crate::ast::{ExprKind, ExprTree};
use crate::context::Context;

/// The type of an expression in the current context.
pub fn find_expr_type(ctx: &Context, tree: &ExprTree) -> UserResult<Type> {
    match tree.kind() {
        ExprKind::Variable => Ok(ctx.lookup_var_user(tree.text())?.ty().clone()),
        ExprKind::IntLiteral => Ok(Type::future(PrimKind::Int)),
        ExprKind::FloatLiteral => Ok(Type::future(PrimKind::Float)),
        ExprKind::BoolLiteral => Ok(Type::future(PrimKind::Bool)),
        ExprKind::StringLiteral => Ok(Type::future(PrimKind::Str)),
        ExprKind::Operator => operator_result_type(ctx, tree),
        ExprKind::CallFunction => {
            let ty = ctx.lookup_function_user(tree.text())?;
            match ty.outputs.len() {
                1 => Ok(ty.outputs[0].clone()),
                n => Err(UserError::Invalid(format!(
                    "{}: function {} with {} outputs used in expression context",
                    ctx.file_line(),
                    tree.text(),
                    n
                ))),
            }
        }
        ExprKind::ArrayLoad => {
            let arr_type = find_expr_type(ctx, tree.child(0))?;
            let alt = arr_type
                .union_alternatives()
                .iter()
                .find(|t| t.is_array() || t.is_array_ref())
                .cloned()
                .ok_or_else(|| {
                    UserError::TypeMismatch(format!(
                        "{}: indexing non-array type {}",
                        ctx.file_line(),
                        arr_type
                    ))
                })?;
            let elem = alt.container_elem().clone();
            // A ref-typed slot reads as its target.
            Ok(if elem.is_ref() { elem.deref_result() } else { elem })
        }
        ExprKind::StructLoad => {
            let struct_type = find_expr_type(ctx, tree.child(0))?;
            find_struct_field_type(ctx, tree.text(), &struct_type)
        }
        ExprKind::ArrayRange => Ok(Type::array(
            Type::future(PrimKind::Int),
            Type::future(PrimKind::Int),
        )),
        ExprKind::ArrayElems | ExprKind::ArrayKvElems => {
            let view = crate::ast::ArrayElemsView::from_tree(tree)?;
            let key_type = if view.has_keys() {
                find_expr_type(ctx, view.keys()[0])?
            } else {
                Type::future(PrimKind::Int)
            };
            let elem_type = match view.vals().first() {
                Some(first) => find_expr_type(ctx, first)?,
                None => Type::Union(vec![]),
            };
            Ok(Type::array(key_type, elem_type))
        }
    }
}

/// The result type of an operator expression.
fn operator_result_type(ctx: &Context, tree: &ExprTree) -> UserResult<Type> {
    let operand_kinds = operand_kinds(ctx, tree)?;
    let symbol = tree.text();
    let result = match symbol {
        "==" | "!=" | "<" | "<=" | ">" | ">=" | "&&" | "||" | "!" => PrimKind::Bool,
        _ => *operand_kinds.first().ok_or_else(|| {
            UserError::Invalid(format!("{}: operator with no operands", ctx.file_line()))
        })?,
    };
    // Confirm the combination resolves to a real operator.
    ops::resolve_op(symbol, &operand_kinds, result).ok_or_else(|| {
        UserError::TypeMismatch(format!(
            "{}: operator {} not defined for operand types {:?}",
            ctx.file_line(),
            symbol,
            operand_kinds
        ))
    })?;
    Ok(Type::future(result))
}

fn operand_kinds(ctx: &Context, tree: &ExprTree) -> UserResult<Vec<PrimKind>> {
    let mut kinds = Vec::with_capacity(tree.child_count());
    for child in tree.children() {
        let ty = find_expr_type(ctx, child)?;
        let kind = ty
            .union_alternatives()
            .iter()
            .find_map(Type::prim_kind)
            .ok_or_else(|| {
                UserError::TypeMismatch(format!(
                    "{}: operand of non-primitive type {}",
                    ctx.file_line(),
                    ty
                ))
            })?;
        kinds.push(kind);
    }
    Ok(kinds)
}

/// Resolve the operator of an expression tree against the expected result
/// type.
pub fn op_from_tree(ctx: &Context, tree: &ExprTree, out_type: &Type) -> UserResult<Op> {
    assert_eq!(tree.kind(), ExprKind::Operator);
    let operand_kinds = operand_kinds(ctx, tree)?;
    let result = out_type.prim_kind().ok_or_else(|| {
        UserError::TypeMismatch(format!(
            "{}: operator output of non-primitive type {}",
            ctx.file_line(),
            out_type
        ))
    })?;
    ops::resolve_op(tree.text(), &operand_kinds, result).ok_or_else(|| {
        UserError::TypeMismatch(format!(
            "{}: operator {} not defined for {:?} -> {:?}",
            ctx.file_line(),
            tree.text(),
            operand_kinds,
            result
        ))
    })
}

/// Concretise a function's declared type against its call site: expand
/// varargs and pick union alternatives matching the arguments.
pub fn concretise_call(
    ctx: &Context,
    function: &str,
    args: &[ExprTree],
    num_outputs: usize,
) -> UserResult<rill_foundation::FunctionType> {
    let declared = ctx.lookup_function_user(function)?;
    if !declared.varargs && declared.inputs.len() != args.len() {
        return Err(UserError::TypeMismatch(format!(
            "{}: function {} expects {} arguments, got {}",
            ctx.file_line(),
            function,
            declared.inputs.len(),
            args.len()
        )));
    }
    if declared.outputs.len() != num_outputs {
        return Err(UserError::TypeMismatch(format!(
            "{}: function {} produces {} outputs, assigned to {}",
            ctx.file_line(),
            function,
            declared.outputs.len(),
            num_outputs
        )));
    }

    let mut inputs = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let expected = declared.input(i).clone();
        let concrete = match &expected {
            Type::Union(alts) => {
                let arg_type = find_expr_type(ctx, arg)?;
                alts.iter()
                    .find(|alt| {
                        arg_type.assignable_to(alt)
                            || arg_type.is_assignable_ref_to(alt)
                            || updateable_equiv(&arg_type, alt)
                    })
                    .cloned()
                    .ok_or_else(|| {
                        UserError::TypeMismatch(format!(
                            "{}: argument {} of {} has type {} matching no alternative of {}",
                            ctx.file_line(),
                            i,
                            function,
                            arg_type,
                            expected
                        ))
                    })?
            }
            other => other.clone(),
        };
        inputs.push(concrete);
    }

    Ok(rill_foundation::FunctionType::new(
        inputs,
        declared.outputs.clone(),
    ))
}

/// The type at which to evaluate argument `i`, given the callee's
/// expectation and the expression's own type.
pub fn check_fun_arg(
    ctx: &Context,
    function: &str,
    index: usize,
    expected: &Type,
    actual: &Type,
) -> UserResult<Type> {
    if actual.assignable_to(expected) {
        return Ok(expected.clone());
    }
    if actual.is_assignable_ref_to(expected) {
        // Keep the reference; call lowering dereferences inside a wait.
        return Ok(actual.clone());
    }
    if updateable_equiv(actual, expected) {
        return Ok(actual.clone());
    }
    Err(UserError::TypeMismatch(format!(
        "{}: argument {} of {} has type {}, expected {}",
        ctx.file_line(),
        index,
        function,
        actual,
        expected
    )))
}

/// An updateable passes where the future of the same kind is expected; the
/// walker snapshots it.
pub fn updateable_equiv(actual: &Type, expected: &Type) -> bool {
    match (actual, expected) {
        (Type::PrimUpdateable(a), Type::PrimFuture(b)) => a == b,
        _ => false,
    }
}

/// The type of a struct field, looking through a struct reference.
pub fn find_struct_field_type(ctx: &Context, field: &str, struct_type: &Type) -> UserResult<Type> {
    let concrete = match struct_type {
        Type::Ref(inner) => inner.as_ref(),
        other => other,
    };
    match concrete {
        Type::Struct(st) => st.field_type(field).cloned().ok_or_else(|| {
            UserError::TypeMismatch(format!(
                "{}: struct {} has no field {}",
                ctx.file_line(),
                st.name,
                field
            ))
        }),
        other => Err(UserError::TypeMismatch(format!(
            "{}: field access on non-struct type {}",
            ctx.file_line(),
            other
        ))),
    }
}
