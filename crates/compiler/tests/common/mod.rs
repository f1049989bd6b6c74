//! Shared helpers for middle-end tests.
#![allow(dead_code)]

use rill_foundation::{Alloc, DefKind, PrimKind, Type, Var};
use rill_ir::{Function, Instruction, Statement};

/// A compiler-temporary future.
pub fn fut(name: &str, kind: PrimKind) -> Var {
    Var::new(name, Type::future(kind), Alloc::Temp, DefKind::LocalCompiler)
}

/// A user-declared future.
pub fn user_fut(name: &str, kind: PrimKind) -> Var {
    Var::new(name, Type::future(kind), Alloc::Stack, DefKind::LocalUser)
}

/// A compiler-local value.
pub fn val(name: &str, kind: PrimKind) -> Var {
    Var::new(name, Type::value(kind), Alloc::Local, DefKind::LocalCompiler)
}

/// A user-declared int-keyed array.
pub fn int_array(name: &str, elem: PrimKind) -> Var {
    Var::new(
        name,
        Type::array(Type::future(PrimKind::Int), Type::future(elem)),
        Alloc::Stack,
        DefKind::LocalUser,
    )
}

/// Every instruction of the function, in block arena order.
pub fn all_instructions(func: &Function) -> Vec<&Instruction> {
    let mut result = Vec::new();
    for block in func.blocks() {
        for stmt in &block.statements {
            if let Statement::Instruction(inst) = stmt {
                result.push(inst);
            }
        }
        for cleanup in &block.cleanups {
            result.push(&cleanup.action);
        }
    }
    result
}

/// Instructions with the given opcode.
pub fn find_ops<'a>(func: &'a Function, op: rill_ir::Opcode) -> Vec<&'a Instruction> {
    all_instructions(func)
        .into_iter()
        .filter(|inst| inst.op() == op)
        .collect()
}
