//! End-to-end lowering scenarios: expression trees in, instruction trees
//! out.

mod common;

use common::{all_instructions, find_ops, fut, int_array, user_fut};

use indexmap::IndexMap;
use rill_compiler::{lower_statement, Session};
use rill_foundation::{
    Alloc, Arg, BuiltinOp, DefKind, ForeignRegistry, FunctionType, PrimKind, Settings, StructType,
    TaskMode, TaskPropKey, Type, UserError, Var,
};
use rill_frontend::ast::ExprTree;
use rill_frontend::FnProp;
use rill_ir::{ContKind, Instruction, Opcode, Statement};

#[test]
fn integer_arithmetic_lowers_and_folds() {
    let mut session = Session::new(Settings::new());
    let x = user_fut("x", PrimKind::Int);
    let tree = ExprTree::operator("+", vec![ExprTree::int_lit(2), ExprTree::int_lit(3)]);
    lower_statement(&mut session, "main", &[x.clone()], &tree).unwrap();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();

    // The literals materialize into futures feeding one async plus.
    let stores = find_ops(func, Opcode::StoreInt);
    assert_eq!(stores.len(), 2);
    let async_ops = find_ops(func, Opcode::AsyncOp);
    assert_eq!(async_ops.len(), 1);
    let plus = async_ops[0];
    assert_eq!(plus.outputs(), vec![x.clone()]);

    // Constant propagation over the stores lets the plus fold to 5.
    let mut known = IndexMap::new();
    for store in &stores {
        known.insert(store.outputs()[0].clone(), store.inputs()[0].clone());
    }
    let mut folded = (*plus).clone();
    let result = folded
        .constant_fold("main", &known, &program.foreign, &Settings::new())
        .unwrap();
    assert_eq!(result.get(&x), Some(&Arg::int_lit(5)));
}

#[test]
fn array_literal_builds_in_one_operation() {
    let mut session = Session::new(Settings::new());
    let a = int_array("a", PrimKind::Int);
    let tree = ExprTree::array_elems(vec![
        ExprTree::int_lit(10),
        ExprTree::int_lit(20),
        ExprTree::int_lit(30),
    ]);
    lower_statement(&mut session, "main", &[a.clone()], &tree).unwrap();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();

    assert_eq!(find_ops(func, Opcode::StoreInt).len(), 3);
    let builds = find_ops(func, Opcode::ArrayBuild);
    assert_eq!(builds.len(), 1);
    let build = builds[0];
    assert_eq!(build.outputs(), vec![a.clone()]);
    let inputs = build.inputs();
    assert_eq!(inputs.len(), 6);
    assert_eq!(inputs[0], Arg::int_lit(0));
    assert_eq!(inputs[1], Arg::int_lit(1));
    assert_eq!(inputs[2], Arg::int_lit(2));

    // The built array is closed after the build.
    let foreign = ForeignRegistry::new();
    assert_eq!(build.closed_outputs(&foreign), vec![a]);
}

#[test]
fn empty_array_literal_still_builds() {
    let mut session = Session::new(Settings::new());
    let a = int_array("a", PrimKind::Int);
    let tree = ExprTree::array_elems(vec![]);
    lower_statement(&mut session, "main", &[a.clone()], &tree).unwrap();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();
    let builds = find_ops(func, Opcode::ArrayBuild);
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].inputs().len(), 0);
    let foreign = ForeignRegistry::new();
    assert_eq!(builds[0].closed_outputs(&foreign), vec![a]);
}

#[test]
fn nested_struct_access_chains_lookups() {
    let inner = StructType::new(
        "inner_t",
        vec![("field".into(), Type::future(PrimKind::Int))],
    );
    let outer = StructType::new("outer_t", vec![("inner".into(), Type::Struct(inner))]);
    let s = Var::new("s", Type::Struct(outer), Alloc::Stack, DefKind::LocalUser);
    let y = user_fut("y", PrimKind::Int);

    let mut session = Session::new(Settings::new());
    session
        .start_function("main", vec![s.clone()], vec![y.clone()])
        .unwrap();
    let tree = ExprTree::struct_load(
        ExprTree::struct_load(ExprTree::variable("s"), "inner"),
        "field",
    );
    session.lower(std::slice::from_ref(&y), &tree).unwrap();
    session.end_function();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();

    let lookups = find_ops(func, Opcode::StructLookup);
    assert_eq!(lookups.len(), 2);
    // First lookup aliases s.inner, second reads the field from it.
    assert_eq!(lookups[0].inputs()[0], s.as_arg());
    assert_eq!(lookups[1].inputs()[0].var(), &lookups[0].outputs()[0]);

    // The member is an int future, so it is copied, not dereferenced.
    let copies = find_ops(func, Opcode::AsyncOp);
    assert_eq!(copies.len(), 1);
    match copies[0] {
        Instruction::Builtin(b) => {
            assert_eq!(b.subop, BuiltinOp::CopyInt);
            assert_eq!(b.outputs(), vec![y]);
        }
        other => panic!("expected copy, got {}", other),
    }
}

#[test]
fn call_with_priority_annotation_waits_and_retrieves() {
    let mut session = Session::new(Settings::new());
    session
        .define_function(
            "f",
            FunctionType::new(
                vec![Type::future(PrimKind::Int), Type::future(PrimKind::Int)],
                vec![Type::future(PrimKind::Int)],
            ),
            &[FnProp::Composite, FnProp::Control],
        )
        .unwrap();

    let a = user_fut("a", PrimKind::Int);
    let b = user_fut("b", PrimKind::Int);
    let p = user_fut("p", PrimKind::Int);
    let y = user_fut("y", PrimKind::Int);
    session
        .start_function(
            "main",
            vec![a.clone(), b.clone(), p.clone()],
            vec![y.clone()],
        )
        .unwrap();
    let tree = ExprTree::call("f", vec![ExprTree::variable("a"), ExprTree::variable("b")])
        .with_annotation(TaskPropKey::Priority, ExprTree::variable("p"));
    session.lower(std::slice::from_ref(&y), &tree).unwrap();
    session.end_function();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();

    // One wait on the priority future, local-control, wait-only.
    let wait = func
        .continuations()
        .iter()
        .find_map(|cont| match &cont.kind {
            ContKind::Wait {
                wait_vars,
                mode,
                task_mode,
                ..
            } => {
                assert_eq!(wait_vars, &vec![p.clone()]);
                assert_eq!(*mode, rill_foundation::WaitMode::WaitOnly);
                assert_eq!(*task_mode, TaskMode::LocalControl);
                Some(cont)
            }
            _ => None,
        })
        .expect("annotation wait missing");

    // Inside: retrieve the priority, then the control-mode call carrying
    // it as a property.
    let body = func.block(wait.blocks[0]);
    let mut saw_load = false;
    let mut saw_call = false;
    for stmt in &body.statements {
        if let Statement::Instruction(inst) = stmt {
            match inst.op() {
                Opcode::LoadInt => {
                    assert_eq!(inst.inputs()[0], p.as_arg());
                    saw_load = true;
                }
                Opcode::CallControl => {
                    let props = inst.task_props().unwrap();
                    let prio = props.get(TaskPropKey::Priority).unwrap();
                    assert!(prio.var().ty().is_prim_value());
                    assert_eq!(
                        inst.inputs()[..2],
                        [a.as_arg(), b.as_arg()]
                    );
                    saw_call = true;
                }
                _ => {}
            }
        }
    }
    assert!(saw_load && saw_call);
}

#[test]
fn checkpointed_call_emits_lookup_protocol() {
    let mut session = Session::new(Settings::new());
    session
        .define_function(
            "g",
            FunctionType::new(
                vec![Type::future(PrimKind::Int)],
                vec![Type::future(PrimKind::Int)],
            ),
            &[FnProp::Composite, FnProp::Control, FnProp::Checkpointed],
        )
        .unwrap();

    let a = user_fut("a", PrimKind::Int);
    let y = user_fut("y", PrimKind::Int);
    session
        .start_function("main", vec![a.clone()], vec![y.clone()])
        .unwrap();
    let tree = ExprTree::call("g", vec![ExprTree::variable("a")]);
    session.lower(std::slice::from_ref(&y), &tree).unwrap();
    session.end_function();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();

    assert!(!find_ops(func, Opcode::CheckpointLookupEnabled).is_empty());
    assert!(!find_ops(func, Opcode::LookupCheckpoint).is_empty());
    assert!(!find_ops(func, Opcode::PackValues).is_empty());
    assert!(!find_ops(func, Opcode::WriteCheckpoint).is_empty());

    // On the hit path the outputs come from the unpacked blob and the
    // function is never called.
    let hit_if = func
        .continuations()
        .iter()
        .find(|cont| {
            matches!(cont.kind, ContKind::If { .. })
                && cont.blocks.len() == 2
                && block_has_op(func, cont.blocks[0], Opcode::UnpackValues)
        })
        .expect("checkpoint-exists branch missing");
    assert!(!block_has_op_recursive(func, hit_if.blocks[0], Opcode::CallControl));
    assert!(block_has_op_recursive(func, hit_if.blocks[1], Opcode::CallControl));

    // Blob locals are freed when their block's scope ends.
    let has_free_cleanup = func
        .blocks()
        .iter()
        .any(|b| b.cleanups.iter().any(|c| c.action.op() == Opcode::FreeBlob));
    assert!(has_free_cleanup);
}

fn block_has_op(func: &rill_ir::Function, block: rill_ir::BlockId, op: Opcode) -> bool {
    func.block(block).statements.iter().any(
        |stmt| matches!(stmt, Statement::Instruction(inst) if inst.op() == op),
    )
}

fn block_has_op_recursive(func: &rill_ir::Function, block: rill_ir::BlockId, op: Opcode) -> bool {
    for stmt in &func.block(block).statements {
        match stmt {
            Statement::Instruction(inst) if inst.op() == op => return true,
            Statement::Conditional(cont_id) => {
                for child in &func.cont(*cont_id).blocks {
                    if block_has_op_recursive(func, *child, op) {
                        return true;
                    }
                }
            }
            _ => {}
        }
    }
    false
}

#[test]
fn short_circuit_and_collapses_to_copy() {
    let mut session = Session::new(Settings::new());
    let a = user_fut("a", PrimKind::Bool);
    let x = user_fut("x", PrimKind::Bool);
    session
        .start_function("main", vec![a.clone()], vec![x.clone()])
        .unwrap();
    let tree = ExprTree::operator("&&", vec![ExprTree::variable("a"), ExprTree::bool_lit(true)]);
    session.lower(std::slice::from_ref(&x), &tree).unwrap();
    session.end_function();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();

    let and = find_ops(func, Opcode::AsyncOp)
        .into_iter()
        .find(|inst| matches!(inst, Instruction::Builtin(b) if b.subop == BuiltinOp::And))
        .expect("and missing");

    let mut known = IndexMap::new();
    for store in find_ops(func, Opcode::StoreBool) {
        known.insert(store.outputs()[0].clone(), store.inputs()[0].clone());
    }
    let replaced = and.constant_replace(&known).expect("no replacement");
    match replaced {
        Instruction::Builtin(b) => {
            assert_eq!(b.subop, BuiltinOp::CopyBool);
            assert_eq!(b.operator_inputs(), &[a.as_arg()]);
            assert_eq!(b.outputs(), vec![x]);
        }
        other => panic!("expected copy, got {}", other),
    }
}

#[test]
fn assignment_to_self_is_an_error() {
    let mut session = Session::new(Settings::new());
    let x = user_fut("x", PrimKind::Int);
    let err =
        lower_statement(&mut session, "main", &[x], &ExprTree::variable("x")).unwrap_err();
    assert!(err.message.contains("to itself"));
}

#[test]
fn updateable_assignment_snapshots_once() {
    let up = Var::new(
        "acc",
        Type::PrimUpdateable(PrimKind::Float),
        Alloc::Stack,
        DefKind::LocalUser,
    );
    let y = user_fut("y", PrimKind::Float);
    let mut session = Session::new(Settings::new());
    session
        .start_function("main", vec![up.clone()], vec![y.clone()])
        .unwrap();
    session
        .lower(std::slice::from_ref(&y), &ExprTree::variable("acc"))
        .unwrap();
    session.end_function();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();

    // Exactly one snapshot, one store of the snapshot, one copy out.
    assert_eq!(find_ops(func, Opcode::LatestValue).len(), 1);
    assert_eq!(find_ops(func, Opcode::StoreFloat).len(), 1);
    let copies: Vec<_> = find_ops(func, Opcode::AsyncOp)
        .into_iter()
        .filter(|i| matches!(i, Instruction::Builtin(b) if b.subop == BuiltinOp::CopyFloat))
        .collect();
    assert_eq!(copies.len(), 1);
}

#[test]
fn array_range_calls_range_builtin() {
    let mut session = Session::new(Settings::new());
    let a = int_array("a", PrimKind::Int);
    let tree = ExprTree::array_range(ExprTree::int_lit(1), ExprTree::int_lit(10), None);
    lower_statement(&mut session, "main", &[a.clone()], &tree).unwrap();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();

    let calls = find_ops(func, Opcode::CallForeign);
    assert_eq!(calls.len(), 1);
    match calls[0] {
        Instruction::FunctionCall(call) => {
            assert_eq!(call.function(), "range");
            assert_eq!(call.outputs(), &[a]);
        }
        other => panic!("expected foreign call, got {}", other),
    }
}

#[test]
fn keyed_array_literal_inserts_futures() {
    let mut session = Session::new(Settings::new());
    let a = int_array("a", PrimKind::Int);
    let tree = ExprTree::array_kv_elems(vec![
        (ExprTree::variable("k"), ExprTree::int_lit(1)),
        (ExprTree::int_lit(7), ExprTree::int_lit(2)),
    ]);
    let k = user_fut("k", PrimKind::Int);
    session
        .start_function("main", vec![k], vec![a.clone()])
        .unwrap();
    session.lower(std::slice::from_ref(&a), &tree).unwrap();
    session.end_function();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();

    assert_eq!(find_ops(func, Opcode::ArrayInsertFuture).len(), 2);
    assert!(find_ops(func, Opcode::ArrayBuild).is_empty());
}

#[test]
fn array_load_with_literal_index_uses_imm_lookup() {
    let mut session = Session::new(Settings::new());
    let a = int_array("a", PrimKind::Int);
    let y = user_fut("y", PrimKind::Int);
    session
        .start_function("main", vec![a.clone()], vec![y.clone()])
        .unwrap();
    let tree = ExprTree::array_load(ExprTree::variable("a"), ExprTree::int_lit(4));
    session.lower(std::slice::from_ref(&y), &tree).unwrap();
    session.end_function();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();

    let lookups = find_ops(func, Opcode::ArrayLookupRefImm);
    assert_eq!(lookups.len(), 1);
    assert_eq!(lookups[0].inputs()[1], Arg::int_lit(4));
    // The looked-up reference is dereferenced into the output.
    assert_eq!(find_ops(func, Opcode::DerefInt).len(), 1);
}

#[test]
fn disabled_asserts_elide_assert_calls() {
    let settings = Settings {
        disable_asserts: true,
        ..Settings::new()
    };
    let mut session = Session::new(settings);
    session
        .define_function(
            "assert",
            FunctionType::new(
                vec![Type::future(PrimKind::Bool), Type::future(PrimKind::Str)],
                vec![],
            ),
            &[FnProp::Builtin],
        )
        .unwrap();
    let c = user_fut("c", PrimKind::Bool);
    session
        .start_function("main", vec![c.clone()], vec![])
        .unwrap();
    let tree = ExprTree::call(
        "assert",
        vec![ExprTree::variable("c"), ExprTree::string_lit("failed")],
    );
    session.lower(&[], &tree).unwrap();
    session.end_function();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();
    assert!(all_instructions(func).is_empty());
}

#[test]
fn container_copy_loops_over_source() {
    let mut session = Session::new(Settings::new());
    let src = int_array("src", PrimKind::Int);
    let dst = int_array("dst", PrimKind::Int);
    session
        .start_function("main", vec![src.clone()], vec![dst.clone()])
        .unwrap();
    session
        .lower(std::slice::from_ref(&dst), &ExprTree::variable("src"))
        .unwrap();
    session.end_function();
    let program = session.finish().unwrap();
    let func = program.lookup_function("main").unwrap();

    let foreach = func
        .continuations()
        .iter()
        .find_map(|cont| match &cont.kind {
            ContKind::Foreach { container, member, key, .. } => {
                assert_eq!(container, &src);
                assert!(key.is_some());
                Some((member.clone(), key.clone().unwrap()))
            }
            _ => None,
        })
        .expect("copy loop missing");
    let (member, key) = foreach;

    let inserts = find_ops(func, Opcode::ArrayInsertImm);
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].outputs(), vec![dst]);
    assert_eq!(inserts[0].inputs()[0], key.as_arg());
    assert_eq!(inserts[0].inputs()[1], member.as_arg());
}

#[test]
#[should_panic(expected = "duplicate variable name")]
fn validator_rejects_duplicate_names() {
    use rill_ir::{Function, Program, Validator};
    let mut func = Function::new("main", vec![], vec![]);
    let id = func.main_block_id();
    func.block_mut(id).vars.push(fut("v", PrimKind::Int));
    func.block_mut(id).vars.push(fut("v", PrimKind::Int));
    let mut program = Program::new(ForeignRegistry::new());
    program.add_function(func);
    Validator::standard().validate(&program);
}

#[test]
fn undefined_variable_is_reported_with_line() {
    let mut session = Session::new(Settings::new());
    let y = user_fut("y", PrimKind::Int);
    session
        .start_function("main", vec![], vec![y.clone()])
        .unwrap();
    let tree = ExprTree::variable("nope").with_line(42);
    let err = session.lower(std::slice::from_ref(&y), &tree).unwrap_err();
    match err {
        UserError::UndefinedVariable(msg) => assert!(msg.contains("line 42")),
        other => panic!("unexpected error {:?}", other),
    }
}
