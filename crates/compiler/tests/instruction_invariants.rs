//! Properties every instruction the middle end produces must satisfy,
//! checked over a representative sample of the opcode families.

mod common;

use common::{fut, int_array, val};

use indexmap::IndexSet;
use rill_foundation::{
    Arg, BuiltinOp, ForeignRegistry, PrimKind, Redirects, TaskMode, TaskProps, Type, Var,
};
use rill_ir::instr::{
    Builtin, EngineOp, Fetched, FunctionCall, LocalFunctionCall, LoopBreak, LoopContinue,
    RunExternal,
};
use rill_ir::{Function, Instruction, Opcode, Program};

fn sample_program() -> Program {
    let mut foreign = ForeignRegistry::with_defaults();
    foreign.register_pure("pow");
    foreign.register_commutative("gcd");
    foreign.register_pure("gcd");
    let mut program = Program::new(foreign);

    let mut callee = Function::new(
        "callee",
        vec![fut("in1", PrimKind::Int), fut("in2", PrimKind::Int)],
        vec![fut("out1", PrimKind::Int)],
    );
    callee.set_blocking_inputs(vec![true, false]);
    program.add_function(callee);
    program
}

fn sample_instructions() -> Vec<Instruction> {
    let a = fut("a", PrimKind::Int);
    let b = fut("b", PrimKind::Int);
    let x = fut("x", PrimKind::Int);
    let f = fut("f", PrimKind::Float);
    let arr = int_array("arr", PrimKind::Int);
    let member = fut("m", PrimKind::Int);
    let ix = fut("i", PrimKind::Int);
    let r = Var::new(
        "r",
        Type::reference(Type::future(PrimKind::Int)),
        rill_foundation::Alloc::Temp,
        rill_foundation::DefKind::LocalCompiler,
    );
    let blob = val("v_blob", PrimKind::Blob);
    let exists = val("v_exists", PrimKind::Bool);
    let outfile = fut("of", PrimKind::File);

    vec![
        Instruction::comment("sample"),
        FunctionCall::foreign(
            "pow",
            vec![a.as_arg(), b.as_arg()],
            vec![x.clone()],
            TaskProps::new(),
        ),
        FunctionCall::new(
            "callee",
            vec![a.as_arg(), b.as_arg()],
            vec![x.clone()],
            TaskMode::Control,
            TaskProps::new(),
        ),
        FunctionCall::new(
            "callee",
            vec![a.as_arg(), b.as_arg()],
            vec![x.clone()],
            TaskMode::Sync,
            TaskProps::new(),
        ),
        LocalFunctionCall::new("gcd", vec![val("v_a", PrimKind::Int).as_arg()], vec![]),
        RunExternal::new(
            "sort",
            vec![],
            vec![outfile],
            vec![Arg::string_lit("-u")],
            Redirects::default(),
            false,
            true,
        ),
        LoopContinue::new(vec![a.clone()], vec![], vec![true]),
        LoopBreak::new(vec![a.clone()], vec![arr.clone()]),
        Builtin::local(
            BuiltinOp::PlusInt,
            Some(val("v_x", PrimKind::Int)),
            vec![Arg::int_lit(1), Arg::int_lit(2)],
        ),
        Builtin::async_(
            BuiltinOp::PlusInt,
            Some(x.clone()),
            vec![a.as_arg(), b.as_arg()],
            TaskProps::new(),
        ),
        EngineOp::store(x.clone(), Arg::int_lit(5)),
        EngineOp::store(f.clone(), Arg::float_lit(1.5)),
        EngineOp::load(val("v_y", PrimKind::Int), a.clone()),
        EngineOp::deref(x.clone(), r.clone()),
        EngineOp::array_lookup_future(r.clone(), arr.clone(), ix.clone(), false),
        EngineOp::array_lookup_ref_imm(r.clone(), arr.clone(), Arg::int_lit(0), false),
        EngineOp::array_insert_imm(arr.clone(), Arg::int_lit(0), member.clone()),
        EngineOp::array_insert_future(arr.clone(), ix.clone(), member.clone()),
        EngineOp::array_build(arr.clone(), vec![Arg::int_lit(0)], vec![member.clone()]),
        EngineOp::bag_insert(
            Var::new(
                "bag",
                Type::bag(Type::future(PrimKind::Int)),
                rill_foundation::Alloc::Stack,
                rill_foundation::DefKind::LocalUser,
            ),
            member.clone(),
        ),
        EngineOp::copy_ref(
            Var::new(
                "alias1",
                Type::future(PrimKind::Int),
                rill_foundation::Alloc::Alias,
                rill_foundation::DefKind::LocalCompiler,
            ),
            a.clone(),
        ),
        EngineOp::latest_value(
            val("v_up", PrimKind::Float),
            Var::new(
                "acc",
                Type::PrimUpdateable(PrimKind::Float),
                rill_foundation::Alloc::Stack,
                rill_foundation::DefKind::LocalUser,
            ),
        ),
        EngineOp::update(
            Opcode::UpdateMin,
            Var::new(
                "acc2",
                Type::PrimUpdateable(PrimKind::Float),
                rill_foundation::Alloc::Stack,
                rill_foundation::DefKind::LocalUser,
            ),
            fut("delta", PrimKind::Float).as_arg(),
        ),
        EngineOp::refcount(Opcode::IncrRef, a.clone(), 1),
        EngineOp::refcount(Opcode::DecrWriters, arr.clone(), 1),
        EngineOp::checkpoint_lookup_enabled(val("v_en", PrimKind::Bool)),
        EngineOp::lookup_checkpoint(exists, blob.clone(), Arg::blob_lit(vec![1, 2])),
        EngineOp::write_checkpoint(blob.as_arg(), blob.as_arg()),
        EngineOp::pack_values(blob.clone(), vec![Arg::int_lit(1)]),
        EngineOp::free_blob(blob),
    ]
}

/// Blocking inputs are always a subset of the future- and ref-typed
/// variable inputs.
#[test]
fn blocking_inputs_are_future_or_ref_inputs() {
    let program = sample_program();
    for inst in sample_instructions() {
        let input_vars: Vec<Var> = inst
            .inputs()
            .iter()
            .filter_map(Arg::opt_var)
            .filter(|v| v.ty().is_prim_future() || v.ty().is_ref())
            .cloned()
            .collect();
        for blocked in inst.blocking_inputs(&program) {
            assert!(
                input_vars.contains(&blocked),
                "{} blocks on {} which is not a future/ref input",
                inst,
                blocked
            );
        }
    }
}

/// An idempotent instruction never reads a variable it writes.
#[test]
fn idempotent_ops_have_disjoint_inputs_and_outputs() {
    for inst in sample_instructions() {
        if !inst.is_idempotent() {
            continue;
        }
        let outputs = inst.outputs();
        for input in inst.inputs() {
            if let Some(var) = input.opt_var() {
                assert!(
                    !outputs.contains(var),
                    "idempotent {} reads its own output {}",
                    inst,
                    var
                );
            }
        }
    }
}

/// The alias-write flag agrees with the outputs' allocation classes.
#[test]
fn alias_writes_are_flagged() {
    for inst in sample_instructions() {
        let has_alias_output = inst
            .outputs()
            .iter()
            .any(|o| o.alloc() == rill_foundation::Alloc::Alias);
        assert_eq!(inst.writes_alias_var(), has_alias_output, "{}", inst);
    }
}

/// Timing may only change for side-effect-free instructions.
#[test]
fn timing_changes_require_purity() {
    let foreign = ForeignRegistry::with_defaults();
    for inst in sample_instructions() {
        if inst.can_change_timing(&foreign) {
            assert!(!inst.has_side_effects(&foreign), "{}", inst);
        }
    }
}

/// Claimed refcounts stay within the instruction's own variables.
#[test]
fn refcount_claims_are_conservative() {
    let program = sample_program();
    for inst in sample_instructions() {
        let (reads, writes) = inst.incr_vars(&program);
        let inputs = inst.inputs();
        let input_vars: Vec<Var> = inputs.iter().filter_map(Arg::opt_var).cloned().collect();
        let outputs = inst.outputs();
        for read in &reads {
            assert!(
                input_vars.contains(read) || outputs.contains(read),
                "{} claims read incr on foreign var {}",
                inst,
                read
            );
        }
        for write in &writes {
            assert!(
                outputs.contains(write),
                "{} claims write incr on non-output {}",
                inst,
                write
            );
        }
    }
}

/// Making an async operator immediate produces instructions whose fetched
/// inputs are local values.
#[test]
fn make_immediate_produces_local_value_inputs() {
    let foreign = ForeignRegistry::with_defaults();
    let a = fut("a", PrimKind::Int);
    let b = fut("b", PrimKind::Int);
    let x = fut("x", PrimKind::Int);
    let mut inst = Builtin::async_(
        BuiltinOp::PlusInt,
        Some(x.clone()),
        vec![a.as_arg(), b.as_arg()],
        TaskProps::new(),
    );

    let mut closed = IndexSet::new();
    closed.insert(a.clone());
    closed.insert(b.clone());
    let req = inst.can_make_immediate(&closed, false, &foreign).unwrap();
    assert_eq!(req.input_vars.len(), 2);
    assert_eq!(req.out.len(), 1);

    let fetched_ins = vec![
        Fetched::new(a, val("v_a", PrimKind::Int).as_arg()),
        Fetched::new(b, val("v_b", PrimKind::Int).as_arg()),
    ];
    let fetched_outs = vec![Fetched::new(x, val("v_x", PrimKind::Int))];
    let change = inst.make_immediate(&fetched_outs, &fetched_ins, &foreign);
    for new_inst in &change.new_instructions {
        for input in new_inst.inputs() {
            assert!(
                input.ty().is_prim_value(),
                "immediate form still reads {}",
                input
            );
        }
    }
}

/// Mode and spawn behaviour line up: sync instructions spawn nothing and
/// never block.
#[test]
fn sync_instructions_never_block() {
    let program = sample_program();
    let foreign = ForeignRegistry::with_defaults();
    for inst in sample_instructions() {
        // Run-external is ordered by its input files despite running
        // inline, and loop continue re-binds rather than spawns.
        if matches!(inst.op(), Opcode::RunExternal | Opcode::LoopContinue) {
            continue;
        }
        if inst.mode(&foreign) == TaskMode::Sync {
            assert!(
                inst.blocking_inputs(&program).is_empty(),
                "sync {} blocks",
                inst
            );
        }
    }
}
