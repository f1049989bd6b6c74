//! Function call instructions.
//!
//! `FunctionCall` covers calls that may spawn tasks (foreign calls and
//! calls to compiled functions in each task mode); `LocalFunctionCall` is
//! the synchronous local form of a foreign call, produced by the
//! make-immediate transformation or emitted directly for value-level
//! builtins.

use std::fmt;

use indexmap::{IndexMap, IndexSet};

use rill_foundation::{
    has_read_refcount, has_write_refcount, Arg, ForeignRegistry, Settings, SpecialFunction,
    TaskMode, TaskProps, Var,
};

use crate::opt::computed::{ComputedValue, ResultVal};
use crate::tree::Program;

use super::{
    has_readable_side_channel, output_positions_renamed, replace_args, replace_vars, Builtin,
    Fetched, InitType, Instruction, MakeImmChange, MakeImmRequest, Opcode, RenameMode,
};

/// A call to a foreign function or a compiled function.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    op: Opcode,
    function: String,
    inputs: Vec<Arg>,
    outputs: Vec<Var>,
    /// Which inputs are known closed; refined by `can_make_immediate`.
    closed_inputs: Vec<bool>,
    props: TaskProps,
}

impl FunctionCall {
    /// A call to a compiled function with the given task mode.
    pub fn new(
        function: impl Into<String>,
        inputs: Vec<Arg>,
        outputs: Vec<Var>,
        mode: TaskMode,
        props: TaskProps,
    ) -> Instruction {
        let op = match mode {
            TaskMode::Sync => Opcode::CallSync,
            TaskMode::Control => Opcode::CallControl,
            TaskMode::Local => Opcode::CallLocal,
            TaskMode::LocalControl => Opcode::CallLocalControl,
        };
        Instruction::FunctionCall(Self::with_op(op, function.into(), inputs, outputs, props))
    }

    /// An asynchronous call to a foreign function.
    pub fn foreign(
        function: impl Into<String>,
        inputs: Vec<Arg>,
        outputs: Vec<Var>,
        props: TaskProps,
    ) -> Instruction {
        Instruction::FunctionCall(Self::with_op(
            Opcode::CallForeign,
            function.into(),
            inputs,
            outputs,
            props,
        ))
    }

    fn with_op(
        op: Opcode,
        function: String,
        inputs: Vec<Arg>,
        outputs: Vec<Var>,
        props: TaskProps,
    ) -> Self {
        let closed_inputs = vec![false; inputs.len()];
        Self {
            op,
            function,
            inputs,
            outputs,
            closed_inputs,
            props,
        }
    }

    pub fn op(&self) -> Opcode {
        self.op
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn function_inputs(&self) -> &[Arg] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Var] {
        &self.outputs
    }

    pub fn props(&self) -> &TaskProps {
        &self.props
    }

    pub fn inputs(&self) -> Vec<Arg> {
        let mut all = self.inputs.clone();
        all.extend(self.props.values().cloned());
        all
    }

    /// Variable inputs; with `no_values`, local values (priorities and the
    /// like) are omitted.
    fn var_inputs(&self, no_values: bool) -> Vec<Var> {
        self.inputs
            .iter()
            .filter_map(Arg::opt_var)
            .filter(|v| !no_values || !v.ty().is_prim_value())
            .cloned()
            .collect()
    }

    pub fn read_outputs(&self, prog: Option<&Program>) -> Vec<Var> {
        match self.op {
            Opcode::CallForeign => self
                .outputs
                .iter()
                .filter(|o| has_readable_side_channel(o.ty()))
                .cloned()
                .collect(),
            _ => {
                let func = prog.and_then(|p| p.functions.get(&self.function));
                self.outputs
                    .iter()
                    .enumerate()
                    .filter(|(i, o)| {
                        has_readable_side_channel(o.ty())
                            && func.map_or(true, |f| !f.is_output_write_only(*i))
                    })
                    .map(|(_, o)| o.clone())
                    .collect()
            }
        }
    }

    pub fn has_side_effects(&self, foreign: &ForeignRegistry) -> bool {
        !foreign.is_pure(&self.function)
            || self.outputs.iter().any(|o| o.alloc() == rill_foundation::Alloc::Alias)
            || self.outputs.iter().any(|o| o.mapping().is_some())
    }

    pub fn constant_fold(
        &mut self,
        known: &IndexMap<Var, Arg>,
        foreign: &ForeignRegistry,
        settings: &Settings,
    ) -> Option<IndexMap<Var, Arg>> {
        if foreign.is_special_impl(&self.function, SpecialFunction::Argv) {
            let arg_name = self.inputs.first()?.opt_var().and_then(|v| known.get(v))?;
            if arg_name.is_string_val() {
                let value = settings.compile_time_arg(arg_name.string_lit_value())?;
                let mut folded = IndexMap::new();
                folded.insert(self.outputs[0].clone(), Arg::string_lit(value));
                return Some(folded);
            }
        }
        None
    }

    pub fn can_make_immediate(
        &mut self,
        closed: &IndexSet<Var>,
        wait_for_close: bool,
        foreign: &ForeignRegistry,
    ) -> Option<MakeImmRequest> {
        let mut all_closed = true;
        if !wait_for_close {
            for (i, input) in self.inputs.iter().enumerate() {
                if let Arg::Var(v) = input {
                    if closed.contains(v) {
                        self.closed_inputs[i] = true;
                    } else {
                        all_closed = false;
                    }
                }
            }
        }

        // Mapped files are side channels: the filename must be available
        // before the local version can run.
        for out in &self.outputs {
            if out.ty().is_file() && !(wait_for_close || output_mapping_avail(closed, out)) {
                all_closed = false;
            }
        }

        if all_closed && foreign.has_local_version(&self.function) {
            let map_out_vars = !foreign.inits_output_mapping(&self.function);
            let mut req = MakeImmRequest::new(self.outputs.clone(), self.var_inputs(true));
            req.mode = foreign.local_task_mode(&self.function);
            req.map_out_vars = map_out_vars;
            return Some(req);
        }
        None
    }

    pub fn make_immediate(
        &self,
        out_vals: &[Fetched<Var>],
        in_vals: &[Fetched<Arg>],
        foreign: &ForeignRegistry,
    ) -> MakeImmChange {
        // Non-future inputs such as priorities are dropped; the local
        // version runs after its task would have been eligible anyway.
        let retained = self.var_inputs(true);
        assert_eq!(in_vals.len(), retained.len());
        let fetched_vals = Fetched::values(in_vals);

        let inst = if let Some(op) = foreign.op_equiv(&self.function) {
            match self.outputs.len() {
                0 => Builtin::local(op, None, fetched_vals),
                1 => {
                    check_swapped_output(&self.outputs[0], &out_vals[0].fetched);
                    Builtin::local(op, Some(out_vals[0].fetched.clone()), fetched_vals)
                }
                n => panic!("op-equivalent call with {} outputs", n),
            }
        } else {
            assert!(foreign.has_local_version(&self.function));
            for (out, fetched) in self.outputs.iter().zip(out_vals) {
                assert_eq!(*out, fetched.original);
                check_swapped_output(out, &fetched.fetched);
            }
            LocalFunctionCall::new(
                self.function.clone(),
                fetched_vals,
                Fetched::values(out_vals),
            )
        };
        MakeImmChange::replace(inst)
    }

    pub fn blocking_inputs(&self, prog: &Program) -> Vec<Var> {
        match self.op {
            Opcode::CallForeign => self
                .inputs
                .iter()
                .filter_map(Arg::opt_var)
                .filter(|v| v.ty().is_prim_future() || v.ty().is_ref())
                .cloned()
                .collect(),
            // Entered immediately, so nothing to block on.
            Opcode::CallSync => vec![],
            Opcode::CallControl => {
                let func = prog
                    .functions
                    .get(&self.function)
                    .unwrap_or_else(|| panic!("unknown function {}", self.function));
                let blocking = func.blocking_input_vector();
                assert_eq!(blocking.len(), self.inputs.len());
                self.inputs
                    .iter()
                    .zip(blocking)
                    .filter(|(_, b)| **b)
                    .map(|(arg, _)| arg.var().clone())
                    .collect()
            }
            _ => vec![],
        }
    }

    pub fn incr_vars(&self, prog: &Program) -> (Vec<Var>, Vec<Var>) {
        match self.op {
            Opcode::CallForeign
            | Opcode::CallControl
            | Opcode::CallLocal
            | Opcode::CallLocalControl => {
                let mut read_incr: Vec<Var> = self
                    .inputs
                    .iter()
                    .filter_map(Arg::opt_var)
                    .filter(|v| has_read_refcount(v))
                    .cloned()
                    .collect();
                let mut write_incr = Vec::new();
                for (i, out) in self.outputs.iter().enumerate() {
                    if has_write_refcount(out) {
                        write_incr.push(out.clone());
                    }
                    let mut read_rc = false;
                    if self.op != Opcode::CallForeign {
                        let func = prog
                            .functions
                            .get(&self.function)
                            .unwrap_or_else(|| panic!("unknown function {}", self.function));
                        // The callee keeps read references to outputs it
                        // may itself read.
                        if !func.is_output_write_only(i) && has_read_refcount(out) {
                            read_rc = true;
                        }
                    }
                    if out.ty().is_file() {
                        // Read refcount covers the filename channel.
                        read_rc = true;
                    }
                    if read_rc && has_read_refcount(out) {
                        read_incr.push(out.clone());
                    }
                }
                (read_incr, write_incr)
            }
            _ => (vec![], vec![]),
        }
    }

    pub fn mode(&self, foreign: &ForeignRegistry) -> TaskMode {
        match self.op {
            Opcode::CallSync => TaskMode::Sync,
            Opcode::CallLocal => TaskMode::Local,
            Opcode::CallLocalControl => TaskMode::LocalControl,
            Opcode::CallControl => TaskMode::Control,
            Opcode::CallForeign => foreign.task_mode(&self.function),
            other => panic!("unexpected function call opcode {}", other),
        }
    }

    pub fn results(&self, foreign: &ForeignRegistry) -> Option<Vec<ResultVal>> {
        common_call_results(
            self.op,
            &self.function,
            &self.inputs,
            &self.outputs,
            self.outputs.iter().any(|o| o.mapping().is_some()),
            foreign,
        )
    }

    pub fn rename_vars(&mut self, renames: &IndexMap<Var, Arg>, mode: RenameMode) {
        if output_positions_renamed(mode) {
            replace_vars(renames, &mut self.outputs);
        }
        replace_args(renames, &mut self.inputs);
        self.props.rename_args(renames);
    }
}

/// Whether a file output's mapping is available: its filename variable is
/// closed, or it is known unmapped.
fn output_mapping_avail(closed: &IndexSet<Var>, out: &Var) -> bool {
    match out.mapping() {
        Some(mapping) => closed.contains(mapping),
        None => !out.maybe_mapped(),
    }
}

/// Check that an output was swapped to the matching value type when making
/// an instruction immediate.
fn check_swapped_output(old_out: &Var, new_out: &Var) {
    if old_out.ty().is_array() {
        assert!(new_out.ty().is_array());
    } else {
        assert_eq!(
            old_out.ty().deref_result(),
            *new_out.ty(),
            "swapped output {} does not match {}",
            new_out,
            old_out
        );
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_call(self.op, &self.function, &self.outputs, &self.inputs))?;
        write!(f, "{}", self.props)?;
        write!(f, " closed={:?}", self.closed_inputs)
    }
}

/// The synchronous local form of a foreign call.
#[derive(Debug, Clone)]
pub struct LocalFunctionCall {
    function: String,
    inputs: Vec<Arg>,
    outputs: Vec<Var>,
}

impl LocalFunctionCall {
    pub fn new(function: impl Into<String>, inputs: Vec<Arg>, outputs: Vec<Var>) -> Instruction {
        Instruction::LocalFunctionCall(Self {
            function: function.into(),
            inputs,
            outputs,
        })
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn inputs(&self) -> &[Arg] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Var] {
        &self.outputs
    }

    pub fn has_side_effects(&self, foreign: &ForeignRegistry) -> bool {
        !foreign.is_pure(&self.function)
            || self.outputs.iter().any(|o| o.alloc() == rill_foundation::Alloc::Alias)
            || self.outputs.iter().any(|o| o.mapping().is_some())
    }

    pub fn initialized(&self, foreign: &ForeignRegistry) -> Vec<(Var, InitType)> {
        // The local version of input_file initializes its output for
        // writing.
        if foreign.inits_output_mapping(&self.function) {
            vec![(self.outputs[0].clone(), InitType::Full)]
        } else {
            vec![]
        }
    }

    pub fn closed_outputs(&self, foreign: &ForeignRegistry) -> Vec<Var> {
        if self.is_range(foreign) {
            vec![self.outputs[0].clone()]
        } else {
            vec![]
        }
    }

    pub fn write_incr_vars(&self, foreign: &ForeignRegistry) -> Vec<Var> {
        // Range fills its output array itself.
        if self.is_range(foreign) {
            vec![self.outputs[0].clone()]
        } else {
            vec![]
        }
    }

    fn is_range(&self, foreign: &ForeignRegistry) -> bool {
        foreign.is_special_impl(&self.function, SpecialFunction::Range)
            || foreign.is_special_impl(&self.function, SpecialFunction::RangeStep)
    }

    pub fn constant_fold(
        &mut self,
        known: &IndexMap<Var, Arg>,
        foreign: &ForeignRegistry,
        settings: &Settings,
    ) -> Option<IndexMap<Var, Arg>> {
        replace_args(known, &mut self.inputs);

        if foreign.is_special_impl(&self.function, SpecialFunction::Argv) {
            let arg_name = self.inputs.first()?;
            if arg_name.is_string_val() {
                let value = settings.compile_time_arg(arg_name.string_lit_value())?;
                let mut folded = IndexMap::new();
                folded.insert(self.outputs[0].clone(), Arg::string_lit(value));
                return Some(folded);
            }
        }
        None
    }

    pub fn results(&self, foreign: &ForeignRegistry) -> Option<Vec<ResultVal>> {
        common_call_results(
            Opcode::CallForeignLocal,
            &self.function,
            &self.inputs,
            &self.outputs,
            self.outputs.iter().any(|o| o.mapping().is_some()),
            foreign,
        )
    }

    pub fn rename_vars(&mut self, renames: &IndexMap<Var, Arg>, mode: RenameMode) {
        if output_positions_renamed(mode) {
            replace_vars(renames, &mut self.outputs);
        }
        replace_args(renames, &mut self.inputs);
    }
}

impl fmt::Display for LocalFunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            format_call(Opcode::CallForeignLocal, &self.function, &self.outputs, &self.inputs)
        )
    }
}

pub(crate) fn format_call(op: Opcode, function: &str, outputs: &[Var], inputs: &[Arg]) -> String {
    let outs: Vec<&str> = outputs.iter().map(Var::name).collect();
    let ins: Vec<String> = inputs.iter().map(|a| a.to_string()).collect();
    format!(
        "{} {} [ {} ] [ {} ]",
        op,
        function,
        outs.join(" "),
        ins.join(" ")
    )
}

/// Computed values shared by both call forms.
fn common_call_results(
    op: Opcode,
    function: &str,
    inputs: &[Arg],
    outputs: &[Var],
    writes_mapped: bool,
    foreign: &ForeignRegistry,
) -> Option<Vec<ResultVal>> {
    if !foreign.is_pure(function) {
        return None;
    }

    let is_copy_call = foreign.is_copy_function(function)
        || (foreign.is_min_max_function(function)
            && inputs.len() == 2
            && inputs[0] == inputs[1]);
    if !writes_mapped && is_copy_call {
        return Some(vec![ResultVal::copy(&outputs[0], inputs[0].clone())]);
    }

    let mut results = Vec::with_capacity(outputs.len());
    for (index, out) in outputs.iter().enumerate() {
        let mut canonical = inputs.to_vec();
        if foreign.is_commutative(function) {
            canonical.sort();
        }
        results.push(ResultVal::build(
            ComputedValue::new(op, format!("{}:{}", function, index), canonical),
            out.as_arg(),
            false,
        ));
    }
    add_special_results(op, function, inputs, outputs, foreign, &mut results);
    Some(results)
}

/// Extra computed values for the special foreign functions.
fn add_special_results(
    op: Opcode,
    function: &str,
    inputs: &[Arg],
    outputs: &[Var],
    foreign: &ForeignRegistry,
    results: &mut Vec<ResultVal>,
) {
    let special = match foreign.special_of(function) {
        Some(s) => s,
        None => return,
    };
    match special {
        SpecialFunction::InputFile
        | SpecialFunction::UncachedInputFile
        | SpecialFunction::InputUrl => {
            // The output file's filename equals the input string. Valid
            // even for the uncached variant, which stays impure.
            let file = &outputs[0];
            let filename = inputs[0].clone();
            let (cv_op, closed) = if op == Opcode::CallForeignLocal {
                (Opcode::GetLocalFilename, true)
            } else {
                (Opcode::GetFilename, false)
            };
            results.push(ResultVal::build(
                ComputedValue::new(cv_op, "", vec![file.as_arg()]),
                filename,
                closed,
            ));
        }
        SpecialFunction::Range | SpecialFunction::RangeStep if op == Opcode::CallForeignLocal => {
            add_range_results(function, inputs, outputs, foreign, results);
        }
        SpecialFunction::Size => {
            let subop = if outputs[0].ty().is_prim_future() {
                ComputedValue::ARRAY_SIZE_FUTURE
            } else {
                ComputedValue::ARRAY_SIZE_VAL
            };
            results.push(ResultVal::build(
                ComputedValue::new(Opcode::Fake, subop, vec![inputs[0].clone()]),
                outputs[0].as_arg(),
                true,
            ));
        }
        _ => {}
    }
}

fn add_range_results(
    function: &str,
    inputs: &[Arg],
    outputs: &[Var],
    foreign: &ForeignRegistry,
    results: &mut Vec<ResultVal>,
) {
    let int_input = |i: usize| -> Option<i64> {
        inputs.get(i).filter(|a| a.is_int_val()).map(Arg::int_lit_value)
    };
    let (start, end) = match (int_input(0), int_input(1)) {
        (Some(s), Some(e)) => (s, e),
        _ => return,
    };
    let step = if foreign.is_special_impl(function, SpecialFunction::RangeStep) {
        match int_input(2) {
            Some(s) if s != 0 => s,
            _ => return,
        }
    } else {
        1
    };
    let size = std::cmp::max(0, (end - start) / step + 1);
    results.push(ResultVal::build(
        ComputedValue::new(
            Opcode::Fake,
            ComputedValue::ARRAY_SIZE_VAL,
            vec![outputs[0].as_arg()],
        ),
        Arg::int_lit(size),
        true,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_foundation::{Alloc, DefKind, PrimKind, Type};

    fn fut(name: &str, kind: PrimKind) -> Var {
        Var::new(name, Type::future(kind), Alloc::Temp, DefKind::LocalCompiler)
    }

    fn val(name: &str, kind: PrimKind) -> Var {
        Var::new(name, Type::value(kind), Alloc::Local, DefKind::LocalCompiler)
    }

    #[test]
    fn foreign_call_blocks_on_future_and_ref_inputs() {
        let prog = Program::new(ForeignRegistry::new());
        let a = fut("a", PrimKind::Int);
        let prio = val("p", PrimKind::Int);
        let out = fut("o", PrimKind::Int);
        let inst = FunctionCall::foreign(
            "f",
            vec![a.as_arg(), prio.as_arg(), Arg::int_lit(3)],
            vec![out],
            TaskProps::new(),
        );
        assert_eq!(inst.blocking_inputs(&prog), vec![a]);
    }

    #[test]
    fn sync_call_never_blocks() {
        let prog = Program::new(ForeignRegistry::new());
        let a = fut("a", PrimKind::Int);
        let inst = FunctionCall::new(
            "f",
            vec![a.as_arg()],
            vec![],
            TaskMode::Sync,
            TaskProps::new(),
        );
        assert!(inst.blocking_inputs(&prog).is_empty());
    }

    #[test]
    fn pure_commutative_call_results_are_canonical() {
        let mut foreign = ForeignRegistry::new();
        foreign.register_pure("add");
        foreign.register_commutative("add");
        let a = fut("a", PrimKind::Int);
        let b = fut("b", PrimKind::Int);
        let out = fut("o", PrimKind::Int);

        let ab = FunctionCall::foreign(
            "add",
            vec![a.as_arg(), b.as_arg()],
            vec![out.clone()],
            TaskProps::new(),
        );
        let ba = FunctionCall::foreign(
            "add",
            vec![b.as_arg(), a.as_arg()],
            vec![out],
            TaskProps::new(),
        );
        let settings = Settings::new();
        let cvs = crate::opt::computed::EmptyCvMap;
        let rv_ab = ab.results(&cvs, &foreign, &settings).unwrap();
        let rv_ba = ba.results(&cvs, &foreign, &settings).unwrap();
        assert_eq!(rv_ab[0].value, rv_ba[0].value);
    }

    #[test]
    fn copy_function_results_link_output_to_input() {
        let mut foreign = ForeignRegistry::new();
        foreign.register_pure("copy_f");
        foreign.register_copy_function("copy_f");
        let a = fut("a", PrimKind::Float);
        let out = fut("o", PrimKind::Float);
        let inst =
            FunctionCall::foreign("copy_f", vec![a.as_arg()], vec![out.clone()], TaskProps::new());
        let settings = Settings::new();
        let rvs = inst
            .results(&crate::opt::computed::EmptyCvMap, &foreign, &settings)
            .unwrap();
        assert_eq!(rvs.len(), 1);
        assert!(rvs[0].value.is_copy());
        assert_eq!(rvs[0].location, out.as_arg());
    }

    #[test]
    fn range_size_folds_to_zero_for_empty_range() {
        let foreign = ForeignRegistry::with_defaults();
        let arr = Var::new(
            "arr",
            Type::array(Type::future(PrimKind::Int), Type::future(PrimKind::Int)),
            Alloc::Temp,
            DefKind::LocalCompiler,
        );
        let inst = LocalFunctionCall::new(
            "range",
            vec![Arg::int_lit(10), Arg::int_lit(1)],
            vec![arr],
        );
        let settings = Settings::new();
        let rvs = inst
            .results(&crate::opt::computed::EmptyCvMap, &foreign, &settings)
            .unwrap();
        let size_rv = rvs
            .iter()
            .find(|rv| rv.value.subop == ComputedValue::ARRAY_SIZE_VAL)
            .unwrap();
        assert_eq!(size_rv.location, Arg::int_lit(0));
    }

    #[test]
    fn argv_folds_against_compile_time_args() {
        let foreign = ForeignRegistry::with_defaults();
        let mut settings = Settings::new();
        settings
            .compile_time_args
            .insert("mode".to_string(), "fast".to_string());
        let out = fut("o", PrimKind::Str);
        let mut inst =
            LocalFunctionCall::new("argv", vec![Arg::string_lit("mode")], vec![out.clone()]);
        let folded = inst
            .constant_fold("main", &IndexMap::new(), &foreign, &settings)
            .unwrap();
        assert_eq!(folded.get(&out), Some(&Arg::string_lit("fast")));
    }
}
