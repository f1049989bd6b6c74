//! Builtin operator instructions.
//!
//! Depending on the opcode (`LocalOp` or `AsyncOp`), the same operator
//! applies to local values or to futures. Constructors are private; use
//! the factory methods.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use tracing::{trace, warn};

use rill_foundation::{
    has_read_refcount, op_eval, Arg, BuiltinOp, Settings, TaskMode, TaskProps, Var,
};

use crate::opt::computed::{copied_rvs, ComputedValue, CvMap, ResultVal};

use super::{
    output_positions_renamed, replace_args, Fetched, Instruction, MakeImmChange, MakeImmRequest,
    Opcode, RenameMode,
};

/// A builtin operation over local values or futures.
#[derive(Debug, Clone)]
pub struct Builtin {
    op: Opcode,
    pub subop: BuiltinOp,
    output: Option<Var>,
    inputs: Vec<Arg>,
    /// Present only for the async form.
    props: Option<TaskProps>,
}

impl Builtin {
    pub fn local(subop: BuiltinOp, output: Option<Var>, inputs: Vec<Arg>) -> Instruction {
        Instruction::Builtin(Self {
            op: Opcode::LocalOp,
            subop,
            output,
            inputs,
            props: None,
        })
    }

    pub fn async_(
        subop: BuiltinOp,
        output: Option<Var>,
        inputs: Vec<Arg>,
        props: TaskProps,
    ) -> Instruction {
        Instruction::Builtin(Self {
            op: Opcode::AsyncOp,
            subop,
            output,
            inputs,
            props: Some(props),
        })
    }

    pub fn op(&self) -> Opcode {
        self.op
    }

    pub fn output(&self) -> Option<&Var> {
        self.output.as_ref()
    }

    pub fn props(&self) -> Option<&TaskProps> {
        self.props.as_ref()
    }

    pub fn inputs(&self) -> Vec<Arg> {
        match &self.props {
            None => self.inputs.clone(),
            Some(props) => {
                // Include properties so a priority input is not optimized
                // away.
                let mut all = self.inputs.clone();
                all.extend(props.values().cloned());
                all
            }
        }
    }

    pub fn operator_inputs(&self) -> &[Arg] {
        &self.inputs
    }

    pub fn outputs(&self) -> Vec<Var> {
        self.output.iter().cloned().collect()
    }

    pub fn has_side_effects(&self) -> bool {
        if self.op == Opcode::LocalOp {
            self.subop.is_impure()
        } else {
            self.subop.is_impure()
                || self
                    .output
                    .iter()
                    .any(|o| o.alloc() == rill_foundation::Alloc::Alias || o.mapping().is_some())
        }
    }

    pub fn mode(&self) -> TaskMode {
        if self.op == Opcode::AsyncOp {
            TaskMode::Control
        } else {
            TaskMode::Sync
        }
    }

    pub fn blocking_inputs(&self) -> Vec<Var> {
        if self.op == Opcode::LocalOp {
            return vec![];
        }
        self.inputs
            .iter()
            .filter_map(Arg::opt_var)
            .filter(|v| v.ty().is_prim_future() || v.ty().is_ref())
            .cloned()
            .collect()
    }

    pub fn read_incr_vars(&self) -> Vec<Var> {
        if self.op != Opcode::AsyncOp {
            return vec![];
        }
        self.inputs
            .iter()
            .filter_map(Arg::opt_var)
            .filter(|v| has_read_refcount(v))
            .cloned()
            .collect()
    }

    pub fn constant_fold(
        &mut self,
        fn_name: &str,
        known: &IndexMap<Var, Arg>,
    ) -> Option<IndexMap<Var, Arg>> {
        if self.subop == BuiltinOp::Assert || self.subop == BuiltinOp::AssertEq {
            compile_time_assert_check(self.subop, &self.inputs, known, fn_name);
        }

        let output = self.output.clone()?;

        // Constant value for each input, None where unknown.
        let mut const_inputs = Vec::with_capacity(self.inputs.len());
        for i in 0..self.inputs.len() {
            match &self.inputs[i] {
                Arg::Var(v) => {
                    let known_const = known.get(v).cloned();
                    if let Some(c) = &known_const {
                        if self.op == Opcode::LocalOp {
                            // Local value args can be replaced in place.
                            self.inputs[i] = c.clone();
                        }
                    }
                    const_inputs.push(known_const);
                }
                Arg::Const(_) => const_inputs.push(Some(self.inputs[i].clone())),
            }
        }

        let consts: Option<Vec<_>> = const_inputs
            .into_iter()
            .map(|a| a.and_then(|a| a.opt_const().cloned()))
            .collect();
        let folded = op_eval::eval(self.subop, &consts?)?;
        let mut result = IndexMap::new();
        result.insert(output, Arg::Const(folded));
        Some(result)
    }

    /// Short-circuitable operations with one known constant collapse to a
    /// copy of the remaining operand.
    pub fn constant_replace(&self, known: &IndexMap<Var, Arg>) -> Option<Instruction> {
        if !self.subop.is_short_circuitable() {
            return None;
        }
        let mut const_args = Vec::new();
        let mut var_args = Vec::new();
        for input in &self.inputs {
            match input {
                Arg::Const(c) => const_args.push(c.clone()),
                Arg::Var(v) => match known.get(v) {
                    Some(Arg::Const(c)) => const_args.push(c.clone()),
                    _ => var_args.push(v.clone()),
                },
            }
        }
        if const_args.len() != 1 || var_args.len() != 1 {
            return None;
        }
        let known_bool = match const_args[0] {
            rill_foundation::Const::Bool(b) => b,
            _ => return None,
        };
        let absorbing = (self.subop == BuiltinOp::Or && !known_bool)
            || (self.subop == BuiltinOp::And && known_bool);
        if !absorbing {
            return None;
        }
        let copy_input = vec![var_args[0].as_arg()];
        Some(if self.op == Opcode::AsyncOp {
            Builtin::async_(
                BuiltinOp::CopyBool,
                self.output.clone(),
                copy_input,
                TaskProps::new(),
            )
        } else {
            Builtin::local(BuiltinOp::CopyBool, self.output.clone(), copy_input)
        })
    }

    pub fn can_make_immediate(
        &mut self,
        closed: &IndexSet<Var>,
        wait_for_close: bool,
    ) -> Option<MakeImmRequest> {
        if self.op == Opcode::LocalOp {
            return None;
        }
        if !wait_for_close {
            for input in &self.inputs {
                let var = input.var();
                if !closed.contains(var) {
                    return None;
                }
            }
        }
        let input_vars: Vec<Var> = self
            .inputs
            .iter()
            .filter_map(Arg::opt_var)
            .cloned()
            .collect();
        Some(MakeImmRequest::new(
            self.output.iter().cloned().collect(),
            input_vars,
        ))
    }

    pub fn make_immediate(
        &self,
        out_vals: &[Fetched<Var>],
        in_vals: &[Fetched<Arg>],
    ) -> MakeImmChange {
        assert!(self.op == Opcode::AsyncOp, "already immediate");
        assert_eq!(in_vals.len(), self.inputs.len());
        let new_inputs = Fetched::values(in_vals);
        match &self.output {
            Some(output) => {
                assert_eq!(out_vals.len(), 1);
                let new_out = &out_vals[0].fetched;
                assert_eq!(output.ty().deref_result(), *new_out.ty());
                MakeImmChange::replace(Builtin::local(
                    self.subop,
                    Some(new_out.clone()),
                    new_inputs,
                ))
            }
            None => {
                assert!(out_vals.is_empty());
                MakeImmChange::replace(Builtin::local(self.subop, None, new_inputs))
            }
        }
    }

    pub fn results(&self, existing: &dyn CvMap, settings: &Settings) -> Option<Vec<ResultVal>> {
        if self.has_side_effects() {
            // Two invocations are not equivalent.
            return None;
        }

        let basic = self.basic_result();

        if self.subop.is_copy() {
            let mut results = Vec::new();
            results.extend(basic);
            if let (Some(output), Some(Arg::Var(src))) = (&self.output, self.inputs.first()) {
                results.extend(copied_rvs(existing, output, src));
            }
            return Some(results);
        }

        let inferred = self.inferred_results(existing, settings);
        let mut results = Vec::with_capacity(1 + inferred.len());
        results.extend(basic);
        results.extend(inferred);
        Some(results)
    }

    /// The computed value describing this operation's output.
    fn basic_result(&self) -> Option<ResultVal> {
        if self.subop.is_copy() {
            // Might be assigning a constant value.
            return Some(ResultVal::copy(self.output.as_ref()?, self.inputs[0].clone()));
        }
        if self.subop.is_min_max() {
            assert_eq!(self.inputs.len(), 2);
            if self.inputs[0] == self.inputs[1] {
                return Some(ResultVal::copy(self.output.as_ref()?, self.inputs[0].clone()));
            }
        }
        let output = self.output.as_ref()?;

        // Canonical argument order: sorted when commutative, direction
        // normalized when flippable.
        let (cv_op, cv_inputs) = if self.subop.is_commutative() {
            let mut sorted = self.inputs.clone();
            sorted.sort();
            (self.subop, sorted)
        } else if self.subop.is_flippable() {
            let mut reversed = self.inputs.clone();
            reversed.reverse();
            (self.subop.flipped(), reversed)
        } else {
            (self.subop, self.inputs.clone())
        };

        let out_closed = self.op == Opcode::LocalOp;
        Some(ResultVal::build(
            ComputedValue::new(self.op, format!("{:?}", cv_op), cv_inputs),
            output.as_arg(),
            out_closed,
        ))
    }

    fn inferred_results(&self, existing: &dyn CvMap, settings: &Settings) -> Vec<ResultVal> {
        if !settings.algebra {
            return vec![];
        }
        match self.subop {
            BuiltinOp::PlusInt | BuiltinOp::MinusInt => {
                let inferred = self.try_algebra(existing);
                for rv in &inferred {
                    trace!(instruction = %self, inferred = %rv.location, "algebraic value");
                }
                inferred
            }
            _ => vec![],
        }
    }

    /// Basic algebra over integer add/subtract, enough to recognize
    /// adjacent array indices: folds `x = y + c1` with a known
    /// `y = z + c2` into `x = z + (c1 + c2)`.
    fn try_algebra(&self, existing: &dyn CvMap) -> Vec<ResultVal> {
        let output = match &self.output {
            Some(o) => o,
            None => return vec![],
        };
        if self.inputs.len() != 2 {
            return vec![];
        }
        let args = match canonical_add(self.subop, &self.inputs[0], &self.inputs[1]) {
            Some(pair) => pair,
            None => return vec![],
        };

        let mut results = Vec::new();
        for cv in existing.var_contents(&args.0) {
            if cv.op != self.op {
                continue;
            }
            let prior_op = match cv.subop.as_str() {
                "PlusInt" => BuiltinOp::PlusInt,
                "MinusInt" => BuiltinOp::MinusInt,
                _ => continue,
            };
            if cv.inputs.len() != 2 {
                continue;
            }
            if let Some((base, prior_const)) = canonical_add(prior_op, &cv.inputs[0], &cv.inputs[1])
            {
                let combined = args.1 + prior_const;
                if combined == 0 {
                    results.push(ResultVal::copy(output, base.as_arg()));
                } else {
                    results.push(ResultVal::build(
                        ComputedValue::new(
                            self.op,
                            format!("{:?}", BuiltinOp::PlusInt),
                            vec![base.as_arg(), Arg::int_lit(combined)],
                        ),
                        output.as_arg(),
                        self.op == Opcode::LocalOp,
                    ));
                }
            }
        }
        results
    }

    pub fn rename_vars(&mut self, renames: &IndexMap<Var, Arg>, mode: RenameMode) {
        if output_positions_renamed(mode) {
            if let Some(output) = &self.output {
                if let Some(replacement) = renames.get(output) {
                    self.output = Some(replacement.var().clone());
                }
            }
        }
        replace_args(renames, &mut self.inputs);
        if let Some(props) = &mut self.props {
            props.rename_args(renames);
        }
    }
}

/// Normalize an integer add or subtract over one variable and one constant
/// to `(variable, added constant)`. Subtraction with a variable second
/// operand is not canonicalized.
fn canonical_add(op: BuiltinOp, in1: &Arg, in2: &Arg) -> Option<(Var, i64)> {
    if in1.is_var() == in2.is_var() {
        // Only one constant and one variable is handled.
        return None;
    }
    if let Arg::Var(v) = in1 {
        let mut constant = in2.opt_const().and_then(|c| match c {
            rill_foundation::Const::Int(i) => Some(*i),
            _ => None,
        })?;
        if op == BuiltinOp::MinusInt {
            constant = -constant;
        }
        Some((v.clone(), constant))
    } else {
        if op == BuiltinOp::MinusInt {
            // A negated variable has no canonical add form.
            return None;
        }
        let constant = in1.opt_const().and_then(|c| match c {
            rill_foundation::Const::Int(i) => Some(*i),
            _ => None,
        })?;
        Some((in2.var().clone(), constant))
    }
}

/// Compile-time checking of assertions whose inputs are all known.
fn compile_time_assert_check(
    subop: BuiltinOp,
    inputs: &[Arg],
    known: &IndexMap<Var, Arg>,
    fn_name: &str,
) {
    let mut vals = Vec::with_capacity(inputs.len());
    for input in inputs {
        match input {
            Arg::Const(_) => vals.push(input.clone()),
            Arg::Var(v) => match known.get(v) {
                Some(c) => vals.push(c.clone()),
                None => return, // can't check
            },
        }
    }

    if subop == BuiltinOp::Assert {
        if !vals[0].bool_lit_value() {
            assert_warn(fn_name, "constant condition evaluated to false", &vals[1]);
        }
    } else {
        assert_eq!(subop, BuiltinOp::AssertEq);
        if vals[0] != vals[1] {
            let reason = format!("{} != {}", vals[0], vals[1]);
            assert_warn(fn_name, &reason, &vals[2]);
        }
    }
}

fn assert_warn(fn_name: &str, reason: &str, message: &Arg) {
    let user_message = if message.is_string_val() {
        message.string_lit_value().to_string()
    } else {
        "<runtime error message>".to_string()
    };
    warn!(
        function = fn_name,
        message = %user_message,
        "assertion will fail at runtime because {}",
        reason
    );
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.op)?;
        if let Some(output) = &self.output {
            write!(f, "{} = ", output.name())?;
        }
        write!(f, "{:?}", self.subop)?;
        for input in &self.inputs {
            write!(f, " {}", input)?;
        }
        if let Some(props) = &self.props {
            write!(f, "{}", props)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::computed::EmptyCvMap;
    use rill_foundation::{Alloc, DefKind, PrimKind, Type};

    fn fut(name: &str, kind: PrimKind) -> Var {
        Var::new(name, Type::future(kind), Alloc::Temp, DefKind::LocalCompiler)
    }

    fn val(name: &str, kind: PrimKind) -> Var {
        Var::new(name, Type::value(kind), Alloc::Local, DefKind::LocalCompiler)
    }

    #[test]
    fn constant_fold_evaluates_plus() {
        let out = fut("x", PrimKind::Int);
        let mut inst = Builtin::async_(
            BuiltinOp::PlusInt,
            Some(out.clone()),
            vec![Arg::int_lit(2), Arg::int_lit(3)],
            TaskProps::new(),
        );
        let folded = inst
            .constant_fold(
                "main",
                &IndexMap::new(),
                &rill_foundation::ForeignRegistry::new(),
                &Settings::new(),
            )
            .unwrap();
        assert_eq!(folded.get(&out), Some(&Arg::int_lit(5)));
    }

    #[test]
    fn short_circuit_and_becomes_copy() {
        let a = fut("a", PrimKind::Bool);
        let t = fut("t", PrimKind::Bool);
        let x = fut("x", PrimKind::Bool);
        let inst = Builtin::async_(
            BuiltinOp::And,
            Some(x.clone()),
            vec![a.as_arg(), t.as_arg()],
            TaskProps::new(),
        );
        let mut known = IndexMap::new();
        known.insert(t, Arg::bool_lit(true));
        let replaced = inst.constant_replace(&known).unwrap();
        match replaced {
            Instruction::Builtin(b) => {
                assert_eq!(b.subop, BuiltinOp::CopyBool);
                assert_eq!(b.op(), Opcode::AsyncOp);
                assert_eq!(b.operator_inputs(), &[a.as_arg()]);
                assert_eq!(b.output(), Some(&x));
            }
            other => panic!("expected builtin, got {}", other),
        }
    }

    #[test]
    fn commutative_results_are_order_independent() {
        let a = fut("a", PrimKind::Int);
        let b = fut("b", PrimKind::Int);
        let out = fut("x", PrimKind::Int);
        let settings = Settings::new();

        let make = |ins: Vec<Arg>| {
            Builtin::async_(BuiltinOp::PlusInt, Some(out.clone()), ins, TaskProps::new())
        };
        let ab = make(vec![a.as_arg(), b.as_arg()]);
        let ba = make(vec![b.as_arg(), a.as_arg()]);
        let foreign = rill_foundation::ForeignRegistry::new();
        let rv_ab = ab.results(&EmptyCvMap, &foreign, &settings).unwrap();
        let rv_ba = ba.results(&EmptyCvMap, &foreign, &settings).unwrap();
        assert_eq!(rv_ab[0].value, rv_ba[0].value);
    }

    #[test]
    fn flippable_results_canonicalize_direction() {
        let a = fut("a", PrimKind::Int);
        let b = fut("b", PrimKind::Int);
        let out = fut("x", PrimKind::Bool);
        let settings = Settings::new();
        let foreign = rill_foundation::ForeignRegistry::new();

        let lte = Builtin::async_(
            BuiltinOp::LteInt,
            Some(out.clone()),
            vec![a.as_arg(), b.as_arg()],
            TaskProps::new(),
        );
        let gte = Builtin::async_(
            BuiltinOp::GteInt,
            Some(out.clone()),
            vec![b.as_arg(), a.as_arg()],
            TaskProps::new(),
        );
        let rv_lte = lte.results(&EmptyCvMap, &foreign, &settings).unwrap();
        let rv_gte = gte.results(&EmptyCvMap, &foreign, &settings).unwrap();
        assert_eq!(rv_lte[0].value, rv_gte[0].value);
    }

    #[test]
    fn async_op_becomes_local_on_make_immediate() {
        let a = fut("a", PrimKind::Int);
        let out = fut("x", PrimKind::Int);
        let mut inst = Builtin::async_(
            BuiltinOp::NegateInt,
            Some(out.clone()),
            vec![a.as_arg()],
            TaskProps::new(),
        );
        let mut closed = IndexSet::new();
        closed.insert(a.clone());
        let foreign = rill_foundation::ForeignRegistry::new();
        let req = inst.can_make_immediate(&closed, false, &foreign).unwrap();
        assert_eq!(req.input_vars, vec![a.clone()]);
        assert_eq!(req.out, vec![out.clone()]);

        let a_val = val("v_a", PrimKind::Int);
        let out_val = val("v_x", PrimKind::Int);
        let change = inst.make_immediate(
            &[Fetched::new(out, out_val.clone())],
            &[Fetched::new(a, a_val.as_arg())],
            &foreign,
        );
        assert_eq!(change.new_instructions.len(), 1);
        match &change.new_instructions[0] {
            Instruction::Builtin(b) => {
                assert_eq!(b.op(), Opcode::LocalOp);
                assert_eq!(b.output(), Some(&out_val));
                // Every input of the immediate form is a local value.
                for input in b.operator_inputs() {
                    assert!(input.ty().is_prim_value());
                }
            }
            other => panic!("expected builtin, got {}", other),
        }
    }

    #[test]
    fn algebra_combines_adjacent_offsets() {
        use crate::opt::computed::MapCvMap;

        let y = fut("y", PrimKind::Int);
        let z = fut("z", PrimKind::Int);
        let x = fut("x", PrimKind::Int);
        let settings = Settings {
            algebra: true,
            ..Settings::new()
        };
        let foreign = rill_foundation::ForeignRegistry::new();

        // Known: y = z + 2
        let mut cvs = MapCvMap::new();
        cvs.remember(
            y.clone(),
            ComputedValue::new(
                Opcode::AsyncOp,
                format!("{:?}", BuiltinOp::PlusInt),
                vec![z.as_arg(), Arg::int_lit(2)],
            ),
        );

        // This: x = y - 2, so x = z
        let inst = Builtin::async_(
            BuiltinOp::MinusInt,
            Some(x.clone()),
            vec![y.as_arg(), Arg::int_lit(2)],
            TaskProps::new(),
        );
        let rvs = inst.results(&cvs, &foreign, &settings).unwrap();
        assert!(rvs
            .iter()
            .any(|rv| rv.value.is_copy() && rv.value.inputs[0] == z.as_arg()));
    }

    #[test]
    fn min_with_identical_inputs_is_a_copy() {
        let a = fut("a", PrimKind::Int);
        let out = fut("x", PrimKind::Int);
        let settings = Settings::new();
        let foreign = rill_foundation::ForeignRegistry::new();
        let inst = Builtin::async_(
            BuiltinOp::MinInt,
            Some(out),
            vec![a.as_arg(), a.as_arg()],
            TaskProps::new(),
        );
        let rvs = inst.results(&EmptyCvMap, &foreign, &settings).unwrap();
        assert!(rvs[0].value.is_copy());
        assert_eq!(rvs[0].value.inputs[0], a.as_arg());
    }
}
