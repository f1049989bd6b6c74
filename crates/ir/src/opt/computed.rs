//! Canonical symbolic descriptions of instruction outputs.
//!
//! A `ComputedValue` identifies what an instruction computed: the opcode,
//! a sub-operation discriminator, and a canonical input vector. The
//! common-subexpression pass maps each computed value to its current
//! location (a variable or a constant); instructions report theirs via
//! `ResultVal`s.

use indexmap::{IndexMap, IndexSet};

use rill_foundation::{Arg, Var};

use crate::instr::Opcode;

/// The identity of a computed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputedValue {
    pub op: Opcode,
    /// Discriminates computations sharing an opcode: the builtin operator
    /// name, the foreign function name plus output index, or one of the
    /// pseudo sub-operations below.
    pub subop: String,
    /// Canonical inputs: commutative operators sort, flippable operators
    /// normalize direction.
    pub inputs: Vec<Arg>,
}

impl ComputedValue {
    /// Pseudo sub-operation: the size of an array as a future.
    pub const ARRAY_SIZE_FUTURE: &'static str = "array_size_future";
    /// Pseudo sub-operation: the size of an array as a local value.
    pub const ARRAY_SIZE_VAL: &'static str = "array_size_val";
    /// Pseudo sub-operation: a straight copy of the input.
    pub const COPY: &'static str = "copy";

    pub fn new(op: Opcode, subop: impl Into<String>, inputs: Vec<Arg>) -> Self {
        Self {
            op,
            subop: subop.into(),
            inputs,
        }
    }

    /// The computed value of a copy of `src`.
    pub fn copy(src: Arg) -> Self {
        Self::new(Opcode::Fake, Self::COPY, vec![src])
    }

    pub fn is_copy(&self) -> bool {
        self.op == Opcode::Fake && self.subop == Self::COPY
    }

    pub fn input(&self, i: usize) -> &Arg {
        &self.inputs[i]
    }
}

/// A computed value together with where it now lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultVal {
    pub value: ComputedValue,
    /// The output variable holding the value, or a constant.
    pub location: Arg,
    /// Whether the location is closed as soon as the instruction returns.
    pub out_closed: bool,
}

impl ResultVal {
    pub fn build(value: ComputedValue, location: Arg, out_closed: bool) -> Self {
        Self {
            value,
            location,
            out_closed,
        }
    }

    /// Record that `dst` is a copy of `src`.
    pub fn copy(dst: &Var, src: Arg) -> Self {
        Self {
            value: ComputedValue::copy(src),
            location: dst.as_arg(),
            out_closed: false,
        }
    }
}

/// The queries instructions make against already-known computed values.
pub trait CvMap {
    fn is_closed(&self, var: &Var) -> bool;

    /// The current location of a computed value, if known.
    fn lookup(&self, value: &ComputedValue) -> Option<Arg>;

    /// All computed values known to be stored in a variable.
    fn var_contents(&self, var: &Var) -> Vec<ComputedValue>;
}

/// A map with nothing in it.
pub struct EmptyCvMap;

impl CvMap for EmptyCvMap {
    fn is_closed(&self, _var: &Var) -> bool {
        false
    }

    fn lookup(&self, _value: &ComputedValue) -> Option<Arg> {
        None
    }

    fn var_contents(&self, _var: &Var) -> Vec<ComputedValue> {
        vec![]
    }
}

/// A concrete computed-value store.
#[derive(Debug, Default)]
pub struct MapCvMap {
    closed: IndexSet<Var>,
    locations: IndexMap<ComputedValue, Arg>,
    contents: IndexMap<Var, Vec<ComputedValue>>,
}

impl MapCvMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_closed(&mut self, var: Var) {
        self.closed.insert(var);
    }

    /// Record that `var` holds `value`.
    pub fn remember(&mut self, var: Var, value: ComputedValue) {
        self.locations
            .entry(value.clone())
            .or_insert_with(|| var.as_arg());
        self.contents.entry(var).or_default().push(value);
    }

    /// Record an instruction's reported result.
    pub fn remember_result(&mut self, rv: &ResultVal) {
        self.locations
            .entry(rv.value.clone())
            .or_insert_with(|| rv.location.clone());
        if let Arg::Var(v) = &rv.location {
            self.contents
                .entry(v.clone())
                .or_default()
                .push(rv.value.clone());
            if rv.out_closed {
                self.closed.insert(v.clone());
            }
        }
    }
}

impl CvMap for MapCvMap {
    fn is_closed(&self, var: &Var) -> bool {
        self.closed.contains(var)
    }

    fn lookup(&self, value: &ComputedValue) -> Option<Arg> {
        self.locations.get(value).cloned()
    }

    fn var_contents(&self, var: &Var) -> Vec<ComputedValue> {
        self.contents.get(var).cloned().unwrap_or_default()
    }
}

/// When `dst` is a copy of `src`, every computed value `src` holds also
/// describes `dst`. This closes the CSE relation under copy-equivalence.
pub fn copied_rvs(existing: &dyn CvMap, dst: &Var, src: &Var) -> Vec<ResultVal> {
    existing
        .var_contents(src)
        .into_iter()
        .map(|cv| ResultVal::build(cv, dst.as_arg(), false))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_foundation::{Alloc, DefKind, PrimKind, Type};

    fn fut(name: &str) -> Var {
        Var::new(
            name,
            Type::future(PrimKind::Int),
            Alloc::Temp,
            DefKind::LocalCompiler,
        )
    }

    #[test]
    fn lookup_returns_first_known_location() {
        let x = fut("x");
        let y = fut("y");
        let cv = ComputedValue::new(Opcode::LoadInt, "", vec![fut("src").as_arg()]);
        let mut map = MapCvMap::new();
        map.remember(x.clone(), cv.clone());
        map.remember(y, cv.clone());
        assert_eq!(map.lookup(&cv), Some(x.as_arg()));
    }

    #[test]
    fn copy_propagates_contents_transitively() {
        let src = fut("src");
        let dst = fut("dst");
        let cv = ComputedValue::new(Opcode::LoadInt, "", vec![fut("orig").as_arg()]);
        let mut map = MapCvMap::new();
        map.remember(src.clone(), cv.clone());

        let propagated = copied_rvs(&map, &dst, &src);
        assert_eq!(propagated.len(), 1);
        assert_eq!(propagated[0].value, cv);
        assert_eq!(propagated[0].location, dst.as_arg());
    }

    #[test]
    fn closed_tracking_follows_results() {
        let x = fut("x");
        let rv = ResultVal::build(
            ComputedValue::new(Opcode::StoreInt, "", vec![Arg::int_lit(5)]),
            x.as_arg(),
            true,
        );
        let mut map = MapCvMap::new();
        map.remember_result(&rv);
        assert!(map.is_closed(&x));
    }
}
