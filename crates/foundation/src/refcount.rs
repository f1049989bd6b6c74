//! Reference-count model.
//!
//! Every engine-visible variable carries independent read and write
//! counts. Instructions declare which variables they read-increment and
//! write-increment; a later pass inserts the balancing decrements.

use std::hash::Hash;

use indexmap::IndexMap;

use crate::var::{Alloc, Var};

/// Which counter a refcount operation adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefCountKind {
    Readers,
    Writers,
}

/// Whether the variable carries a read refcount. Local values and global
/// constants are not engine-tracked.
pub fn has_read_refcount(var: &Var) -> bool {
    if var.alloc() == Alloc::GlobalConst {
        return false;
    }
    !var.ty().is_prim_value()
}

/// Whether the variable carries a write refcount. Only open (writable)
/// engine storage is tracked.
pub fn has_write_refcount(var: &Var) -> bool {
    if var.alloc() == Alloc::GlobalConst || var.alloc() == Alloc::Local {
        return false;
    }
    !var.ty().is_prim_value()
}

/// An ordered counter map, used to accumulate pending refcount deltas
/// during piggybacking.
#[derive(Debug, Clone, Default)]
pub struct Counters<K: Hash + Eq> {
    counts: IndexMap<K, i64>,
}

impl<K: Hash + Eq + Clone> Counters<K> {
    pub fn new() -> Self {
        Self {
            counts: IndexMap::new(),
        }
    }

    pub fn add(&mut self, key: K, delta: i64) {
        let entry = self.counts.entry(key).or_insert(0);
        *entry += delta;
    }

    pub fn get(&self, key: &K) -> i64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn reset(&mut self, key: &K) {
        self.counts.shift_remove(key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, i64)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrimKind, Type};
    use crate::var::DefKind;

    #[test]
    fn local_values_have_no_refcounts() {
        let val = Var::new(
            "v1",
            Type::value(PrimKind::Int),
            Alloc::Local,
            DefKind::LocalCompiler,
        );
        assert!(!has_read_refcount(&val));
        assert!(!has_write_refcount(&val));

        let fut = Var::new(
            "tmp1",
            Type::future(PrimKind::Int),
            Alloc::Temp,
            DefKind::LocalCompiler,
        );
        assert!(has_read_refcount(&fut));
        assert!(has_write_refcount(&fut));
    }

    #[test]
    fn counters_accumulate() {
        let mut c = Counters::new();
        c.add("x", 2);
        c.add("x", -1);
        assert_eq!(c.get(&"x"), 1);
        c.reset(&"x");
        assert_eq!(c.get(&"x"), 0);
    }
}
