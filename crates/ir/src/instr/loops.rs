//! Dataflow loop instructions.
//!
//! `LoopContinue` carries the next iteration's variable bindings together
//! with a parallel blocking bitvector; `LoopBreak` terminates the loop,
//! releasing refcounts and closing the loop's write-ends.

use std::fmt;

use indexmap::{IndexMap, IndexSet};

use rill_foundation::{Arg, Var};

use super::{output_positions_renamed, replace_vars, Instruction, MakeImmRequest, RenameMode};

/// Spawn the next loop iteration with new variable bindings.
#[derive(Debug, Clone)]
pub struct LoopContinue {
    new_loop_vars: Vec<Var>,
    loop_used_vars: Vec<Var>,
    /// Parallel to `new_loop_vars`: whether the next iteration must wait
    /// for the binding to close.
    blocking: Vec<bool>,
}

impl LoopContinue {
    pub fn new(new_loop_vars: Vec<Var>, loop_used_vars: Vec<Var>, blocking: Vec<bool>) -> Instruction {
        assert_eq!(new_loop_vars.len(), blocking.len());
        Instruction::LoopContinue(Self {
            new_loop_vars,
            loop_used_vars,
            blocking,
        })
    }

    pub fn new_loop_vars(&self) -> &[Var] {
        &self.new_loop_vars
    }

    pub fn blocking(&self) -> &[bool] {
        &self.blocking
    }

    pub fn set_loop_used_vars(&mut self, vars: Vec<Var>) {
        self.loop_used_vars = vars;
    }

    pub fn inputs(&self) -> Vec<Arg> {
        // The new bindings must be available in scope at the spawn point.
        self.new_loop_vars.iter().map(Var::as_arg).collect()
    }

    /// Prune blocking bits for bindings already closed, and for repeated
    /// occurrences of the same binding. Never becomes fully immediate.
    pub fn can_make_immediate(&mut self, closed: &IndexSet<Var>) -> Option<MakeImmRequest> {
        let mut already_done: IndexSet<Var> = IndexSet::new();
        for i in 0..self.new_loop_vars.len() {
            if self.blocking[i] {
                let v = &self.new_loop_vars[i];
                if closed.contains(v) || already_done.contains(v) {
                    self.blocking[i] = false;
                } else {
                    already_done.insert(v.clone());
                }
            }
        }
        None
    }

    /// The next iteration holds read references to its bindings.
    pub fn read_incr_vars(&self) -> Vec<Var> {
        self.new_loop_vars.clone()
    }

    pub fn rename_vars(&mut self, renames: &IndexMap<Var, Arg>, mode: RenameMode) {
        replace_vars(renames, &mut self.new_loop_vars);
        if output_positions_renamed(mode) {
            replace_vars(renames, &mut self.loop_used_vars);
        }
    }
}

impl fmt::Display for LoopContinue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.new_loop_vars.iter().map(Var::name).collect();
        let used: Vec<&str> = self.loop_used_vars.iter().map(Var::name).collect();
        write!(
            f,
            "loop_continue [{}] #passin[{}] #blocking{:?}",
            names.join(" "),
            used.join(" "),
            self.blocking
        )
    }
}

/// Terminate the loop.
#[derive(Debug, Clone)]
pub struct LoopBreak {
    /// Variables whose refcounts are released at loop termination.
    loop_used_vars: Vec<Var>,
    /// Variables whose write-ends close at loop termination.
    keep_open_vars: Vec<Var>,
}

impl LoopBreak {
    pub fn new(loop_used_vars: Vec<Var>, keep_open_vars: Vec<Var>) -> Instruction {
        Instruction::LoopBreak(Self {
            loop_used_vars,
            keep_open_vars,
        })
    }

    pub fn loop_used_vars(&self) -> &[Var] {
        &self.loop_used_vars
    }

    pub fn keep_open_vars(&self) -> &[Var] {
        &self.keep_open_vars
    }

    pub fn set_loop_used_vars(&mut self, vars: Vec<Var>) {
        self.loop_used_vars = vars;
    }

    pub fn set_keep_open_vars(&mut self, vars: Vec<Var>) {
        self.keep_open_vars = vars;
    }
}

impl fmt::Display for LoopBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used: Vec<&str> = self.loop_used_vars.iter().map(Var::name).collect();
        let open: Vec<&str> = self.keep_open_vars.iter().map(Var::name).collect();
        write!(f, "loop_break #passin[{}] #keepopen[{}]", used.join(" "), open.join(" "))
    }
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
    fn closed_blocking_bits_are_pruned() {
        let a = fut("a");
        let b = fut("b");
        let mut inst = LoopContinue::new(
            vec![a.clone(), b.clone(), b.clone()],
            vec![],
            vec![true, true, true],
        );
        let mut closed = IndexSet::new();
        closed.insert(a.clone());
        let foreign = rill_foundation::ForeignRegistry::new();
        assert!(inst.can_make_immediate(&closed, false, &foreign).is_none());
        match &inst {
            Instruction::LoopContinue(lc) => {
                // a is closed; the duplicate occurrence of b blocks once.
                assert_eq!(lc.blocking(), &[false, true, false]);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn loop_continue_reads_its_bindings() {
        let a = fut("a");
        let inst = LoopContinue::new(vec![a.clone()], vec![], vec![false]);
        match &inst {
            Instruction::LoopContinue(lc) => {
                assert_eq!(lc.read_incr_vars(), vec![a.clone()]);
            }
            _ => unreachable!(),
        }
        assert_eq!(inst.inputs(), vec![a.as_arg()]);
        assert!(inst.outputs().is_empty());
    }
}
