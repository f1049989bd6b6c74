//! Registry of foreign (engine-provided) functions.
//!
//! Foreign functions are implemented outside the compiled program. The
//! registry records the semantic facts the instruction model queries:
//! purity, commutativity, operator equivalence, availability of a local
//! (inline) implementation, and the execution mode of the spawned task.

use indexmap::{IndexMap, IndexSet};

use crate::ops::BuiltinOp;
use crate::task::{TaskMode, TaskPropKey};

/// Foreign functions the compiler understands beyond their signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialFunction {
    Range,
    RangeStep,
    Size,
    InputFile,
    UncachedInputFile,
    InputUrl,
    Argv,
    Assert,
    AssertEq,
}

impl SpecialFunction {
    /// The canonical registration name of the special function.
    pub fn default_impl_name(self) -> &'static str {
        match self {
            SpecialFunction::Range => "range",
            SpecialFunction::RangeStep => "range_step",
            SpecialFunction::Size => "size",
            SpecialFunction::InputFile => "input_file",
            SpecialFunction::UncachedInputFile => "uncached_input_file",
            SpecialFunction::InputUrl => "input_url",
            SpecialFunction::Argv => "argv",
            SpecialFunction::Assert => "assert",
            SpecialFunction::AssertEq => "assert_eq",
        }
    }

    pub const ALL: [SpecialFunction; 9] = [
        SpecialFunction::Range,
        SpecialFunction::RangeStep,
        SpecialFunction::Size,
        SpecialFunction::InputFile,
        SpecialFunction::UncachedInputFile,
        SpecialFunction::InputUrl,
        SpecialFunction::Argv,
        SpecialFunction::Assert,
        SpecialFunction::AssertEq,
    ];
}

/// Compiler-expanded functions that never become calls in the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntrinsicFunction {
    /// `filename(f)` - the filename future of a file variable.
    Filename,
}

impl IntrinsicFunction {
    /// Task properties that may be annotated on a call to this intrinsic.
    pub fn valid_props(self) -> &'static [TaskPropKey] {
        match self {
            IntrinsicFunction::Filename => &[],
        }
    }
}

/// Semantic facts about foreign functions, keyed by implementation name.
#[derive(Debug, Default, Clone)]
pub struct ForeignRegistry {
    pure: IndexSet<String>,
    commutative: IndexSet<String>,
    copy_functions: IndexSet<String>,
    min_max_functions: IndexSet<String>,
    op_equiv: IndexMap<String, BuiltinOp>,
    local_impls: IndexSet<String>,
    task_modes: IndexMap<String, TaskMode>,
    special_impls: IndexMap<String, SpecialFunction>,
    inits_output_mapping: IndexSet<String>,
}

impl ForeignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every special function registered under its
    /// canonical name. Range variants get local implementations; input
    /// file functions initialize their output's mapping.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        for special in SpecialFunction::ALL {
            let name = special.default_impl_name();
            reg.register_special(name, special);
            match special {
                SpecialFunction::Range | SpecialFunction::RangeStep => {
                    reg.register_pure(name);
                    reg.register_local_impl(name);
                }
                SpecialFunction::Size => {
                    reg.register_pure(name);
                    reg.register_local_impl(name);
                }
                SpecialFunction::Argv => {
                    reg.register_pure(name);
                    reg.register_local_impl(name);
                }
                SpecialFunction::InputFile
                | SpecialFunction::UncachedInputFile
                | SpecialFunction::InputUrl => {
                    // Impure: the file's contents depend on the environment.
                    reg.register_local_impl(name);
                    reg.register_inits_output_mapping(name);
                }
                SpecialFunction::Assert | SpecialFunction::AssertEq => {}
            }
        }
        reg
    }

    pub fn register_pure(&mut self, name: &str) {
        self.pure.insert(name.to_string());
    }

    pub fn register_commutative(&mut self, name: &str) {
        self.commutative.insert(name.to_string());
    }

    pub fn register_copy_function(&mut self, name: &str) {
        self.copy_functions.insert(name.to_string());
    }

    pub fn register_min_max_function(&mut self, name: &str) {
        self.min_max_functions.insert(name.to_string());
    }

    pub fn register_op_equiv(&mut self, name: &str, op: BuiltinOp) {
        self.op_equiv.insert(name.to_string(), op);
    }

    pub fn register_local_impl(&mut self, name: &str) {
        self.local_impls.insert(name.to_string());
    }

    pub fn register_task_mode(&mut self, name: &str, mode: TaskMode) {
        self.task_modes.insert(name.to_string(), mode);
    }

    pub fn register_special(&mut self, impl_name: &str, special: SpecialFunction) {
        self.special_impls.insert(impl_name.to_string(), special);
    }

    pub fn register_inits_output_mapping(&mut self, name: &str) {
        self.inits_output_mapping.insert(name.to_string());
    }

    pub fn is_pure(&self, name: &str) -> bool {
        self.pure.contains(name)
    }

    pub fn is_commutative(&self, name: &str) -> bool {
        self.commutative.contains(name)
    }

    pub fn is_copy_function(&self, name: &str) -> bool {
        self.copy_functions.contains(name)
    }

    pub fn is_min_max_function(&self, name: &str) -> bool {
        self.min_max_functions.contains(name)
    }

    pub fn has_op_equiv(&self, name: &str) -> bool {
        self.op_equiv.contains_key(name)
    }

    pub fn op_equiv(&self, name: &str) -> Option<BuiltinOp> {
        self.op_equiv.get(name).copied()
    }

    /// Whether a synchronous local implementation exists, enabling the
    /// make-immediate transformation.
    pub fn has_local_version(&self, name: &str) -> bool {
        self.local_impls.contains(name) || self.has_op_equiv(name)
    }

    /// Mode of the task spawned by an async call to the function.
    pub fn task_mode(&self, name: &str) -> TaskMode {
        self.task_modes.get(name).copied().unwrap_or(TaskMode::Control)
    }

    /// Mode the immediate (local) version should run in.
    pub fn local_task_mode(&self, name: &str) -> TaskMode {
        self.task_modes.get(name).copied().unwrap_or(TaskMode::Local)
    }

    pub fn special_of(&self, impl_name: &str) -> Option<SpecialFunction> {
        self.special_impls.get(impl_name).copied()
    }

    pub fn is_special_impl(&self, impl_name: &str, special: SpecialFunction) -> bool {
        self.special_of(impl_name) == Some(special)
    }

    /// The registered implementation name for a special function.
    pub fn find_special_impl(&self, special: SpecialFunction) -> Option<&str> {
        self.special_impls
            .iter()
            .find(|(_, s)| **s == special)
            .map(|(name, _)| name.as_str())
    }

    pub fn is_assert_variant(&self, name: &str) -> bool {
        matches!(
            self.special_of(name),
            Some(SpecialFunction::Assert) | Some(SpecialFunction::AssertEq)
        )
    }

    /// Whether the function's local version initializes its file output's
    /// mapping itself (`input_file` and friends).
    pub fn inits_output_mapping(&self, name: &str) -> bool {
        self.inits_output_mapping.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_specials() {
        let reg = ForeignRegistry::with_defaults();
        for special in SpecialFunction::ALL {
            let name = reg.find_special_impl(special).unwrap();
            assert!(reg.is_special_impl(name, special));
        }
        assert!(reg.is_assert_variant("assert"));
        assert!(reg.is_assert_variant("assert_eq"));
        assert!(!reg.is_assert_variant("range"));
    }

    #[test]
    fn op_equiv_implies_local_version() {
        let mut reg = ForeignRegistry::new();
        reg.register_op_equiv("plus_integer", BuiltinOp::PlusInt);
        assert!(reg.has_local_version("plus_integer"));
        assert_eq!(reg.op_equiv("plus_integer"), Some(BuiltinOp::PlusInt));
    }
}
