//! Structural sanity checks on the IR.
//!
//! Violations are compiler bugs, not user errors, so every check panics.
//! The pass never mutates the program; validating twice is the same as
//! validating once.

use indexmap::{IndexMap, IndexSet};

use rill_foundation::Var;

use crate::instr::Instruction;
use crate::tree::{Block, BlockId, BlockType, Function, Program, Statement};

/// Checks variable naming, reference identity, cleanup placement, and
/// parent links.
pub struct Validator {
    check_var_passing: bool,
    check_cleanups: bool,
}

impl Validator {
    /// The validator run before refcount insertion: full checks, and no
    /// refcount operations may be present.
    pub fn standard() -> Self {
        Self {
            check_var_passing: true,
            check_cleanups: true,
        }
    }

    /// Accepts post-refcount IR: cleanup placement and variable passing
    /// are no longer checked.
    pub fn final_form() -> Self {
        Self {
            check_var_passing: false,
            check_cleanups: false,
        }
    }

    pub fn validate(&self, program: &Program) {
        for func in program.functions.values() {
            check_parent_links(func);
            self.check_unique_var_names(program, func);
            if self.check_var_passing {
                check_var_visibility(program, func);
            }
        }
    }

    /// Variable names are unique within a function, and every reference to
    /// a variable is identical to its declaration.
    fn check_unique_var_names(&self, program: &Program, func: &Function) {
        let mut declared: IndexMap<String, Var> = IndexMap::new();
        for global in program.global_vars() {
            declared.insert(global.name().to_string(), global.clone());
        }
        for arg in func.inputs.iter().chain(&func.outputs) {
            declared.insert(arg.name().to_string(), arg.clone());
        }
        self.check_block_names(func, func.main_block_id(), &mut declared);
    }

    fn check_block_names(
        &self,
        func: &Function,
        block_id: BlockId,
        declared: &mut IndexMap<String, Var>,
    ) {
        let block = func.block(block_id);
        for var in &block.vars {
            check_var_unique(func, declared, var);
            if let Some(mapping) = var.mapping() {
                assert!(
                    declared.contains_key(mapping.name()),
                    "mapping {} of {} not declared in function {}",
                    mapping.name(),
                    var.name(),
                    func.name
                );
            }
        }

        check_var_references(func, block, declared);

        if self.check_cleanups {
            check_cleanups(func, block);
        }

        for stmt in &block.statements {
            if let Statement::Conditional(cont_id) = stmt {
                let cont = func.cont(*cont_id);
                for var in cont.construct_defined_vars() {
                    check_var_unique(func, declared, &var);
                }
                for child in &cont.blocks {
                    self.check_block_names(func, *child, declared);
                }
            }
        }
    }
}

fn check_var_unique(func: &Function, declared: &mut IndexMap<String, Var>, var: &Var) {
    use rill_foundation::DefKind;
    if var.def_kind() == DefKind::GlobalConst {
        let global = declared
            .get(var.name())
            .unwrap_or_else(|| panic!("missing global constant {}", var.name()));
        assert!(
            global.identical(var),
            "global constant {} redeclared with different attributes",
            var.name()
        );
        return;
    }
    if declared.contains_key(var.name()) {
        panic!(
            "duplicate variable name {} in function {}",
            var.name(),
            func.name
        );
    }
    declared.insert(var.name().to_string(), var.clone());
}

/// Every `Var` used in the block must match its declaration in name,
/// storage, type, and mapping.
fn check_var_references(func: &Function, block: &Block, declared: &IndexMap<String, Var>) {
    for stmt in &block.statements {
        match stmt {
            Statement::Instruction(inst) => check_instruction_references(func, inst, declared),
            Statement::Conditional(cont_id) => {
                for var in func.cont(*cont_id).required_vars() {
                    check_var_reference(func, &var, declared);
                }
            }
        }
    }
    for cleanup in &block.cleanups {
        check_var_reference(func, &cleanup.var, declared);
        check_instruction_references(func, &cleanup.action, declared);
    }
}

fn check_instruction_references(
    func: &Function,
    inst: &Instruction,
    declared: &IndexMap<String, Var>,
) {
    for input in inst.inputs() {
        if let Some(var) = input.opt_var() {
            check_var_reference(func, var, declared);
        }
    }
    for output in inst.outputs() {
        check_var_reference(func, &output, declared);
    }
}

fn check_var_reference(func: &Function, referenced: &Var, declared: &IndexMap<String, Var>) {
    let declaration = declared.get(referenced.name()).unwrap_or_else(|| {
        panic!(
            "variable {} referenced in function {} but never declared",
            referenced.name(),
            func.name
        )
    });
    assert!(
        referenced.identical(declaration),
        "reference to {} in function {} does not match its declaration: {:?} vs {:?}",
        referenced.name(),
        func.name,
        referenced,
        declaration
    );
}

/// A cleanup may only refer to a variable scoped to its block: a block
/// variable, a construct-defined variable of the parent continuation, or,
/// in the main block, a function argument. Refcount operations must not
/// appear before the refcount pass runs.
fn check_cleanups(func: &Function, block: &Block) {
    let construct_vars;
    let mut block_vars: IndexSet<&Var> = block.vars.iter().collect();
    if block.block_type == BlockType::MainBlock {
        block_vars.extend(func.inputs.iter());
        block_vars.extend(func.outputs.iter());
    } else {
        let parent = block
            .parent
            .expect("non-main block without parent continuation");
        construct_vars = func.cont(parent).construct_defined_vars();
        block_vars.extend(construct_vars.iter());
    }

    for cleanup in &block.cleanups {
        assert!(
            !cleanup.action.op().is_refcount_op(),
            "refcount operation present before refcount pass: {}",
            cleanup.action
        );
        assert!(
            block_vars.contains(&cleanup.var),
            "cleanup for {} not scoped to its block in function {}",
            cleanup.var.name(),
            func.name
        );
    }
}

/// Parent links are consistent in both directions.
fn check_parent_links(func: &Function) {
    assert_eq!(func.main_block().block_type, BlockType::MainBlock);
    assert!(func.main_block().parent.is_none());

    for cont in func.continuations() {
        let parent = func.block(cont.parent);
        let listed = parent
            .statements
            .iter()
            .any(|s| matches!(s, Statement::Conditional(id) if *id == cont.id));
        assert!(
            listed,
            "continuation {} not listed in its parent {} of function {}",
            cont.id, cont.parent, func.name
        );
        for child in &cont.blocks {
            let block = func.block(*child);
            assert_ne!(block.block_type, BlockType::MainBlock);
            assert_eq!(
                block.parent,
                Some(cont.id),
                "block {} has wrong parent in function {}",
                block.id,
                func.name
            );
        }
    }

    for block in func.blocks() {
        if block.block_type != BlockType::MainBlock {
            let parent = block
                .parent
                .unwrap_or_else(|| panic!("block {} has no parent continuation", block.id));
            assert!(
                func.cont(parent).blocks.contains(&block.id),
                "block {} not listed by its parent continuation",
                block.id
            );
        }
    }
}

/// Non-mutating visibility pass: every variable an instruction or
/// construct references must be visible on the path from the function
/// root to its block.
fn check_var_visibility(program: &Program, func: &Function) {
    let mut visible: IndexSet<Var> = IndexSet::new();
    visible.extend(program.global_vars().cloned());
    visible.extend(func.inputs.iter().cloned());
    visible.extend(func.outputs.iter().cloned());
    check_block_visibility(func, func.main_block_id(), &visible);
}

fn check_block_visibility(func: &Function, block_id: BlockId, inherited: &IndexSet<Var>) {
    let block = func.block(block_id);
    let mut visible = inherited.clone();
    visible.extend(block.vars.iter().cloned());

    let ensure = |var: &Var, visible: &IndexSet<Var>| {
        assert!(
            visible.contains(var),
            "variable {} used in {} of function {} but not visible",
            var.name(),
            block_id,
            func.name
        );
    };

    for stmt in &block.statements {
        match stmt {
            Statement::Instruction(inst) => {
                for input in inst.inputs() {
                    if let Some(var) = input.opt_var() {
                        ensure(var, &visible);
                    }
                }
                for output in inst.outputs() {
                    ensure(&output, &visible);
                }
            }
            Statement::Conditional(cont_id) => {
                let cont = func.cont(*cont_id);
                for var in cont.required_vars() {
                    ensure(&var, &visible);
                }
                let mut inner = visible.clone();
                inner.extend(cont.construct_defined_vars());
                for child in &cont.blocks {
                    check_block_visibility(func, *child, &inner);
                }
            }
        }
    }
}
