//! The IR tree: programs, functions, blocks, and continuations.
//!
//! Blocks and continuations live in per-function arenas and refer to each
//! other by index; parent links point back up the tree. Every block is
//! either a function's main block or a child of exactly one continuation.

use std::fmt;

use indexmap::IndexMap;

use rill_foundation::{Arg, ForeignRegistry, TaskMode, TaskProps, Var, WaitMode};

use crate::instr::Instruction;

/// Index of a block in its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// Index of a continuation in its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContId(pub u32);

impl fmt::Display for ContId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cont{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    MainBlock,
    WaitBlock,
    ForeachBody,
    ThenBlock,
    ElseBlock,
}

/// A statement is an instruction or a structured continuation.
#[derive(Debug, Clone)]
pub enum Statement {
    Instruction(Instruction),
    Conditional(ContId),
}

/// An action run when a block's scope ends, releasing a resource tied to a
/// variable.
#[derive(Debug, Clone)]
pub struct CleanupAction {
    pub var: Var,
    pub action: Instruction,
}

/// The structured constructs that own nested blocks.
#[derive(Debug, Clone)]
pub enum ContKind {
    If {
        condition: Arg,
        has_else: bool,
    },
    Wait {
        name: String,
        wait_vars: Vec<Var>,
        mode: WaitMode,
        recursive: bool,
        task_mode: TaskMode,
        props: TaskProps,
    },
    Foreach {
        name: String,
        container: Var,
        member: Var,
        key: Option<Var>,
    },
}

#[derive(Debug, Clone)]
pub struct Continuation {
    pub id: ContId,
    pub parent: BlockId,
    pub kind: ContKind,
    pub blocks: Vec<BlockId>,
}

impl Continuation {
    /// Variables the construct itself defines for its body (a foreach
    /// loop's member and key).
    pub fn construct_defined_vars(&self) -> Vec<Var> {
        match &self.kind {
            ContKind::Foreach { member, key, .. } => {
                let mut vars = vec![member.clone()];
                vars.extend(key.clone());
                vars
            }
            _ => vec![],
        }
    }

    /// Variables the construct reads from the enclosing scope.
    pub fn required_vars(&self) -> Vec<Var> {
        match &self.kind {
            ContKind::If { condition, .. } => {
                condition.opt_var().cloned().into_iter().collect()
            }
            ContKind::Wait { wait_vars, props, .. } => {
                let mut vars = wait_vars.clone();
                vars.extend(props.values().filter_map(Arg::opt_var).cloned());
                vars
            }
            ContKind::Foreach { container, .. } => vec![container.clone()],
        }
    }

    fn label(&self) -> String {
        match &self.kind {
            ContKind::If { condition, has_else } => {
                format!("if {} has_else={}", condition, has_else)
            }
            ContKind::Wait {
                name,
                wait_vars,
                mode,
                recursive,
                task_mode,
                ..
            } => {
                let vars: Vec<&str> = wait_vars.iter().map(Var::name).collect();
                format!(
                    "wait {} [{}] mode={:?} recursive={} task={}",
                    name,
                    vars.join(" "),
                    mode,
                    recursive,
                    task_mode
                )
            }
            ContKind::Foreach {
                name,
                container,
                member,
                key,
            } => {
                let key_part = key
                    .as_ref()
                    .map(|k| format!(" @{}", k.name()))
                    .unwrap_or_default();
                format!(
                    "foreach {} {} in {}{}",
                    name,
                    member.name(),
                    container.name(),
                    key_part
                )
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub block_type: BlockType,
    /// The owning continuation; `None` only for the main block.
    pub parent: Option<ContId>,
    pub vars: Vec<Var>,
    pub statements: Vec<Statement>,
    pub cleanups: Vec<CleanupAction>,
}

impl Block {
    fn new(id: BlockId, block_type: BlockType, parent: Option<ContId>) -> Self {
        Self {
            id,
            block_type,
            parent,
            vars: Vec::new(),
            statements: Vec::new(),
            cleanups: Vec::new(),
        }
    }
}

/// A compiled function: argument lists plus the block arena.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub inputs: Vec<Var>,
    pub outputs: Vec<Var>,
    blocks: Vec<Block>,
    conts: Vec<Continuation>,
    /// Per input: whether a call to this function blocks on it.
    blocking_inputs: Vec<bool>,
    /// Per output: whether the function only writes it (never reads).
    output_write_only: Vec<bool>,
}

impl Function {
    pub fn new(name: impl Into<String>, inputs: Vec<Var>, outputs: Vec<Var>) -> Self {
        let blocking_inputs = vec![false; inputs.len()];
        let output_write_only = vec![false; outputs.len()];
        Self {
            name: name.into(),
            inputs,
            outputs,
            blocks: vec![Block::new(BlockId(0), BlockType::MainBlock, None)],
            conts: Vec::new(),
            blocking_inputs,
            output_write_only,
        }
    }

    pub fn main_block_id(&self) -> BlockId {
        BlockId(0)
    }

    pub fn main_block(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn cont(&self, id: ContId) -> &Continuation {
        &self.conts[id.0 as usize]
    }

    pub fn cont_mut(&mut self, id: ContId) -> &mut Continuation {
        &mut self.conts[id.0 as usize]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn continuations(&self) -> &[Continuation] {
        &self.conts
    }

    pub fn alloc_block(&mut self, block_type: BlockType, parent: ContId) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id, block_type, Some(parent)));
        self.conts[parent.0 as usize].blocks.push(id);
        id
    }

    pub fn alloc_cont(&mut self, parent: BlockId, kind: ContKind) -> ContId {
        let id = ContId(self.conts.len() as u32);
        self.conts.push(Continuation {
            id,
            parent,
            kind,
            blocks: Vec::new(),
        });
        id
    }

    pub fn blocking_input_vector(&self) -> &[bool] {
        &self.blocking_inputs
    }

    pub fn set_blocking_inputs(&mut self, blocking: Vec<bool>) {
        assert_eq!(blocking.len(), self.inputs.len());
        self.blocking_inputs = blocking;
    }

    pub fn is_output_write_only(&self, index: usize) -> bool {
        self.output_write_only.get(index).copied().unwrap_or(false)
    }

    pub fn set_output_write_only(&mut self, write_only: Vec<bool>) {
        assert_eq!(write_only.len(), self.outputs.len());
        self.output_write_only = write_only;
    }

    fn fmt_block(&self, f: &mut fmt::Formatter<'_>, id: BlockId, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        let block = self.block(id);
        for var in &block.vars {
            writeln!(f, "{}declare {}", pad, var)?;
        }
        for stmt in &block.statements {
            match stmt {
                Statement::Instruction(inst) => writeln!(f, "{}{}", pad, inst)?,
                Statement::Conditional(cont_id) => {
                    let cont = self.cont(*cont_id);
                    writeln!(f, "{}{} {{", pad, cont.label())?;
                    for (i, child) in cont.blocks.iter().enumerate() {
                        if i > 0 {
                            writeln!(f, "{}}} else {{", pad)?;
                        }
                        self.fmt_block(f, *child, indent + 1)?;
                    }
                    writeln!(f, "{}}}", pad)?;
                }
            }
        }
        for cleanup in &block.cleanups {
            writeln!(f, "{}cleanup {}: {}", pad, cleanup.var.name(), cleanup.action)?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ins: Vec<String> = self.inputs.iter().map(|v| v.to_string()).collect();
        let outs: Vec<String> = self.outputs.iter().map(|v| v.to_string()).collect();
        writeln!(f, "fn {} ({}) -> ({}) {{", self.name, ins.join(", "), outs.join(", "))?;
        self.fmt_block(f, self.main_block_id(), 1)?;
        writeln!(f, "}}")
    }
}

/// A whole compiled program.
#[derive(Debug)]
pub struct Program {
    pub functions: IndexMap<String, Function>,
    /// Global constants and their values.
    pub globals: IndexMap<String, (Var, Arg)>,
    pub foreign: ForeignRegistry,
}

impl Program {
    pub fn new(foreign: ForeignRegistry) -> Self {
        Self {
            functions: IndexMap::new(),
            globals: IndexMap::new(),
            foreign,
        }
    }

    pub fn add_function(&mut self, func: Function) {
        let name = func.name.clone();
        let previous = self.functions.insert(name.clone(), func);
        assert!(previous.is_none(), "function {} compiled twice", name);
    }

    pub fn lookup_function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn add_global(&mut self, var: Var, value: Arg) {
        self.globals.insert(var.name().to_string(), (var, value));
    }

    pub fn global_vars(&self) -> impl Iterator<Item = &Var> {
        self.globals.values().map(|(v, _)| v)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, (var, value)) in &self.globals {
            writeln!(f, "global {} {} = {}", name, var, value)?;
        }
        for func in self.functions.values() {
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_foundation::{Alloc, DefKind, PrimKind, Type};

    #[test]
    fn new_function_has_a_main_block() {
        let func = Function::new("main", vec![], vec![]);
        assert_eq!(func.main_block().block_type, BlockType::MainBlock);
        assert!(func.main_block().parent.is_none());
    }

    #[test]
    fn alloc_block_links_parents_both_ways() {
        let mut func = Function::new("f", vec![], vec![]);
        let cont = func.alloc_cont(
            func.main_block_id(),
            ContKind::If {
                condition: Arg::bool_lit(true),
                has_else: false,
            },
        );
        let block = func.alloc_block(BlockType::ThenBlock, cont);
        assert_eq!(func.block(block).parent, Some(cont));
        assert_eq!(func.cont(cont).blocks, vec![block]);
        assert_eq!(func.cont(cont).parent, func.main_block_id());
    }

    #[test]
    fn foreach_defines_member_and_key() {
        let container = Var::new(
            "arr",
            Type::array(Type::future(PrimKind::Int), Type::future(PrimKind::Int)),
            Alloc::Stack,
            DefKind::LocalUser,
        );
        let member = Var::new(
            "m",
            Type::future(PrimKind::Int),
            Alloc::Alias,
            DefKind::LocalCompiler,
        );
        let key = Var::new(
            "k",
            Type::value(PrimKind::Int),
            Alloc::Local,
            DefKind::LocalCompiler,
        );
        let mut func = Function::new("f", vec![], vec![]);
        let cont = func.alloc_cont(
            func.main_block_id(),
            ContKind::Foreach {
                name: "copy".into(),
                container,
                member: member.clone(),
                key: Some(key.clone()),
            },
        );
        assert_eq!(func.cont(cont).construct_defined_vars(), vec![member, key]);
    }
}
