//! The IR instruction model.
//!
//! Each instruction is responsible for reporting particular information
//! about itself: what it reads and writes, what it blocks on, what task it
//! spawns, and how it responds to the optimizer's transformation requests.
//! Instructions are a tagged union over opcode families; queries with
//! family-specific behaviour live on the family structs, defaults on the
//! union.

mod builtin;
mod call;
mod engine;
mod external;
mod loops;

pub use builtin::Builtin;
pub use call::{FunctionCall, LocalFunctionCall};
pub use engine::EngineOp;
pub use external::RunExternal;
pub use loops::{LoopBreak, LoopContinue};

use std::fmt;

use indexmap::{IndexMap, IndexSet};

use rill_foundation::{
    Arg, Counters, ForeignRegistry, RefCountKind, Settings, TaskMode, TaskProps, Type, Var,
};

use crate::opt::computed::{CvMap, ResultVal};
use crate::tree::Program;

/// Every opcode of the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Pseudo-opcode for computed values without a real instruction.
    Fake,
    Comment,
    // calls
    CallForeign,
    CallForeignLocal,
    CallControl,
    CallSync,
    CallLocal,
    CallLocalControl,
    RunExternal,
    // loops
    LoopContinue,
    LoopBreak,
    // operators
    LocalOp,
    AsyncOp,
    // stores
    StoreInt,
    StoreFloat,
    StoreBool,
    StoreString,
    StoreBlob,
    StoreVoid,
    StoreFile,
    StoreRef,
    StoreArray,
    StoreBag,
    StoreRecursive,
    // loads
    LoadInt,
    LoadFloat,
    LoadBool,
    LoadString,
    LoadBlob,
    LoadVoid,
    LoadFile,
    LoadRef,
    LoadArray,
    LoadBag,
    LoadRecursive,
    // dereferences
    DerefInt,
    DerefFloat,
    DerefBool,
    DerefString,
    DerefBlob,
    DerefFile,
    // arrays
    ArrayLookupFuture,
    ArrayRefLookupFuture,
    ArrayLookupRefImm,
    ArrayRefLookupImm,
    ArrayLookupImm,
    ArrayInsertFuture,
    ArrayRefInsertFuture,
    ArrayInsertImm,
    ArrayRefInsertImm,
    ArrayBuild,
    // structs
    StructLookup,
    StructRefLookup,
    StructInsert,
    // refs and bags
    CopyRef,
    BagInsert,
    // updateables
    InitUpdateableFloat,
    UpdateMin,
    UpdateIncr,
    UpdateScale,
    UpdateMinImm,
    UpdateIncrImm,
    UpdateScaleImm,
    LatestValue,
    // files
    GetFilename,
    GetFilenameVal,
    SetFilenameVal,
    GetLocalFilename,
    ChooseTmpFilename,
    InitLocalOutputFile,
    IsMapped,
    CopyFileContents,
    DecrLocalFileRef,
    // blobs
    FreeBlob,
    // refcounts
    IncrRef,
    DecrRef,
    IncrWriters,
    DecrWriters,
    // checkpoints
    CheckpointLookupEnabled,
    CheckpointWriteEnabled,
    LookupCheckpoint,
    WriteCheckpoint,
    PackValues,
    UnpackValues,
}

impl Opcode {
    pub fn is_refcount_op(self) -> bool {
        matches!(
            self,
            Opcode::IncrRef | Opcode::DecrRef | Opcode::IncrWriters | Opcode::DecrWriters
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let debug = format!("{:?}", self);
        let mut out = String::with_capacity(debug.len() + 4);
        for (i, ch) in debug.chars().enumerate() {
            if ch.is_ascii_uppercase() {
                if i > 0 {
                    out.push('_');
                }
                out.push(ch.to_ascii_lowercase());
            } else {
                out.push(ch);
            }
        }
        write!(f, "{}", out)
    }
}

/// How a variable substitution applies to an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameMode {
    /// Replace the variable everywhere it occurs.
    ReplaceVar,
    /// Replace references, including output positions.
    Reference,
    /// Replace only value reads; output positions keep their variable.
    Value,
}

/// How completely an instruction initializes a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitType {
    /// One of several initialization steps.
    Partial,
    /// Fully initializes the variable.
    Full,
}

/// A request from `can_make_immediate`: which inputs to fetch and which
/// outputs need value variables before `make_immediate` runs.
#[derive(Debug, Clone)]
pub struct MakeImmRequest {
    pub out: Vec<Var>,
    pub input_vars: Vec<Var>,
    /// Where the immediate code should run.
    pub mode: TaskMode,
    /// Whether inputs must be recursively closed.
    pub recursive_close: bool,
    /// Whether output file variables should have mappings initialized.
    pub map_out_vars: bool,
}

impl MakeImmRequest {
    pub fn new(out: Vec<Var>, input_vars: Vec<Var>) -> Self {
        Self {
            out,
            input_vars,
            mode: TaskMode::Local,
            recursive_close: false,
            map_out_vars: true,
        }
    }
}

/// The replacement produced by `make_immediate`.
#[derive(Debug, Clone)]
pub struct MakeImmChange {
    /// Set when the output variable changed, as (new, old).
    pub swapped_out: Option<(Var, Var)>,
    /// Whether the caller must store fetched output values back.
    pub store_output_vals: bool,
    pub new_instructions: Vec<Instruction>,
}

impl MakeImmChange {
    pub fn replace(inst: Instruction) -> Self {
        Self {
            swapped_out: None,
            store_output_vals: true,
            new_instructions: vec![inst],
        }
    }

    pub fn replace_all(insts: Vec<Instruction>) -> Self {
        Self {
            swapped_out: None,
            store_output_vals: true,
            new_instructions: insts,
        }
    }
}

/// Pairs a variable with its fetched value or value variable.
#[derive(Debug, Clone)]
pub struct Fetched<V> {
    pub original: Var,
    pub fetched: V,
}

impl<V: Clone> Fetched<V> {
    pub fn new(original: Var, fetched: V) -> Self {
        Self { original, fetched }
    }

    pub fn make_list(originals: &[Var], fetched: &[V]) -> Vec<Fetched<V>> {
        assert_eq!(originals.len(), fetched.len());
        originals
            .iter()
            .cloned()
            .zip(fetched.iter().cloned())
            .map(|(original, fetched)| Fetched { original, fetched })
            .collect()
    }

    pub fn values(list: &[Fetched<V>]) -> Vec<V> {
        list.iter().map(|f| f.fetched.clone()).collect()
    }

    pub fn find(list: &[Fetched<V>], var: &Var) -> Option<V> {
        list.iter()
            .find(|f| &f.original == var)
            .map(|f| f.fetched.clone())
    }
}

/// An output that aliases part of another variable, so that writing the
/// output writes the whole.
#[derive(Debug, Clone)]
pub struct ComponentAlias {
    pub whole: Var,
    pub part: Var,
}

/// Whether the type carries a side channel readable before the main value
/// closes (a file's filename).
pub(crate) fn has_readable_side_channel(ty: &Type) -> bool {
    ty.is_file()
}

/// A single IR instruction.
#[derive(Debug, Clone)]
pub enum Instruction {
    Comment(Comment),
    FunctionCall(FunctionCall),
    LocalFunctionCall(LocalFunctionCall),
    RunExternal(RunExternal),
    LoopContinue(LoopContinue),
    LoopBreak(LoopBreak),
    Builtin(Builtin),
    Engine(EngineOp),
}

impl Instruction {
    pub fn op(&self) -> Opcode {
        match self {
            Instruction::Comment(_) => Opcode::Comment,
            Instruction::FunctionCall(i) => i.op(),
            Instruction::LocalFunctionCall(_) => Opcode::CallForeignLocal,
            Instruction::RunExternal(_) => Opcode::RunExternal,
            Instruction::LoopContinue(_) => Opcode::LoopContinue,
            Instruction::LoopBreak(_) => Opcode::LoopBreak,
            Instruction::Builtin(i) => i.op(),
            Instruction::Engine(i) => i.op(),
        }
    }

    /// All values the instruction reads, task properties included.
    pub fn inputs(&self) -> Vec<Arg> {
        match self {
            Instruction::Comment(_) => vec![],
            Instruction::FunctionCall(i) => i.inputs(),
            Instruction::LocalFunctionCall(i) => i.inputs().to_vec(),
            Instruction::RunExternal(i) => i.inputs(),
            Instruction::LoopContinue(i) => i.inputs(),
            Instruction::LoopBreak(_) => vec![],
            Instruction::Builtin(i) => i.inputs(),
            Instruction::Engine(i) => i.inputs().to_vec(),
        }
    }

    /// All variables the instruction may mutate.
    pub fn outputs(&self) -> Vec<Var> {
        match self {
            Instruction::Comment(_) | Instruction::LoopContinue(_) | Instruction::LoopBreak(_) => {
                vec![]
            }
            Instruction::FunctionCall(i) => i.outputs().to_vec(),
            Instruction::LocalFunctionCall(i) => i.outputs().to_vec(),
            Instruction::RunExternal(i) => i.outputs().to_vec(),
            Instruction::Builtin(i) => i.outputs(),
            Instruction::Engine(i) => i.outputs().to_vec(),
        }
    }

    /// Outputs that are actually mutated; dead-code elimination may drop an
    /// instruction whose modified outputs are all unused.
    pub fn modified_outputs(&self) -> Vec<Var> {
        self.outputs()
    }

    /// Outputs whose prior value is read (a mapped file's filename).
    pub fn read_outputs(&self, prog: Option<&Program>) -> Vec<Var> {
        match self {
            Instruction::FunctionCall(i) => i.read_outputs(prog),
            _ => vec![],
        }
    }

    /// Variables this instruction initializes.
    pub fn initialized(&self, foreign: &ForeignRegistry) -> Vec<(Var, InitType)> {
        match self {
            Instruction::LocalFunctionCall(i) => i.initialized(foreign),
            Instruction::Engine(i) => i.initialized(),
            _ => vec![],
        }
    }

    pub fn is_initialized(&self, var: &Var, foreign: &ForeignRegistry) -> bool {
        self.initialized(foreign).iter().any(|(v, _)| v == var)
    }

    /// Outputs closed immediately after the instruction returns.
    pub fn closed_outputs(&self, foreign: &ForeignRegistry) -> Vec<Var> {
        match self {
            Instruction::LocalFunctionCall(i) => i.closed_outputs(foreign),
            Instruction::RunExternal(i) => i.outputs().to_vec(),
            Instruction::Engine(i) => i.closed_outputs(),
            _ => vec![],
        }
    }

    /// Outputs assigned piecewise (containers filled by inserts).
    pub fn piecewise_assigned_outputs(&self) -> Vec<Var> {
        match self {
            Instruction::Engine(i) => i.piecewise_assigned_outputs(),
            _ => vec![],
        }
    }

    /// The futures the scheduler must wait on before firing this
    /// instruction's task.
    pub fn blocking_inputs(&self, prog: &Program) -> Vec<Var> {
        match self {
            Instruction::Comment(_) | Instruction::LoopBreak(_) | Instruction::LoopContinue(_) => {
                vec![]
            }
            Instruction::FunctionCall(i) => i.blocking_inputs(prog),
            Instruction::LocalFunctionCall(_) => vec![],
            Instruction::RunExternal(i) => i.blocking_inputs(),
            Instruction::Builtin(i) => i.blocking_inputs(),
            Instruction::Engine(i) => i.blocking_inputs(),
        }
    }

    /// The variety of task this instruction spawns, `Sync` for none.
    pub fn mode(&self, foreign: &ForeignRegistry) -> TaskMode {
        match self {
            Instruction::Comment(_) | Instruction::LoopBreak(_) => TaskMode::Sync,
            Instruction::FunctionCall(i) => i.mode(foreign),
            Instruction::LocalFunctionCall(_) => TaskMode::Sync,
            Instruction::RunExternal(_) => TaskMode::Sync,
            Instruction::LoopContinue(_) => TaskMode::Control,
            Instruction::Builtin(i) => i.mode(),
            Instruction::Engine(i) => i.mode(),
        }
    }

    /// Task properties of the spawned task, if any.
    pub fn task_props(&self) -> Option<&TaskProps> {
        match self {
            Instruction::FunctionCall(i) => Some(i.props()),
            Instruction::Builtin(i) => i.props(),
            _ => None,
        }
    }

    /// Whether reordering or eliding the instruction changes observable
    /// behaviour.
    pub fn has_side_effects(&self, foreign: &ForeignRegistry) -> bool {
        match self {
            Instruction::Comment(_) => false,
            Instruction::FunctionCall(i) => i.has_side_effects(foreign),
            Instruction::LocalFunctionCall(i) => i.has_side_effects(foreign),
            Instruction::RunExternal(i) => i.has_side_effects(),
            Instruction::LoopContinue(_) | Instruction::LoopBreak(_) => true,
            Instruction::Builtin(i) => i.has_side_effects(),
            Instruction::Engine(i) => i.has_side_effects(),
        }
    }

    /// Whether it is safe to change the instruction's timing relative to
    /// other tasks.
    pub fn can_change_timing(&self, foreign: &ForeignRegistry) -> bool {
        !self.has_side_effects(foreign)
    }

    /// Whether repeated execution is equivalent to executing once.
    pub fn is_idempotent(&self) -> bool {
        match self {
            Instruction::Engine(i) => i.is_idempotent(),
            _ => false,
        }
    }

    pub fn writes_alias_var(&self) -> bool {
        self.outputs()
            .iter()
            .any(|o| o.alloc() == rill_foundation::Alloc::Alias)
    }

    pub fn writes_mapped_var(&self) -> bool {
        self.outputs().iter().any(|o| o.mapping().is_some())
    }

    /// Try to replace every output with a constant. Returns the map of
    /// constant outputs, or `None` if folding is not possible.
    pub fn constant_fold(
        &mut self,
        fn_name: &str,
        known: &IndexMap<Var, Arg>,
        foreign: &ForeignRegistry,
        settings: &Settings,
    ) -> Option<IndexMap<Var, Arg>> {
        match self {
            Instruction::FunctionCall(i) => i.constant_fold(known, foreign, settings),
            Instruction::LocalFunctionCall(i) => i.constant_fold(known, foreign, settings),
            Instruction::RunExternal(i) => {
                i.replace_known_args(known);
                None
            }
            Instruction::Builtin(i) => i.constant_fold(fn_name, known),
            _ => None,
        }
    }

    /// Try to replace this instruction with a simpler one using known
    /// constants (short-circuited and/or becomes a copy).
    pub fn constant_replace(&self, known: &IndexMap<Var, Arg>) -> Option<Instruction> {
        match self {
            Instruction::Builtin(i) => i.constant_replace(known),
            _ => None,
        }
    }

    /// If the instruction's async futures have known values, report which
    /// inputs to fetch and which outputs to materialize.
    pub fn can_make_immediate(
        &mut self,
        closed: &IndexSet<Var>,
        wait_for_close: bool,
        foreign: &ForeignRegistry,
    ) -> Option<MakeImmRequest> {
        match self {
            Instruction::FunctionCall(i) => i.can_make_immediate(closed, wait_for_close, foreign),
            Instruction::LoopContinue(i) => i.can_make_immediate(closed),
            Instruction::Builtin(i) => i.can_make_immediate(closed, wait_for_close),
            Instruction::Engine(i) => i.can_make_immediate(closed, wait_for_close),
            _ => None,
        }
    }

    /// Replace this instruction with its synchronous local-value form.
    pub fn make_immediate(
        &self,
        out_vals: &[Fetched<Var>],
        in_vals: &[Fetched<Arg>],
        foreign: &ForeignRegistry,
    ) -> MakeImmChange {
        match self {
            Instruction::FunctionCall(i) => i.make_immediate(out_vals, in_vals, foreign),
            Instruction::Builtin(i) => i.make_immediate(out_vals, in_vals),
            Instruction::Engine(i) => i.make_immediate(out_vals, in_vals),
            other => panic!("make_immediate not valid on {}", other.op()),
        }
    }

    /// Computed values this instruction publishes for common-subexpression
    /// elimination. `None` when two executions are not equivalent.
    pub fn results(
        &self,
        existing: &dyn CvMap,
        foreign: &ForeignRegistry,
        settings: &Settings,
    ) -> Option<Vec<ResultVal>> {
        match self {
            Instruction::FunctionCall(i) => i.results(foreign),
            Instruction::LocalFunctionCall(i) => i.results(foreign),
            Instruction::RunExternal(i) => i.results(),
            Instruction::Builtin(i) => i.results(existing, settings),
            Instruction::Engine(i) => i.results(),
            _ => None,
        }
    }

    /// Refcounts this instruction claims: (read increments, write
    /// increments). Reads are drawn from inputs and outputs, writes from
    /// outputs only.
    pub fn incr_vars(&self, prog: &Program) -> (Vec<Var>, Vec<Var>) {
        match self {
            Instruction::FunctionCall(i) => i.incr_vars(prog),
            Instruction::LocalFunctionCall(i) => (vec![], i.write_incr_vars(&prog.foreign)),
            Instruction::LoopContinue(i) => (i.read_incr_vars(), vec![]),
            Instruction::Builtin(i) => (i.read_incr_vars(), vec![]),
            Instruction::Engine(i) => i.incr_vars(),
            _ => (vec![], vec![]),
        }
    }

    /// Absorb pending refcount deltas into this instruction. Returns the
    /// variables whose deltas were absorbed.
    pub fn try_piggyback(
        &mut self,
        counters: &mut Counters<Var>,
        kind: RefCountKind,
    ) -> Vec<Var> {
        match self {
            Instruction::Engine(i) => i.try_piggyback(counters, kind),
            _ => vec![],
        }
    }

    /// Whether an output aliases part of another variable.
    pub fn component_alias(&self) -> Option<ComponentAlias> {
        match self {
            Instruction::Engine(i) => i.component_alias(),
            _ => None,
        }
    }

    /// Substitute variables according to the rename mode.
    pub fn rename_vars(&mut self, renames: &IndexMap<Var, Arg>, mode: RenameMode) {
        match self {
            Instruction::Comment(_) | Instruction::LoopBreak(_) => {}
            Instruction::FunctionCall(i) => i.rename_vars(renames, mode),
            Instruction::LocalFunctionCall(i) => i.rename_vars(renames, mode),
            Instruction::RunExternal(i) => i.rename_vars(renames, mode),
            Instruction::LoopContinue(i) => i.rename_vars(renames, mode),
            Instruction::Builtin(i) => i.rename_vars(renames, mode),
            Instruction::Engine(i) => i.rename_vars(renames, mode),
        }
    }

    pub fn comment(text: impl Into<String>) -> Instruction {
        Instruction::Comment(Comment { text: text.into() })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Comment(c) => write!(f, "# {}", c.text),
            Instruction::FunctionCall(i) => write!(f, "{}", i),
            Instruction::LocalFunctionCall(i) => write!(f, "{}", i),
            Instruction::RunExternal(i) => write!(f, "{}", i),
            Instruction::LoopContinue(i) => write!(f, "{}", i),
            Instruction::LoopBreak(i) => write!(f, "{}", i),
            Instruction::Builtin(i) => write!(f, "{}", i),
            Instruction::Engine(i) => write!(f, "{}", i),
        }
    }
}

/// A no-op carrier for human-readable diagnostics.
#[derive(Debug, Clone)]
pub struct Comment {
    pub text: String,
}

// --- shared rename helpers ---

pub(crate) fn replace_args(renames: &IndexMap<Var, Arg>, args: &mut [Arg]) {
    for arg in args.iter_mut() {
        if let Arg::Var(v) = arg {
            if let Some(replacement) = renames.get(v) {
                *arg = replacement.clone();
            }
        }
    }
}

pub(crate) fn replace_vars(renames: &IndexMap<Var, Arg>, vars: &mut [Var]) {
    for var in vars.iter_mut() {
        if let Some(replacement) = renames.get(var) {
            match replacement {
                Arg::Var(v) => *var = v.clone(),
                Arg::Const(c) => {
                    panic!("cannot substitute constant {} into a variable position", c)
                }
            }
        }
    }
}

pub(crate) fn output_positions_renamed(mode: RenameMode) -> bool {
    matches!(mode, RenameMode::ReplaceVar | RenameMode::Reference)
}

// --- helpers for forming common data-movement instructions ---

/// Assignment of a value into a future: the store opcode for a type.
pub fn assign_opcode(dst_type: &Type) -> Opcode {
    use rill_foundation::PrimKind::*;
    if dst_type.is_ref() {
        return Opcode::StoreRef;
    }
    if dst_type.is_array() {
        return Opcode::StoreArray;
    }
    if dst_type.is_bag() {
        return Opcode::StoreBag;
    }
    match dst_type.prim_kind() {
        Some(Int) => Opcode::StoreInt,
        Some(Float) => Opcode::StoreFloat,
        Some(Bool) => Opcode::StoreBool,
        Some(Str) => Opcode::StoreString,
        Some(Blob) => Opcode::StoreBlob,
        Some(Void) => Opcode::StoreVoid,
        Some(File) => Opcode::StoreFile,
        None => panic!("no store opcode for type {}", dst_type),
    }
}

/// Retrieval of a future into a value: the load opcode for a type.
pub fn retrieve_opcode(src_type: &Type) -> Opcode {
    use rill_foundation::PrimKind::*;
    if src_type.is_ref() {
        return Opcode::LoadRef;
    }
    if src_type.is_array() {
        return Opcode::LoadArray;
    }
    if src_type.is_bag() {
        return Opcode::LoadBag;
    }
    match src_type.prim_kind() {
        Some(Int) => Opcode::LoadInt,
        Some(Float) => Opcode::LoadFloat,
        Some(Bool) => Opcode::LoadBool,
        Some(Str) => Opcode::LoadString,
        Some(Blob) => Opcode::LoadBlob,
        Some(Void) => Opcode::LoadVoid,
        Some(File) => Opcode::LoadFile,
        None => panic!("no load opcode for type {}", src_type),
    }
}

/// The dereference opcode for a reference type.
pub fn deref_opcode(ref_type: &Type) -> Opcode {
    use rill_foundation::PrimKind::*;
    let Type::Ref(inner) = ref_type else {
        panic!("cannot dereference non-reference type {}", ref_type);
    };
    match inner.prim_kind() {
        Some(Int) => Opcode::DerefInt,
        Some(Float) => Opcode::DerefFloat,
        Some(Bool) => Opcode::DerefBool,
        Some(Str) => Opcode::DerefString,
        Some(Blob) => Opcode::DerefBlob,
        Some(File) => Opcode::DerefFile,
        _ => panic!("cannot dereference reference to {}", inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_foundation::{Alloc, DefKind, PrimKind};

    fn fut(name: &str, kind: PrimKind) -> Var {
        Var::new(name, Type::future(kind), Alloc::Temp, DefKind::LocalCompiler)
    }

    #[test]
    fn opcode_display_is_snake_case() {
        assert_eq!(Opcode::ArrayLookupRefImm.to_string(), "array_lookup_ref_imm");
        assert_eq!(Opcode::AsyncOp.to_string(), "async_op");
    }

    #[test]
    fn assign_and_retrieve_opcodes_are_inverses_by_kind() {
        let t = Type::future(PrimKind::Int);
        assert_eq!(assign_opcode(&t), Opcode::StoreInt);
        assert_eq!(retrieve_opcode(&t), Opcode::LoadInt);
        let r = Type::reference(t);
        assert_eq!(assign_opcode(&r), Opcode::StoreRef);
        assert_eq!(retrieve_opcode(&r), Opcode::LoadRef);
        assert_eq!(deref_opcode(&r), Opcode::DerefInt);
    }

    #[test]
    fn comment_is_inert() {
        let foreign = ForeignRegistry::new();
        let c = Instruction::comment("note");
        assert!(c.inputs().is_empty());
        assert!(c.outputs().is_empty());
        assert!(!c.has_side_effects(&foreign));
        assert_eq!(c.mode(&foreign), TaskMode::Sync);
    }

    #[test]
    fn writes_alias_flag_tracks_outputs() {
        let alias = Var::new(
            "alias1",
            Type::future(PrimKind::Int),
            Alloc::Alias,
            DefKind::LocalCompiler,
        );
        let inst = EngineOp::copy_ref(alias.clone(), fut("s", PrimKind::Int));
        assert!(inst.writes_alias_var());
    }
}
