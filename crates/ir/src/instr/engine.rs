//! Engine data-movement primitives.
//!
//! Thin fixed-arity operations the flume engine executes directly: stores
//! and loads of futures, dereferences, array and struct access, refcount
//! adjustments, file and checkpoint plumbing. Each publishes a computed
//! value keyed on its opcode and canonical inputs so redundant loads and
//! lookups can be eliminated.

use std::fmt;

use indexmap::{IndexMap, IndexSet};

use rill_foundation::{
    has_read_refcount, has_write_refcount, Arg, BuiltinOp, Const, Counters, RefCountKind,
    TaskMode, TaskProps, Var,
};

use crate::opt::computed::{ComputedValue, ResultVal};

use super::{
    assign_opcode, deref_opcode, output_positions_renamed, replace_args, replace_vars,
    retrieve_opcode, Builtin, ComponentAlias, Fetched, InitType, Instruction, MakeImmChange,
    MakeImmRequest, Opcode, RenameMode,
};

/// A single engine primitive.
#[derive(Debug, Clone)]
pub struct EngineOp {
    op: Opcode,
    outputs: Vec<Var>,
    inputs: Vec<Arg>,
}

impl EngineOp {
    fn make(op: Opcode, outputs: Vec<Var>, inputs: Vec<Arg>) -> Instruction {
        Instruction::Engine(Self {
            op,
            outputs,
            inputs,
        })
    }

    /// Assign a value into a future; the opcode follows the destination
    /// type (scalar, file, ref, array, bag).
    pub fn store(dst: Var, src: Arg) -> Instruction {
        let op = assign_opcode(dst.ty());
        Self::make(op, vec![dst], vec![src])
    }

    pub fn store_recursive(dst: Var, src: Arg) -> Instruction {
        Self::make(Opcode::StoreRecursive, vec![dst], vec![src])
    }

    /// Retrieve a closed future into a value; the opcode follows the
    /// source type.
    pub fn load(dst: Var, src: Var) -> Instruction {
        let op = retrieve_opcode(src.ty());
        Self::make(op, vec![dst], vec![src.as_arg()])
    }

    pub fn load_recursive(dst: Var, src: Var) -> Instruction {
        Self::make(Opcode::LoadRecursive, vec![dst], vec![src.as_arg()])
    }

    /// Dereference into a future: dst = *src.
    pub fn deref(dst: Var, src: Var) -> Instruction {
        let op = deref_opcode(src.ty());
        Self::make(op, vec![dst], vec![src.as_arg()])
    }

    pub fn array_lookup_ref_imm(
        dst: Var,
        array: Var,
        index: Arg,
        array_is_ref: bool,
    ) -> Instruction {
        let op = if array_is_ref {
            Opcode::ArrayRefLookupImm
        } else {
            Opcode::ArrayLookupRefImm
        };
        Self::make(op, vec![dst], vec![array.as_arg(), index])
    }

    pub fn array_lookup_future(
        dst: Var,
        array: Var,
        index: Var,
        array_is_ref: bool,
    ) -> Instruction {
        let op = if array_is_ref {
            Opcode::ArrayRefLookupFuture
        } else {
            Opcode::ArrayLookupFuture
        };
        Self::make(op, vec![dst], vec![array.as_arg(), index.as_arg()])
    }

    /// Direct member alias lookup in a closed array.
    pub fn array_lookup_imm(dst: Var, array: Var, index: Arg) -> Instruction {
        Self::make(Opcode::ArrayLookupImm, vec![dst], vec![array.as_arg(), index])
    }

    pub fn array_insert_imm(array: Var, index: Arg, member: Var) -> Instruction {
        Self::make(
            Opcode::ArrayInsertImm,
            vec![array],
            vec![index, member.as_arg()],
        )
    }

    pub fn array_insert_future(array: Var, index: Var, member: Var) -> Instruction {
        Self::make(
            Opcode::ArrayInsertFuture,
            vec![array],
            vec![index.as_arg(), member.as_arg()],
        )
    }

    pub fn array_build(array: Var, keys: Vec<Arg>, vals: Vec<Var>) -> Instruction {
        assert_eq!(keys.len(), vals.len());
        let mut inputs = keys;
        inputs.extend(vals.iter().map(Var::as_arg));
        Self::make(Opcode::ArrayBuild, vec![array], inputs)
    }

    pub fn bag_insert(bag: Var, member: Var) -> Instruction {
        Self::make(Opcode::BagInsert, vec![bag], vec![member.as_arg()])
    }

    pub fn struct_lookup(dst: Var, struct_var: Var, field: &str) -> Instruction {
        Self::make(
            Opcode::StructLookup,
            vec![dst],
            vec![struct_var.as_arg(), Arg::string_lit(field)],
        )
    }

    pub fn struct_ref_lookup(dst: Var, struct_var: Var, field: &str) -> Instruction {
        Self::make(
            Opcode::StructRefLookup,
            vec![dst],
            vec![struct_var.as_arg(), Arg::string_lit(field)],
        )
    }

    pub fn copy_ref(dst: Var, src: Var) -> Instruction {
        Self::make(Opcode::CopyRef, vec![dst], vec![src.as_arg()])
    }

    pub fn latest_value(dst: Var, updateable: Var) -> Instruction {
        Self::make(Opcode::LatestValue, vec![dst], vec![updateable.as_arg()])
    }

    pub fn init_updateable_float(dst: Var, init: Arg) -> Instruction {
        Self::make(Opcode::InitUpdateableFloat, vec![dst], vec![init])
    }

    pub fn update(op: Opcode, updateable: Var, value: Arg) -> Instruction {
        assert!(matches!(
            op,
            Opcode::UpdateMin
                | Opcode::UpdateIncr
                | Opcode::UpdateScale
                | Opcode::UpdateMinImm
                | Opcode::UpdateIncrImm
                | Opcode::UpdateScaleImm
        ));
        Self::make(op, vec![updateable], vec![value])
    }

    pub fn get_filename(dst: Var, file: Var) -> Instruction {
        Self::make(Opcode::GetFilename, vec![dst], vec![file.as_arg()])
    }

    pub fn get_filename_val(dst: Var, file: Var) -> Instruction {
        Self::make(Opcode::GetFilenameVal, vec![dst], vec![file.as_arg()])
    }

    pub fn set_filename_val(file: Var, filename: Arg) -> Instruction {
        Self::make(Opcode::SetFilenameVal, vec![file], vec![filename])
    }

    pub fn get_local_filename(dst: Var, file_val: Var) -> Instruction {
        Self::make(Opcode::GetLocalFilename, vec![dst], vec![file_val.as_arg()])
    }

    pub fn choose_tmp_filename(dst: Var) -> Instruction {
        Self::make(Opcode::ChooseTmpFilename, vec![dst], vec![])
    }

    pub fn init_local_output_file(dst: Var, filename: Arg) -> Instruction {
        Self::make(Opcode::InitLocalOutputFile, vec![dst], vec![filename])
    }

    pub fn is_mapped(dst: Var, file: Var) -> Instruction {
        Self::make(Opcode::IsMapped, vec![dst], vec![file.as_arg()])
    }

    pub fn copy_file_contents(dst: Var, src: Var) -> Instruction {
        Self::make(Opcode::CopyFileContents, vec![dst], vec![src.as_arg()])
    }

    pub fn decr_local_file_ref(file_val: Var) -> Instruction {
        Self::make(Opcode::DecrLocalFileRef, vec![], vec![file_val.as_arg()])
    }

    pub fn free_blob(blob: Var) -> Instruction {
        Self::make(Opcode::FreeBlob, vec![], vec![blob.as_arg()])
    }

    pub fn refcount(op: Opcode, var: Var, amount: i64) -> Instruction {
        assert!(op.is_refcount_op());
        Self::make(op, vec![], vec![var.as_arg(), Arg::int_lit(amount)])
    }

    pub fn checkpoint_lookup_enabled(dst: Var) -> Instruction {
        Self::make(Opcode::CheckpointLookupEnabled, vec![dst], vec![])
    }

    pub fn checkpoint_write_enabled(dst: Var) -> Instruction {
        Self::make(Opcode::CheckpointWriteEnabled, vec![dst], vec![])
    }

    pub fn lookup_checkpoint(exists: Var, val: Var, key: Arg) -> Instruction {
        Self::make(Opcode::LookupCheckpoint, vec![exists, val], vec![key])
    }

    pub fn write_checkpoint(key: Arg, val: Arg) -> Instruction {
        Self::make(Opcode::WriteCheckpoint, vec![], vec![key, val])
    }

    pub fn pack_values(dst: Var, inputs: Vec<Arg>) -> Instruction {
        Self::make(Opcode::PackValues, vec![dst], inputs)
    }

    pub fn unpack_values(dsts: Vec<Var>, src: Var) -> Instruction {
        Self::make(Opcode::UnpackValues, dsts, vec![src.as_arg()])
    }

    pub fn op(&self) -> Opcode {
        self.op
    }

    pub fn inputs(&self) -> &[Arg] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Var] {
        &self.outputs
    }

    /// Whether the operation spawns a task gated on its future inputs.
    fn spawns(&self) -> bool {
        matches!(
            self.op,
            Opcode::DerefInt
                | Opcode::DerefFloat
                | Opcode::DerefBool
                | Opcode::DerefString
                | Opcode::DerefBlob
                | Opcode::DerefFile
                | Opcode::ArrayLookupFuture
                | Opcode::ArrayRefLookupFuture
                | Opcode::ArrayRefLookupImm
                | Opcode::ArrayInsertFuture
                | Opcode::ArrayRefInsertFuture
                | Opcode::ArrayRefInsertImm
                | Opcode::StructRefLookup
                | Opcode::UpdateMin
                | Opcode::UpdateIncr
                | Opcode::UpdateScale
        )
    }

    pub fn mode(&self) -> TaskMode {
        if self.spawns() {
            TaskMode::Local
        } else {
            TaskMode::Sync
        }
    }

    pub fn blocking_inputs(&self) -> Vec<Var> {
        if !self.spawns() {
            return vec![];
        }
        self.inputs
            .iter()
            .filter_map(Arg::opt_var)
            .filter(|v| v.ty().is_prim_future() || v.ty().is_ref())
            .cloned()
            .collect()
    }

    pub fn has_side_effects(&self) -> bool {
        matches!(
            self.op,
            Opcode::ArrayInsertFuture
                | Opcode::ArrayRefInsertFuture
                | Opcode::ArrayInsertImm
                | Opcode::ArrayRefInsertImm
                | Opcode::BagInsert
                | Opcode::StructInsert
                | Opcode::UpdateMin
                | Opcode::UpdateIncr
                | Opcode::UpdateScale
                | Opcode::UpdateMinImm
                | Opcode::UpdateIncrImm
                | Opcode::UpdateScaleImm
                | Opcode::SetFilenameVal
                | Opcode::ChooseTmpFilename
                | Opcode::CopyFileContents
                | Opcode::DecrLocalFileRef
                | Opcode::FreeBlob
                | Opcode::IncrRef
                | Opcode::DecrRef
                | Opcode::IncrWriters
                | Opcode::DecrWriters
                | Opcode::WriteCheckpoint
        )
    }

    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.op,
            Opcode::StoreInt
                | Opcode::StoreFloat
                | Opcode::StoreBool
                | Opcode::StoreString
                | Opcode::StoreBlob
                | Opcode::StoreVoid
                | Opcode::StoreFile
                | Opcode::StoreRef
                | Opcode::StoreArray
                | Opcode::StoreBag
                | Opcode::StoreRecursive
                | Opcode::UpdateMin
                | Opcode::UpdateMinImm
                | Opcode::InitUpdateableFloat
                | Opcode::InitLocalOutputFile
        )
    }

    pub fn initialized(&self) -> Vec<(Var, InitType)> {
        match self.op {
            Opcode::InitUpdateableFloat | Opcode::InitLocalOutputFile => {
                vec![(self.outputs[0].clone(), InitType::Full)]
            }
            Opcode::ChooseTmpFilename => vec![(self.outputs[0].clone(), InitType::Full)],
            _ => vec![],
        }
    }

    pub fn closed_outputs(&self) -> Vec<Var> {
        match self.op {
            Opcode::StoreInt
            | Opcode::StoreFloat
            | Opcode::StoreBool
            | Opcode::StoreString
            | Opcode::StoreBlob
            | Opcode::StoreVoid
            | Opcode::StoreFile
            | Opcode::StoreRef
            | Opcode::StoreArray
            | Opcode::StoreBag
            | Opcode::StoreRecursive
            | Opcode::ArrayBuild => self.outputs.clone(),
            _ => vec![],
        }
    }

    pub fn piecewise_assigned_outputs(&self) -> Vec<Var> {
        match self.op {
            Opcode::ArrayInsertFuture
            | Opcode::ArrayRefInsertFuture
            | Opcode::ArrayInsertImm
            | Opcode::ArrayRefInsertImm
            | Opcode::BagInsert
            | Opcode::StructInsert => self.outputs.clone(),
            _ => vec![],
        }
    }

    pub fn results(&self) -> Option<Vec<ResultVal>> {
        use Opcode::*;
        match self.op {
            StoreInt | StoreFloat | StoreBool | StoreString | StoreBlob | StoreVoid
            | StoreFile | StoreRef => Some(vec![ResultVal::build(
                ComputedValue::new(self.op, "", self.inputs.clone()),
                self.outputs[0].as_arg(),
                true,
            )]),
            LoadInt | LoadFloat | LoadBool | LoadString | LoadBlob | LoadVoid | LoadFile
            | LoadRef | LoadArray | LoadBag => Some(vec![ResultVal::build(
                ComputedValue::new(self.op, "", self.inputs.clone()),
                self.outputs[0].as_arg(),
                true,
            )]),
            DerefInt | DerefFloat | DerefBool | DerefString | DerefBlob | DerefFile => {
                Some(vec![ResultVal::build(
                    ComputedValue::new(self.op, "", self.inputs.clone()),
                    self.outputs[0].as_arg(),
                    false,
                )])
            }
            ArrayLookupFuture | ArrayRefLookupFuture | ArrayLookupRefImm | ArrayRefLookupImm
            | ArrayLookupImm | StructLookup | StructRefLookup => Some(vec![ResultVal::build(
                // Keyed on the array/struct and index so that repeated
                // lookups of the same slot unify.
                ComputedValue::new(self.op, "", self.inputs.clone()),
                self.outputs[0].as_arg(),
                !self.spawns(),
            )]),
            CopyRef => Some(vec![ResultVal::copy(
                &self.outputs[0],
                self.inputs[0].clone(),
            )]),
            GetFilename | GetFilenameVal | GetLocalFilename | IsMapped => {
                Some(vec![ResultVal::build(
                    ComputedValue::new(self.op, "", self.inputs.clone()),
                    self.outputs[0].as_arg(),
                    !self.spawns(),
                )])
            }
            PackValues => Some(vec![ResultVal::build(
                ComputedValue::new(self.op, "", self.inputs.clone()),
                self.outputs[0].as_arg(),
                true,
            )]),
            CheckpointLookupEnabled | CheckpointWriteEnabled => Some(vec![ResultVal::build(
                ComputedValue::new(self.op, "", vec![]),
                self.outputs[0].as_arg(),
                true,
            )]),
            _ => None,
        }
    }

    pub fn incr_vars(&self) -> (Vec<Var>, Vec<Var>) {
        use Opcode::*;
        match self.op {
            ArrayInsertFuture | ArrayRefInsertFuture | ArrayInsertImm | ArrayRefInsertImm
            | BagInsert | StructInsert => {
                // The container holds a reference to the inserted member.
                let reads = self
                    .inputs
                    .iter()
                    .filter_map(Arg::opt_var)
                    .filter(|v| has_read_refcount(v))
                    .cloned()
                    .collect();
                let writes = self
                    .outputs
                    .iter()
                    .filter(|v| has_write_refcount(v))
                    .cloned()
                    .collect();
                (reads, writes)
            }
            ArrayBuild => {
                let reads = self
                    .inputs
                    .iter()
                    .filter_map(Arg::opt_var)
                    .filter(|v| has_read_refcount(v))
                    .cloned()
                    .collect();
                (reads, vec![self.outputs[0].clone()])
            }
            StoreRef => {
                let reads = self
                    .inputs
                    .iter()
                    .filter_map(Arg::opt_var)
                    .filter(|v| has_read_refcount(v))
                    .cloned()
                    .collect();
                (reads, vec![])
            }
            _ => (vec![], vec![]),
        }
    }

    pub fn try_piggyback(&mut self, counters: &mut Counters<Var>, kind: RefCountKind) -> Vec<Var> {
        let matches_kind = match (self.op, kind) {
            (Opcode::IncrRef | Opcode::DecrRef, RefCountKind::Readers) => true,
            (Opcode::IncrWriters | Opcode::DecrWriters, RefCountKind::Writers) => true,
            _ => false,
        };
        if !matches_kind {
            return vec![];
        }
        let var = match &self.inputs[0] {
            Arg::Var(v) => v.clone(),
            Arg::Const(_) => return vec![],
        };
        let amount = match &self.inputs[1] {
            Arg::Const(Const::Int(n)) => *n,
            _ => return vec![],
        };
        let delta = counters.get(&var);
        let is_incr = matches!(self.op, Opcode::IncrRef | Opcode::IncrWriters);
        let absorbable = if is_incr { delta > 0 } else { delta < 0 };
        if !absorbable {
            return vec![];
        }
        let new_amount = amount + delta.abs();
        self.inputs[1] = Arg::int_lit(new_amount);
        counters.reset(&var);
        vec![var]
    }

    pub fn component_alias(&self) -> Option<ComponentAlias> {
        match self.op {
            Opcode::StructLookup | Opcode::ArrayLookupImm | Opcode::GetFilename => {
                Some(ComponentAlias {
                    whole: self.inputs[0].var().clone(),
                    part: self.outputs[0].clone(),
                })
            }
            _ => None,
        }
    }

    pub fn can_make_immediate(
        &mut self,
        closed: &IndexSet<Var>,
        wait_for_close: bool,
    ) -> Option<MakeImmRequest> {
        let fetch = |arg: &Arg| -> Option<Vec<Var>> {
            let var = arg.opt_var()?;
            if wait_for_close || closed.contains(var) {
                Some(vec![var.clone()])
            } else {
                None
            }
        };
        match self.op {
            // Once the index is known the lookup can use the direct form.
            Opcode::ArrayLookupFuture => Some(MakeImmRequest::new(vec![], fetch(&self.inputs[1])?)),
            // Once the array reference is known the ref indirection drops.
            Opcode::ArrayRefLookupFuture | Opcode::ArrayRefLookupImm => {
                Some(MakeImmRequest::new(vec![], fetch(&self.inputs[0])?))
            }
            Opcode::DerefInt
            | Opcode::DerefFloat
            | Opcode::DerefBool
            | Opcode::DerefString
            | Opcode::DerefBlob
            | Opcode::DerefFile => Some(MakeImmRequest::new(vec![], fetch(&self.inputs[0])?)),
            Opcode::UpdateMin | Opcode::UpdateIncr | Opcode::UpdateScale => {
                Some(MakeImmRequest::new(vec![], fetch(&self.inputs[0])?))
            }
            _ => None,
        }
    }

    pub fn make_immediate(
        &self,
        _out_vals: &[Fetched<Var>],
        in_vals: &[Fetched<Arg>],
    ) -> MakeImmChange {
        match self.op {
            Opcode::ArrayLookupFuture => {
                let index = in_vals[0].fetched.clone();
                MakeImmChange::replace(EngineOp::array_lookup_ref_imm(
                    self.outputs[0].clone(),
                    self.inputs[0].var().clone(),
                    index,
                    false,
                ))
            }
            Opcode::ArrayRefLookupFuture => {
                let array = in_vals[0].fetched.var().clone();
                MakeImmChange::replace(EngineOp::array_lookup_future(
                    self.outputs[0].clone(),
                    array,
                    self.inputs[1].var().clone(),
                    false,
                ))
            }
            Opcode::ArrayRefLookupImm => {
                let array = in_vals[0].fetched.var().clone();
                MakeImmChange::replace(EngineOp::array_lookup_ref_imm(
                    self.outputs[0].clone(),
                    array,
                    self.inputs[1].clone(),
                    false,
                ))
            }
            Opcode::DerefInt
            | Opcode::DerefFloat
            | Opcode::DerefBool
            | Opcode::DerefString
            | Opcode::DerefBlob
            | Opcode::DerefFile => {
                // The fetched reference names the target future; the deref
                // collapses to a copy between futures.
                let dst = self.outputs[0].clone();
                let kind = dst.ty().prim_kind().expect("deref output is primitive");
                MakeImmChange::replace(Builtin::async_(
                    BuiltinOp::copy_for(kind),
                    Some(dst),
                    vec![in_vals[0].fetched.clone()],
                    TaskProps::new(),
                ))
            }
            Opcode::UpdateMin | Opcode::UpdateIncr | Opcode::UpdateScale => {
                let imm_op = match self.op {
                    Opcode::UpdateMin => Opcode::UpdateMinImm,
                    Opcode::UpdateIncr => Opcode::UpdateIncrImm,
                    _ => Opcode::UpdateScaleImm,
                };
                MakeImmChange::replace(EngineOp::update(
                    imm_op,
                    self.outputs[0].clone(),
                    in_vals[0].fetched.clone(),
                ))
            }
            other => panic!("make_immediate not valid on {}", other),
        }
    }

    pub fn rename_vars(&mut self, renames: &IndexMap<Var, Arg>, mode: RenameMode) {
        if output_positions_renamed(mode) {
            replace_vars(renames, &mut self.outputs);
        }
        replace_args(renames, &mut self.inputs);
    }
}

impl fmt::Display for EngineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        for out in &self.outputs {
            write!(f, " {}", out.name())?;
        }
        if !self.outputs.is_empty() && !self.inputs.is_empty() {
            write!(f, " <-")?;
        }
        for input in &self.inputs {
            write!(f, " {}", input)?;
        }
        Ok(())
    }
}
