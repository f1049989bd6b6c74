//! Variable descriptors.
//!
//! A variable is a named slot with a type, an allocation class, and a
//! definition kind. Instructions reference variables by descriptor, not by
//! owning handle; two references to the same variable must be `identical`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::arg::Arg;
use crate::types::Type;

/// Prefix for compiler temporaries.
pub const TMP_VAR_PREFIX: &str = "tmp";
/// Prefix for alias variables.
pub const ALIAS_VAR_PREFIX: &str = "alias";
/// Prefix for local value variables.
pub const LOCAL_VALUE_VAR_PREFIX: &str = "v";
/// Prefix for struct-field alias variables.
pub const STRUCT_FIELD_VAR_PREFIX: &str = "f_";
/// Prefix for filename alias variables.
pub const FILENAME_OF_PREFIX: &str = "filename_of_";
/// Prefix for generated wrapper function names.
pub const WRAPPER_PREFIX: &str = "w_";

/// Allocation class: where the variable's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Alloc {
    /// Engine-visible future stored in the stack frame structure.
    Stack,
    /// Engine-visible future with temporary lifetime.
    Temp,
    /// Handle to storage owned elsewhere.
    Alias,
    /// Plain value held in the enclosing scope.
    Local,
    /// Program-wide constant.
    GlobalConst,
}

/// How the variable came to be defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefKind {
    LocalUser,
    LocalCompiler,
    GlobalConst,
    InArg,
    OutArg,
}

/// A variable descriptor.
///
/// `mapping` associates a file-typed variable with the string variable
/// holding its filename; it is `None` for every other type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    name: String,
    ty: Type,
    alloc: Alloc,
    def_kind: DefKind,
    mapping: Option<Box<Var>>,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: Type, alloc: Alloc, def_kind: DefKind) -> Self {
        Self {
            name: name.into(),
            ty,
            alloc,
            def_kind,
            mapping: None,
        }
    }

    /// A file variable mapped to a filename variable.
    pub fn mapped(
        name: impl Into<String>,
        ty: Type,
        alloc: Alloc,
        def_kind: DefKind,
        mapping: Var,
    ) -> Self {
        assert!(ty.is_file(), "mapping only valid on file variables");
        assert!(
            mapping.ty().is_string() && mapping.ty().is_prim_future(),
            "mapping must be a string future, got {}",
            mapping.ty()
        );
        Self {
            name: name.into(),
            ty,
            alloc,
            def_kind,
            mapping: Some(Box::new(mapping)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn alloc(&self) -> Alloc {
        self.alloc
    }

    pub fn def_kind(&self) -> DefKind {
        self.def_kind
    }

    pub fn mapping(&self) -> Option<&Var> {
        self.mapping.as_deref()
    }

    /// Whether the variable might have a filename mapping at runtime: a
    /// statically mapped file, or a file output whose caller may have
    /// mapped it.
    pub fn maybe_mapped(&self) -> bool {
        self.mapping.is_some() || (self.ty.is_file() && self.def_kind == DefKind::OutArg)
    }

    /// Strict identity: every attribute agrees. Used by the validator to
    /// check that each reference matches the declaration.
    pub fn identical(&self, other: &Var) -> bool {
        self == other
    }

    pub fn as_arg(&self) -> Arg {
        Arg::Var(self.clone())
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.ty)
    }
}
