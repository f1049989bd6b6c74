//! The rill type algebra.
//!
//! Types distinguish *futures* (single-assignment asynchronous cells the
//! engine tracks) from *values* (synchronously available data in the
//! emitting task's frame). Containers hold futures; references indirect
//! to storage owned elsewhere.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{UserError, UserResult};

/// Primitive data kinds shared by futures and local values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimKind {
    Int,
    Float,
    Bool,
    Str,
    Blob,
    Void,
    File,
}

impl fmt::Display for PrimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimKind::Int => "int",
            PrimKind::Float => "float",
            PrimKind::Bool => "bool",
            PrimKind::Str => "string",
            PrimKind::Blob => "blob",
            PrimKind::Void => "void",
            PrimKind::File => "file",
        };
        write!(f, "{}", name)
    }
}

/// A nominal record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl StructType {
    pub fn new(name: impl Into<String>, fields: Vec<(String, Type)>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn field_type(&self, field: &str) -> Option<&Type> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, ty)| ty)
    }
}

/// The type of a variable or argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Single-assignment asynchronous cell of a primitive kind.
    PrimFuture(PrimKind),
    /// Synchronously available local value.
    PrimValue(PrimKind),
    /// Mutable cell supporting monotonic updates (min, incr, scale).
    /// Currently restricted to `Float`.
    PrimUpdateable(PrimKind),
    /// Reference whose contents, once assigned, name a value of the inner type.
    Ref(Box<Type>),
    /// Associative container with future-typed keys.
    Array { key: Box<Type>, elem: Box<Type> },
    /// Unordered multiset.
    Bag(Box<Type>),
    /// Nominal record.
    Struct(StructType),
    /// Transient union produced by the type checker; concretized before lowering.
    Union(Vec<Type>),
}

impl Type {
    pub fn future(kind: PrimKind) -> Type {
        Type::PrimFuture(kind)
    }

    pub fn value(kind: PrimKind) -> Type {
        Type::PrimValue(kind)
    }

    pub fn reference(inner: Type) -> Type {
        Type::Ref(Box::new(inner))
    }

    pub fn array(key: Type, elem: Type) -> Type {
        Type::Array {
            key: Box::new(key),
            elem: Box::new(elem),
        }
    }

    pub fn bag(elem: Type) -> Type {
        Type::Bag(Box::new(elem))
    }

    pub fn is_prim_future(&self) -> bool {
        matches!(self, Type::PrimFuture(_))
    }

    pub fn is_prim_value(&self) -> bool {
        matches!(self, Type::PrimValue(_))
    }

    pub fn is_updateable(&self) -> bool {
        matches!(self, Type::PrimUpdateable(_))
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Type::Ref(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array { .. })
    }

    pub fn is_bag(&self) -> bool {
        matches!(self, Type::Bag(_))
    }

    pub fn is_container(&self) -> bool {
        self.is_array() || self.is_bag()
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct(_))
    }

    pub fn is_union(&self) -> bool {
        matches!(self, Type::Union(_))
    }

    /// True for a reference to a struct.
    pub fn is_struct_ref(&self) -> bool {
        match self {
            Type::Ref(inner) => inner.is_struct(),
            _ => false,
        }
    }

    /// True for a reference to an array.
    pub fn is_array_ref(&self) -> bool {
        match self {
            Type::Ref(inner) => inner.is_array(),
            _ => false,
        }
    }

    /// True for a reference to an array or bag.
    pub fn is_container_ref(&self) -> bool {
        match self {
            Type::Ref(inner) => inner.is_container(),
            _ => false,
        }
    }

    /// The primitive kind of a future, value, or updateable.
    pub fn prim_kind(&self) -> Option<PrimKind> {
        match self {
            Type::PrimFuture(k) | Type::PrimValue(k) | Type::PrimUpdateable(k) => Some(*k),
            _ => None,
        }
    }

    pub fn is_kind(&self, kind: PrimKind) -> bool {
        self.prim_kind() == Some(kind)
    }

    pub fn is_int(&self) -> bool {
        self.is_kind(PrimKind::Int)
    }

    pub fn is_float(&self) -> bool {
        self.is_kind(PrimKind::Float)
    }

    pub fn is_bool(&self) -> bool {
        self.is_kind(PrimKind::Bool)
    }

    pub fn is_string(&self) -> bool {
        self.is_kind(PrimKind::Str)
    }

    pub fn is_blob(&self) -> bool {
        self.is_kind(PrimKind::Blob)
    }

    pub fn is_void(&self) -> bool {
        self.is_kind(PrimKind::Void)
    }

    pub fn is_file(&self) -> bool {
        self.is_kind(PrimKind::File)
    }

    /// Alternatives of a union, or the type itself as a single alternative.
    pub fn union_alternatives(&self) -> &[Type] {
        match self {
            Type::Union(alts) => alts,
            other => std::slice::from_ref(other),
        }
    }

    /// Whether a value of `self` may be assigned to a slot of type `other`.
    ///
    /// Unions are assignable when any alternative matches.
    pub fn assignable_to(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Type::Union(alts), _) => alts.iter().any(|a| a.assignable_to(other)),
            (_, Type::Union(alts)) => alts.iter().any(|a| self.assignable_to(a)),
            (Type::Ref(a), Type::Ref(b)) => a.assignable_to(b),
            _ => false,
        }
    }

    /// True if `self` is a reference whose target is assignable to `target`.
    pub fn is_assignable_ref_to(&self, target: &Type) -> bool {
        match self {
            Type::Ref(inner) => inner.assignable_to(target),
            _ => false,
        }
    }

    /// The type obtained by dereferencing: strips one `Ref`, or converts a
    /// future or updateable to the value it holds.
    pub fn deref_result(&self) -> Type {
        match self {
            Type::Ref(inner) => (**inner).clone(),
            Type::PrimFuture(k) | Type::PrimUpdateable(k) => Type::PrimValue(*k),
            other => panic!("cannot dereference type {}", other),
        }
    }

    /// Element type of an array or bag, looking through one reference.
    pub fn container_elem(&self) -> &Type {
        match self {
            Type::Array { elem, .. } => elem,
            Type::Bag(elem) => elem,
            Type::Ref(inner) => inner.container_elem(),
            other => panic!("no element type for non-container {}", other),
        }
    }

    /// Key type of an array, looking through one reference.
    pub fn array_key(&self) -> &Type {
        match self {
            Type::Array { key, .. } => key,
            Type::Ref(inner) => inner.array_key(),
            other => panic!("no key type for non-array {}", other),
        }
    }

    /// Recursively strip futures and references, yielding the local-value
    /// shape of a container's contents.
    pub fn unpacked(&self) -> Type {
        match self {
            Type::Array { key, elem } => Type::array((**key).clone(), elem.unpacked()),
            Type::Bag(elem) => Type::bag(elem.unpacked()),
            Type::Ref(inner) => inner.unpacked(),
            Type::PrimFuture(k) => Type::PrimValue(*k),
            other => other.clone(),
        }
    }

    /// The future type corresponding to a local value type.
    pub fn future_of_value(&self) -> Type {
        match self {
            Type::PrimValue(k) => Type::PrimFuture(*k),
            other => other.clone(),
        }
    }

    /// The value type corresponding to a future or updateable.
    pub fn value_of_future(&self) -> Type {
        match self {
            Type::PrimFuture(k) | Type::PrimUpdateable(k) => Type::PrimValue(*k),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::PrimFuture(k) => write!(f, "{}", k),
            Type::PrimValue(k) => write!(f, "{} value", k),
            Type::PrimUpdateable(k) => write!(f, "updateable {}", k),
            Type::Ref(inner) => write!(f, "*{}", inner),
            Type::Array { key, elem } => write!(f, "{}[{}]", elem, key),
            Type::Bag(elem) => write!(f, "bag<{}>", elem),
            Type::Struct(st) => write!(f, "struct {}", st.name),
            Type::Union(alts) => {
                let names: Vec<String> = alts.iter().map(|t| t.to_string()).collect();
                write!(f, "({})", names.join("|"))
            }
        }
    }
}

/// The declared type of a function: input and output slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionType {
    pub inputs: Vec<Type>,
    pub outputs: Vec<Type>,
    pub varargs: bool,
}

impl FunctionType {
    pub fn new(inputs: Vec<Type>, outputs: Vec<Type>) -> Self {
        Self {
            inputs,
            outputs,
            varargs: false,
        }
    }

    /// Type expected for argument position `i`, accounting for varargs.
    pub fn input(&self, i: usize) -> &Type {
        if self.varargs && i >= self.inputs.len() {
            self.inputs.last().expect("varargs function with no inputs")
        } else {
            &self.inputs[i]
        }
    }
}

/// Check that `src` may be copied into `dst`.
pub fn check_copy(src: &Type, dst: &Type) -> UserResult<()> {
    if src.assignable_to(dst) {
        Ok(())
    } else {
        Err(UserError::TypeMismatch(format!(
            "cannot copy value of type {} into {}",
            src, dst
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_assignability_matches_any_alternative() {
        let arr_int = Type::array(Type::future(PrimKind::Int), Type::future(PrimKind::Int));
        let arr_float = Type::array(Type::future(PrimKind::Int), Type::future(PrimKind::Float));
        let union = Type::Union(vec![arr_int.clone(), arr_float.clone()]);

        assert!(union.assignable_to(&arr_int));
        assert!(arr_float.assignable_to(&union));
        assert!(!union.assignable_to(&Type::future(PrimKind::Int)));
    }

    #[test]
    fn deref_strips_one_level() {
        let fut = Type::future(PrimKind::Int);
        let r = Type::reference(fut.clone());
        assert_eq!(r.deref_result(), fut);
        assert_eq!(fut.deref_result(), Type::value(PrimKind::Int));
    }

    #[test]
    fn unpacked_strips_futures_recursively() {
        let nested = Type::array(
            Type::future(PrimKind::Int),
            Type::bag(Type::reference(Type::future(PrimKind::Float))),
        );
        let unpacked = nested.unpacked();
        assert_eq!(
            unpacked,
            Type::array(
                Type::future(PrimKind::Int),
                Type::bag(Type::value(PrimKind::Float)),
            )
        );
    }

    #[test]
    fn struct_field_lookup() {
        let inner = StructType::new("inner", vec![("field".into(), Type::future(PrimKind::Int))]);
        let outer = StructType::new("outer", vec![("inner".into(), Type::Struct(inner))]);
        let field = outer.field_type("inner").unwrap();
        assert!(field.is_struct());
        assert!(outer.field_type("missing").is_none());
    }

    #[test]
    fn check_copy_rejects_mismatch() {
        let src = Type::future(PrimKind::Int);
        let dst = Type::future(PrimKind::Str);
        assert!(check_copy(&src, &src.clone()).is_ok());
        assert!(check_copy(&src, &dst).is_err());
    }
}
