//! Builtin operator vocabulary.
//!
//! These opcodes are shared by the `LOCAL_OP` and `ASYNC_OP` instruction
//! forms: the same operator applies either to local values or to futures.
//! The classification predicates here drive canonicalization in the
//! computed-value layer and short-circuit rewriting in the optimizer.

use serde::{Deserialize, Serialize};

use crate::types::PrimKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinOp {
    // integer arithmetic
    PlusInt,
    MinusInt,
    MultInt,
    DivInt,
    ModInt,
    PowInt,
    NegateInt,
    MaxInt,
    MinInt,
    AbsInt,
    // float arithmetic
    PlusFloat,
    MinusFloat,
    MultFloat,
    DivFloat,
    PowFloat,
    NegateFloat,
    MaxFloat,
    MinFloat,
    AbsFloat,
    // comparisons
    EqInt,
    NeqInt,
    LtInt,
    LteInt,
    GtInt,
    GteInt,
    EqFloat,
    NeqFloat,
    LtFloat,
    LteFloat,
    GtFloat,
    GteFloat,
    EqString,
    NeqString,
    EqBool,
    NeqBool,
    // logic
    And,
    Or,
    Not,
    Xor,
    // strings
    Strcat,
    // conversions
    IntToFloat,
    FloatToInt,
    ParseInt,
    ParseFloat,
    // copies
    CopyInt,
    CopyFloat,
    CopyBool,
    CopyString,
    CopyBlob,
    CopyVoid,
    CopyFile,
    // checks
    Assert,
    AssertEq,
    // impure sources
    Rand,
}

impl BuiltinOp {
    /// Operand order does not affect the result.
    pub fn is_commutative(self) -> bool {
        use BuiltinOp::*;
        matches!(
            self,
            PlusInt
                | MultInt
                | MaxInt
                | MinInt
                | PlusFloat
                | MultFloat
                | MaxFloat
                | MinFloat
                | EqInt
                | NeqInt
                | EqFloat
                | NeqFloat
                | EqString
                | NeqString
                | EqBool
                | NeqBool
                | And
                | Or
                | Xor
        )
    }

    /// Reversing the operands and flipping the operator preserves meaning,
    /// e.g. `a <= b` and `b >= a`.
    pub fn is_flippable(self) -> bool {
        use BuiltinOp::*;
        matches!(
            self,
            LtInt | LteInt | GtInt | GteInt | LtFloat | LteFloat | GtFloat | GteFloat
        )
    }

    pub fn flipped(self) -> BuiltinOp {
        use BuiltinOp::*;
        match self {
            LtInt => GtInt,
            LteInt => GteInt,
            GtInt => LtInt,
            GteInt => LteInt,
            LtFloat => GtFloat,
            LteFloat => GteFloat,
            GtFloat => LtFloat,
            GteFloat => LteFloat,
            other => panic!("operator {:?} is not flippable", other),
        }
    }

    /// One known operand can decide the result (boolean and/or).
    pub fn is_short_circuitable(self) -> bool {
        matches!(self, BuiltinOp::And | BuiltinOp::Or)
    }

    pub fn is_min_max(self) -> bool {
        use BuiltinOp::*;
        matches!(self, MaxInt | MinInt | MaxFloat | MinFloat)
    }

    pub fn is_copy(self) -> bool {
        use BuiltinOp::*;
        matches!(
            self,
            CopyInt | CopyFloat | CopyBool | CopyString | CopyBlob | CopyVoid | CopyFile
        )
    }

    /// Two executions are not interchangeable: asserts emit diagnostics,
    /// random sources produce fresh values.
    pub fn is_impure(self) -> bool {
        matches!(self, BuiltinOp::Assert | BuiltinOp::AssertEq | BuiltinOp::Rand)
    }

    /// The copy operator for a primitive kind.
    pub fn copy_for(kind: PrimKind) -> BuiltinOp {
        match kind {
            PrimKind::Int => BuiltinOp::CopyInt,
            PrimKind::Float => BuiltinOp::CopyFloat,
            PrimKind::Bool => BuiltinOp::CopyBool,
            PrimKind::Str => BuiltinOp::CopyString,
            PrimKind::Blob => BuiltinOp::CopyBlob,
            PrimKind::Void => BuiltinOp::CopyVoid,
            PrimKind::File => BuiltinOp::CopyFile,
        }
    }

    /// Input kinds and output kind of the operator.
    pub fn signature(self) -> (&'static [PrimKind], PrimKind) {
        use BuiltinOp::*;
        use PrimKind::*;
        match self {
            PlusInt | MinusInt | MultInt | DivInt | ModInt | PowInt | MaxInt | MinInt => {
                (&[Int, Int], Int)
            }
            NegateInt | AbsInt => (&[Int], Int),
            PlusFloat | MinusFloat | MultFloat | DivFloat | PowFloat | MaxFloat | MinFloat => {
                (&[Float, Float], Float)
            }
            NegateFloat | AbsFloat => (&[Float], Float),
            EqInt | NeqInt | LtInt | LteInt | GtInt | GteInt => (&[Int, Int], Bool),
            EqFloat | NeqFloat | LtFloat | LteFloat | GtFloat | GteFloat => (&[Float, Float], Bool),
            EqString | NeqString => (&[Str, Str], Bool),
            EqBool | NeqBool | And | Or | Xor => (&[Bool, Bool], Bool),
            Not => (&[Bool], Bool),
            Strcat => (&[Str, Str], Str),
            IntToFloat => (&[Int], Float),
            FloatToInt => (&[Float], Int),
            ParseInt => (&[Str], Int),
            ParseFloat => (&[Str], Float),
            CopyInt => (&[Int], Int),
            CopyFloat => (&[Float], Float),
            CopyBool => (&[Bool], Bool),
            CopyString => (&[Str], Str),
            CopyBlob => (&[Blob], Blob),
            CopyVoid => (&[Void], Void),
            CopyFile => (&[File], File),
            Assert => (&[Bool, Str], Void),
            AssertEq => (&[Int, Int, Str], Void),
            Rand => (&[], Float),
        }
    }
}

/// A resolved surface operator: the opcode plus its concrete signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub code: BuiltinOp,
    pub in_kinds: Vec<PrimKind>,
    pub out_kind: PrimKind,
}

impl Op {
    fn of(code: BuiltinOp) -> Op {
        let (ins, out) = code.signature();
        Op {
            code,
            in_kinds: ins.to_vec(),
            out_kind: out,
        }
    }
}

/// Resolve a surface operator token against operand kinds and the expected
/// result kind.
pub fn resolve_op(symbol: &str, operands: &[PrimKind], result: PrimKind) -> Option<Op> {
    use BuiltinOp::*;
    use PrimKind::*;
    let first = operands.first().copied();
    let code = match (symbol, first, operands.len(), result) {
        ("+", Some(Str), 2, Str) => Strcat,
        ("+", _, 2, Int) => PlusInt,
        ("+", _, 2, Float) => PlusFloat,
        ("-", _, 2, Int) => MinusInt,
        ("-", _, 2, Float) => MinusFloat,
        ("-", _, 1, Int) => NegateInt,
        ("-", _, 1, Float) => NegateFloat,
        ("*", _, 2, Int) => MultInt,
        ("*", _, 2, Float) => MultFloat,
        ("/", _, 2, Int) => DivInt,
        ("/", _, 2, Float) => DivFloat,
        ("%", _, 2, Int) => ModInt,
        ("**", _, 2, Int) => PowInt,
        ("**", _, 2, Float) => PowFloat,
        ("==", Some(Int), 2, Bool) => EqInt,
        ("==", Some(Float), 2, Bool) => EqFloat,
        ("==", Some(Str), 2, Bool) => EqString,
        ("==", Some(Bool), 2, Bool) => EqBool,
        ("!=", Some(Int), 2, Bool) => NeqInt,
        ("!=", Some(Float), 2, Bool) => NeqFloat,
        ("!=", Some(Str), 2, Bool) => NeqString,
        ("!=", Some(Bool), 2, Bool) => NeqBool,
        ("<", Some(Float), 2, Bool) => LtFloat,
        ("<", _, 2, Bool) => LtInt,
        ("<=", Some(Float), 2, Bool) => LteFloat,
        ("<=", _, 2, Bool) => LteInt,
        (">", Some(Float), 2, Bool) => GtFloat,
        (">", _, 2, Bool) => GtInt,
        (">=", Some(Float), 2, Bool) => GteFloat,
        (">=", _, 2, Bool) => GteInt,
        ("&&", _, 2, Bool) => And,
        ("||", _, 2, Bool) => Or,
        ("!", _, 1, Bool) => Not,
        _ => return None,
    };
    Some(Op::of(code))
}

/// Compile-time evaluation of builtin operators over constants.
pub mod op_eval {
    use super::BuiltinOp;
    use crate::arg::Const;

    /// Evaluate `op` over constant inputs. `None` when the operator cannot
    /// be folded (impure, division by zero, malformed input).
    pub fn eval(op: BuiltinOp, inputs: &[Const]) -> Option<Const> {
        use BuiltinOp::*;
        let int = |i: usize| match inputs.get(i) {
            Some(Const::Int(v)) => Some(*v),
            _ => None,
        };
        let float = |i: usize| match inputs.get(i) {
            Some(Const::Float(v)) => Some(*v),
            _ => None,
        };
        let boolean = |i: usize| match inputs.get(i) {
            Some(Const::Bool(v)) => Some(*v),
            _ => None,
        };
        let string = |i: usize| match inputs.get(i) {
            Some(Const::Str(v)) => Some(v.clone()),
            _ => None,
        };

        let result = match op {
            PlusInt => Const::Int(int(0)?.wrapping_add(int(1)?)),
            MinusInt => Const::Int(int(0)?.wrapping_sub(int(1)?)),
            MultInt => Const::Int(int(0)?.wrapping_mul(int(1)?)),
            DivInt => Const::Int(int(0)?.checked_div(int(1)?)?),
            ModInt => Const::Int(int(0)?.checked_rem(int(1)?)?),
            PowInt => {
                let exp = u32::try_from(int(1)?).ok()?;
                Const::Int(int(0)?.checked_pow(exp)?)
            }
            NegateInt => Const::Int(int(0)?.checked_neg()?),
            MaxInt => Const::Int(int(0)?.max(int(1)?)),
            MinInt => Const::Int(int(0)?.min(int(1)?)),
            AbsInt => Const::Int(int(0)?.checked_abs()?),
            PlusFloat => Const::Float(float(0)? + float(1)?),
            MinusFloat => Const::Float(float(0)? - float(1)?),
            MultFloat => Const::Float(float(0)? * float(1)?),
            DivFloat => Const::Float(float(0)? / float(1)?),
            PowFloat => Const::Float(float(0)?.powf(float(1)?)),
            NegateFloat => Const::Float(-float(0)?),
            MaxFloat => Const::Float(float(0)?.max(float(1)?)),
            MinFloat => Const::Float(float(0)?.min(float(1)?)),
            AbsFloat => Const::Float(float(0)?.abs()),
            EqInt => Const::Bool(int(0)? == int(1)?),
            NeqInt => Const::Bool(int(0)? != int(1)?),
            LtInt => Const::Bool(int(0)? < int(1)?),
            LteInt => Const::Bool(int(0)? <= int(1)?),
            GtInt => Const::Bool(int(0)? > int(1)?),
            GteInt => Const::Bool(int(0)? >= int(1)?),
            EqFloat => Const::Bool(float(0)? == float(1)?),
            NeqFloat => Const::Bool(float(0)? != float(1)?),
            LtFloat => Const::Bool(float(0)? < float(1)?),
            LteFloat => Const::Bool(float(0)? <= float(1)?),
            GtFloat => Const::Bool(float(0)? > float(1)?),
            GteFloat => Const::Bool(float(0)? >= float(1)?),
            EqString => Const::Bool(string(0)? == string(1)?),
            NeqString => Const::Bool(string(0)? != string(1)?),
            EqBool => Const::Bool(boolean(0)? == boolean(1)?),
            NeqBool => Const::Bool(boolean(0)? != boolean(1)?),
            And => Const::Bool(boolean(0)? && boolean(1)?),
            Or => Const::Bool(boolean(0)? || boolean(1)?),
            Not => Const::Bool(!boolean(0)?),
            Xor => Const::Bool(boolean(0)? ^ boolean(1)?),
            Strcat => Const::Str(format!("{}{}", string(0)?, string(1)?)),
            IntToFloat => Const::Float(int(0)? as f64),
            FloatToInt => Const::Int(float(0)? as i64),
            ParseInt => Const::Int(string(0)?.trim().parse().ok()?),
            ParseFloat => Const::Float(string(0)?.trim().parse().ok()?),
            CopyInt | CopyFloat | CopyBool | CopyString | CopyBlob | CopyVoid | CopyFile => {
                inputs.first()?.clone()
            }
            Assert | AssertEq | Rand => return None,
        };
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arg::Const;

    #[test]
    fn resolve_plus_dispatches_on_kinds() {
        let int_op = resolve_op("+", &[PrimKind::Int, PrimKind::Int], PrimKind::Int).unwrap();
        assert_eq!(int_op.code, BuiltinOp::PlusInt);
        let cat = resolve_op("+", &[PrimKind::Str, PrimKind::Str], PrimKind::Str).unwrap();
        assert_eq!(cat.code, BuiltinOp::Strcat);
        assert!(resolve_op("+", &[PrimKind::Bool, PrimKind::Bool], PrimKind::Bool).is_none());
    }

    #[test]
    fn flip_round_trips() {
        for op in [
            BuiltinOp::LtInt,
            BuiltinOp::LteInt,
            BuiltinOp::GtFloat,
            BuiltinOp::GteFloat,
        ] {
            assert!(op.is_flippable());
            assert_eq!(op.flipped().flipped(), op);
        }
    }

    #[test]
    fn eval_folds_arithmetic() {
        assert_eq!(
            op_eval::eval(BuiltinOp::PlusInt, &[Const::Int(2), Const::Int(3)]),
            Some(Const::Int(5))
        );
        assert_eq!(
            op_eval::eval(BuiltinOp::DivInt, &[Const::Int(2), Const::Int(0)]),
            None
        );
        assert_eq!(
            op_eval::eval(BuiltinOp::Strcat, &[Const::Str("a".into()), Const::Str("b".into())]),
            Some(Const::Str("ab".into()))
        );
    }

    #[test]
    fn impure_ops_do_not_fold() {
        assert_eq!(op_eval::eval(BuiltinOp::Rand, &[]), None);
        assert!(BuiltinOp::Rand.is_impure());
        assert!(BuiltinOp::Assert.is_impure());
    }
}
