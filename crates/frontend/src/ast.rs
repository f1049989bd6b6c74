//! Typed expression trees handed to the walker by earlier phases.
//!
//! Each node carries a kind, a text payload (variable name, literal text,
//! operator symbol, function or field name), child expressions, and the
//! source line. Call nodes additionally carry annotation expressions keyed
//! by task property.

use rill_foundation::{TaskPropKey, UserError, UserResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    Variable,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    BoolLiteral,
    Operator,
    CallFunction,
    ArrayLoad,
    StructLoad,
    ArrayRange,
    ArrayElems,
    ArrayKvElems,
}

#[derive(Debug, Clone)]
pub struct ExprTree {
    kind: ExprKind,
    text: String,
    children: Vec<ExprTree>,
    annotations: Vec<(TaskPropKey, ExprTree)>,
    line: u32,
}

impl ExprTree {
    fn node(kind: ExprKind, text: impl Into<String>, children: Vec<ExprTree>) -> Self {
        Self {
            kind,
            text: text.into(),
            children,
            annotations: Vec::new(),
            line: 0,
        }
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self::node(ExprKind::Variable, name, vec![])
    }

    pub fn int_lit(value: i64) -> Self {
        Self::node(ExprKind::IntLiteral, value.to_string(), vec![])
    }

    pub fn float_lit(value: f64) -> Self {
        Self::node(ExprKind::FloatLiteral, value.to_string(), vec![])
    }

    pub fn bool_lit(value: bool) -> Self {
        Self::node(ExprKind::BoolLiteral, value.to_string(), vec![])
    }

    pub fn string_lit(value: impl Into<String>) -> Self {
        Self::node(ExprKind::StringLiteral, value, vec![])
    }

    pub fn operator(symbol: impl Into<String>, operands: Vec<ExprTree>) -> Self {
        Self::node(ExprKind::Operator, symbol, operands)
    }

    pub fn call(function: impl Into<String>, args: Vec<ExprTree>) -> Self {
        Self::node(ExprKind::CallFunction, function, args)
    }

    pub fn array_load(array: ExprTree, index: ExprTree) -> Self {
        Self::node(ExprKind::ArrayLoad, "", vec![array, index])
    }

    /// `expr.field`; the field name is the node's text.
    pub fn struct_load(inner: ExprTree, field: impl Into<String>) -> Self {
        Self::node(ExprKind::StructLoad, field, vec![inner])
    }

    pub fn array_range(start: ExprTree, end: ExprTree, step: Option<ExprTree>) -> Self {
        let mut children = vec![start, end];
        children.extend(step);
        Self::node(ExprKind::ArrayRange, "", children)
    }

    pub fn array_elems(vals: Vec<ExprTree>) -> Self {
        Self::node(ExprKind::ArrayElems, "", vals)
    }

    /// `[k1: v1, k2: v2, ...]`; children alternate key, value.
    pub fn array_kv_elems(pairs: Vec<(ExprTree, ExprTree)>) -> Self {
        let mut children = Vec::with_capacity(pairs.len() * 2);
        for (k, v) in pairs {
            children.push(k);
            children.push(v);
        }
        Self::node(ExprKind::ArrayKvElems, "", children)
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    pub fn with_annotation(mut self, key: TaskPropKey, expr: ExprTree) -> Self {
        assert_eq!(self.kind, ExprKind::CallFunction, "annotation on non-call");
        self.annotations.push((key, expr));
        self
    }

    pub fn kind(&self) -> ExprKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn child(&self, i: usize) -> &ExprTree {
        &self.children[i]
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn children(&self) -> &[ExprTree] {
        &self.children
    }

    pub fn annotations(&self) -> &[(TaskPropKey, ExprTree)] {
        &self.annotations
    }

    pub fn line(&self) -> u32 {
        self.line
    }
}

/// Literal extraction helpers.
pub mod literals {
    use super::{ExprKind, ExprTree};
    use tracing::warn;

    /// The value of an integer literal, folding unary negation.
    pub fn extract_int_lit(tree: &ExprTree) -> Option<i64> {
        match tree.kind() {
            ExprKind::IntLiteral => tree.text().parse().ok(),
            ExprKind::Operator if tree.text() == "-" && tree.child_count() == 1 => {
                extract_int_lit(tree.child(0)).map(|v| -v)
            }
            _ => None,
        }
    }

    /// The value of a float literal, folding unary negation.
    pub fn extract_float_lit(tree: &ExprTree) -> Option<f64> {
        match tree.kind() {
            ExprKind::FloatLiteral => tree.text().parse().ok(),
            ExprKind::Operator if tree.text() == "-" && tree.child_count() == 1 => {
                extract_float_lit(tree.child(0)).map(|v| -v)
            }
            _ => None,
        }
    }

    pub fn extract_bool_lit(tree: &ExprTree) -> Option<bool> {
        match tree.kind() {
            ExprKind::BoolLiteral => tree.text().parse().ok(),
            _ => None,
        }
    }

    pub fn extract_string_lit(tree: &ExprTree) -> Option<&str> {
        match tree.kind() {
            ExprKind::StringLiteral => Some(tree.text()),
            _ => None,
        }
    }

    /// Reinterpret an integer literal assigned to a float target. Warns
    /// when the integer is not exactly representable.
    pub fn interpret_int_as_float(value: i64) -> f64 {
        let result = value as f64;
        if result as i64 != value {
            warn!(value, "integer literal not exactly representable as float");
        }
        result
    }
}

/// Decomposed view of an `ArrayRange` node.
pub struct ArrayRangeView<'a> {
    pub start: &'a ExprTree,
    pub end: &'a ExprTree,
    pub step: Option<&'a ExprTree>,
}

impl<'a> ArrayRangeView<'a> {
    pub fn from_tree(tree: &'a ExprTree) -> UserResult<Self> {
        if tree.kind() != ExprKind::ArrayRange || !(2..=3).contains(&tree.child_count()) {
            return Err(UserError::Invalid(format!(
                "malformed array range at line {}",
                tree.line()
            )));
        }
        Ok(Self {
            start: tree.child(0),
            end: tree.child(1),
            step: (tree.child_count() == 3).then(|| tree.child(2)),
        })
    }
}

/// Decomposed view of `ArrayElems` / `ArrayKvElems` nodes.
pub struct ArrayElemsView<'a> {
    keys: Vec<&'a ExprTree>,
    vals: Vec<&'a ExprTree>,
}

impl<'a> ArrayElemsView<'a> {
    pub fn from_tree(tree: &'a ExprTree) -> UserResult<Self> {
        match tree.kind() {
            ExprKind::ArrayElems => Ok(Self {
                keys: vec![],
                vals: tree.children().iter().collect(),
            }),
            ExprKind::ArrayKvElems => {
                if tree.child_count() % 2 != 0 {
                    return Err(UserError::Invalid(format!(
                        "malformed keyed array literal at line {}",
                        tree.line()
                    )));
                }
                let mut keys = Vec::new();
                let mut vals = Vec::new();
                for pair in tree.children().chunks(2) {
                    keys.push(&pair[0]);
                    vals.push(&pair[1]);
                }
                Ok(Self { keys, vals })
            }
            _ => Err(UserError::Invalid(format!(
                "expected array literal at line {}",
                tree.line()
            ))),
        }
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn keys(&self) -> &[&'a ExprTree] {
        &self.keys
    }

    pub fn vals(&self) -> &[&'a ExprTree] {
        &self.vals
    }

    pub fn elem_count(&self) -> usize {
        self.vals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::literals::*;
    use super::*;

    #[test]
    fn negated_literals_fold() {
        let neg = ExprTree::operator("-", vec![ExprTree::int_lit(7)]);
        assert_eq!(extract_int_lit(&neg), Some(-7));
        let negf = ExprTree::operator("-", vec![ExprTree::float_lit(2.5)]);
        assert_eq!(extract_float_lit(&negf), Some(-2.5));
        let not_lit = ExprTree::operator("-", vec![ExprTree::variable("x")]);
        assert_eq!(extract_int_lit(&not_lit), None);
    }

    #[test]
    fn kv_view_splits_pairs() {
        let tree = ExprTree::array_kv_elems(vec![
            (ExprTree::int_lit(1), ExprTree::int_lit(10)),
            (ExprTree::int_lit(2), ExprTree::int_lit(20)),
        ]);
        let view = ArrayElemsView::from_tree(&tree).unwrap();
        assert!(view.has_keys());
        assert_eq!(view.elem_count(), 2);
        assert_eq!(extract_int_lit(view.keys()[1]), Some(2));
        assert_eq!(extract_int_lit(view.vals()[1]), Some(20));
    }
}
