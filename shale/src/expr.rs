//! Predicate expression trees and their evaluator.
//!
//! An expression is a recursive sum type: literals, column references,
//! binary nodes and unary nodes. Evaluation never fails: comparing values
//! of differing types yields false so heterogeneous tables stay queryable.

use strata::codec::{self, Operator, Value};

use crate::record::RecordValues;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Binary {
        op: Operator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: Operator,
        child: Box<Expr>,
    },
}

impl Expr {
    pub fn literal(value: Value) -> Expr {
        Expr::Literal(value)
    }

    pub fn column(name: impl Into<String>) -> Expr {
        Expr::Column(name.into())
    }

    pub fn binary(op: Operator, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(child: Expr) -> Expr {
        Expr::Unary {
            op: Operator::Not,
            child: Box::new(child),
        }
    }

    /// Evaluates the predicate against one row.
    pub fn eval(&self, row: &RecordValues) -> bool {
        match self {
            Expr::Binary { op: Operator::And, left, right } => left.eval(row) && right.eval(row),
            Expr::Binary { op: Operator::Or, left, right } => left.eval(row) || right.eval(row),
            Expr::Unary { op: Operator::Not, child } => !child.eval(row),
            Expr::Binary { op, left, right } if op.is_comparison() => {
                match (left.resolve(row), right.resolve(row)) {
                    (Some(a), Some(b)) => codec::compare(&a, &b, *op),
                    _ => false,
                }
            }
            // Degenerate boolean positions: a literal or column reference
            // standing alone, or an operator where it cannot apply.
            Expr::Literal(Value::Bool(b)) => *b,
            Expr::Column(name) => matches!(row.get(name), Some(Value::Bool(true))),
            _ => false,
        }
    }

    /// Resolves a node to a value. A column reference falls back to a
    /// literal string when the row has no such column; nested expressions
    /// resolve to their boolean result.
    fn resolve(&self, row: &RecordValues) -> Option<Value> {
        match self {
            Expr::Literal(v) => Some(v.clone()),
            Expr::Column(name) => row
                .get(name)
                .cloned()
                .or_else(|| Some(Value::Str(name.clone()))),
            Expr::Binary { .. } | Expr::Unary { .. } => Some(Value::Bool(self.eval(row))),
        }
    }

    /// Every column name referenced anywhere in the tree, first-seen order.
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            Expr::Column(name) => {
                if !out.iter().any(|n| n == name) {
                    out.push(name.clone());
                }
            }
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Unary { child, .. } => child.collect_columns(out),
            Expr::Literal(_) => {}
        }
    }

    /// When the whole tree is a single `column <cmp> literal` comparison,
    /// returns its parts for index planning.
    pub fn root_probe(&self) -> Option<(&str, Operator, &Value)> {
        let Expr::Binary { op, left, right } = self else {
            return None;
        };
        if !op.is_comparison() {
            return None;
        }
        match (left.as_ref(), right.as_ref()) {
            (Expr::Column(name), Expr::Literal(value)) => Some((name, *op, value)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> RecordValues {
        let mut row = RecordValues::new();
        row.insert("age".to_string(), Value::I32(30));
        row.insert("name".to_string(), Value::Str("ada".to_string()));
        row.insert("active".to_string(), Value::Bool(true));
        row
    }

    fn cmp(col: &str, op: Operator, v: Value) -> Expr {
        Expr::binary(op, Expr::column(col), Expr::literal(v))
    }

    #[test]
    fn leaf_comparisons() {
        let row = row();
        assert!(cmp("age", Operator::Equal, Value::I32(30)).eval(&row));
        assert!(cmp("age", Operator::LessOrEqual, Value::I32(30)).eval(&row));
        assert!(!cmp("age", Operator::Greater, Value::I32(30)).eval(&row));
        assert!(cmp("name", Operator::Equal, Value::Str("ada".into())).eval(&row));
    }

    #[test]
    fn logical_connectives() {
        let row = row();
        let both = Expr::binary(
            Operator::And,
            cmp("age", Operator::Greater, Value::I32(18)),
            cmp("name", Operator::NotEqual, Value::Str("bob".into())),
        );
        assert!(both.eval(&row));

        let either = Expr::binary(
            Operator::Or,
            cmp("age", Operator::Less, Value::I32(0)),
            cmp("active", Operator::Equal, Value::Bool(true)),
        );
        assert!(either.eval(&row));

        assert!(!Expr::not(both).eval(&row));
    }

    #[test]
    fn unknown_column_is_a_literal_string() {
        let row = row();
        // "ada" is not a column, so it resolves to the string literal and
        // matches the name column.
        let e = Expr::binary(
            Operator::Equal,
            Expr::column("name"),
            Expr::column("ada"),
        );
        assert!(e.eval(&row));
    }

    #[test]
    fn type_mismatch_is_false_not_an_error() {
        let row = row();
        assert!(!cmp("age", Operator::Equal, Value::Str("30".into())).eval(&row));
        assert!(!cmp("name", Operator::Less, Value::I32(1)).eval(&row));
    }

    #[test]
    fn collects_referenced_columns_once() {
        let e = Expr::binary(
            Operator::And,
            cmp("age", Operator::Greater, Value::I32(1)),
            Expr::binary(
                Operator::Or,
                cmp("age", Operator::Less, Value::I32(99)),
                cmp("name", Operator::Equal, Value::Str("x".into())),
            ),
        );
        assert_eq!(e.referenced_columns(), vec!["age".to_string(), "name".to_string()]);
    }

    #[test]
    fn root_probe_only_matches_single_comparisons() {
        let probe = cmp("age", Operator::LessOrEqual, Value::I32(10));
        let (col, op, value) = probe.root_probe().unwrap();
        assert_eq!(col, "age");
        assert_eq!(op, Operator::LessOrEqual);
        assert_eq!(value, &Value::I32(10));

        let anded = Expr::binary(Operator::And, probe.clone(), probe.clone());
        assert!(anded.root_probe().is_none());
    }
}
