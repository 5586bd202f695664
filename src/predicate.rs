//! Predicate Projector (spec.md §4.6): translates a restricted subset of
//! predicates into a textual `AND <expr>` fragment appended to the worker's
//! COPY query for server-side pushdown.

use crate::error::{BridgeError, BridgeResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
        }
    }
}

/// A constant operand. Rendered as a single-quoted SQL literal with embedded
/// quotes and backslashes escaped.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Literal {
    fn as_sql(&self) -> String {
        match self {
            Literal::Int(v) => format!("'{v}'"),
            Literal::Float(v) => format!("'{v}'"),
            Literal::Bool(v) => format!("'{v}'"),
            Literal::Text(v) => format!("'{}'", escape_literal(v)),
        }
    }
}

fn escape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\'' || c == '\\' {
            out.push(c);
        }
        out.push(c);
    }
    out
}

/// One node of a predicate tree. `Unsupported` stands in for anything a
/// caller asked for that this projector doesn't implement (e.g. `LIKE`); it
/// always fails to translate, triggering the local-drop recovery described
/// in spec.md §7.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    IsNull(String),
    IsNotNull(String),
    Compare {
        column: String,
        op: CompareOp,
        value: Literal,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Unsupported(&'static str),
}

/// Translates a single predicate tree to a parenthesized SQL fragment, or
/// `UnsupportedPredicate` if any node in the tree isn't one of the supported
/// kinds.
fn translate(predicate: &Predicate) -> BridgeResult<String> {
    match predicate {
        Predicate::IsNull(col) => Ok(format!("{} IS NULL", quote_ident(col))),
        Predicate::IsNotNull(col) => Ok(format!("{} IS NOT NULL", quote_ident(col))),
        Predicate::Compare { column, op, value } => {
            Ok(format!("{} {} {}", quote_ident(column), op.as_sql(), value.as_sql()))
        }
        Predicate::And(lhs, rhs) => Ok(format!("({} AND {})", translate(lhs)?, translate(rhs)?)),
        Predicate::Or(lhs, rhs) => Ok(format!("({} OR {})", translate(lhs)?, translate(rhs)?)),
        Predicate::Unsupported(kind) => {
            Err(BridgeError::UnsupportedPredicate(format!("unsupported predicate node: {kind}")))
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Translates a set of per-column predicates into one `AND`-joined SQL
/// fragment, dropping (and logging) any predicate tree that fails to
/// translate rather than failing the whole scan.
pub fn project(predicates: &[Predicate]) -> String {
    let clauses: Vec<String> = predicates
        .iter()
        .filter_map(|p| match translate(p) {
            Ok(sql) => Some(sql),
            Err(err) => {
                tracing::warn!(%err, "dropping predicate from pushdown");
                None
            }
        })
        .collect();

    if clauses.is_empty() {
        String::new()
    } else {
        format!(" AND {}", clauses.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_nested_and_or() {
        let predicate = Predicate::And(
            Box::new(Predicate::Compare {
                column: "x".into(),
                op: CompareOp::Gt,
                value: Literal::Int(10),
            }),
            Box::new(Predicate::Or(
                Box::new(Predicate::IsNull("y".into())),
                Box::new(Predicate::Compare {
                    column: "z".into(),
                    op: CompareOp::Eq,
                    value: Literal::Text("a".into()),
                }),
            )),
        );

        let sql = project(&[predicate]);
        assert_eq!(sql, " AND (\"x\" > '10' AND (\"y\" IS NULL OR \"z\" = 'a'))");
    }

    #[test]
    fn drops_unsupported_predicate_silently() {
        let sql = project(&[Predicate::Unsupported("LIKE")]);
        assert_eq!(sql, "");
    }

    #[test]
    fn keeps_supported_predicates_when_one_is_dropped() {
        let supported = Predicate::Compare {
            column: "a".into(),
            op: CompareOp::Eq,
            value: Literal::Int(1),
        };
        let sql = project(&[supported, Predicate::Unsupported("LIKE")]);
        assert_eq!(sql, " AND \"a\" = '1'");
    }

    #[test]
    fn escapes_quotes_and_backslashes() {
        let lit = Literal::Text("it's a \\test".into());
        assert_eq!(lit.as_sql(), "'it''s a \\\\test'");
    }
}
