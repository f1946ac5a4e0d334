//! Group Expression Parser
//!
//! Report groups carry opaque expressions describing which field they group
//! on. An expression is one of:
//!
//! - a bare field atom (`Field`),
//! - a tuple of 2+ atoms whose last element is the terminal field (`Tuple`),
//! - a reference (`Ref`),
//! - a path access into a nested expression (`GetPath`),
//! - a raw string literal, which is never a valid field reference.
//!
//! `extract_field` folds any recognized shape down to the terminal field
//! atom; `extract_field_path` returns the full segment list.

use serde::Deserialize;
use thiserror::Error;

/// Group-expression parse error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    /// The expression shape is not one of the recognized forms
    #[error("unrecognized group expression format: {0}")]
    UnrecognizedFormat(String),
}

/// An opaque group expression.
///
/// Deserializes from the JSON shapes report definitions use:
/// `{"field": "territory"}`, `{"ref": "territory"}`,
/// `{"tuple": ["orders", "territory"]}`,
/// `{"get_path": {"inner": …, "path": ["customer", "name"]}}`, or a bare
/// JSON string (a literal, which fails field extraction).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupExpr {
    /// A bare field atom.
    Field(String),
    /// A tagged tuple of atoms; the last element is the terminal field.
    Tuple(Vec<GroupExpr>),
    /// A reference to a field atom.
    Ref(String),
    /// Path access: an inner expression plus a trailing segment list.
    GetPath {
        inner: Box<GroupExpr>,
        path: Vec<GroupExpr>,
    },
    /// A raw string. Strings are not field references.
    #[serde(untagged)]
    Literal(String),
}

impl GroupExpr {
    /// The terminal field atom of this expression.
    pub fn extract_field(&self) -> Result<String, ExprError> {
        match self {
            GroupExpr::Field(atom) | GroupExpr::Ref(atom) => Ok(atom.clone()),
            GroupExpr::Tuple(elements) => {
                let atoms = atoms_of(elements)?;
                if atoms.len() < 2 {
                    return Err(ExprError::UnrecognizedFormat(format!(
                        "tuple expression needs at least 2 elements, got {}",
                        atoms.len()
                    )));
                }
                Ok(atoms[atoms.len() - 1].clone())
            }
            GroupExpr::GetPath { path, .. } => {
                let segments = atoms_of(path)?;
                segments.last().cloned().ok_or_else(|| {
                    ExprError::UnrecognizedFormat("get_path with empty path".to_string())
                })
            }
            GroupExpr::Literal(s) => Err(ExprError::UnrecognizedFormat(format!(
                "string literal {s:?} is not a field reference"
            ))),
        }
    }

    /// The full segment path of this expression, terminal atom last.
    pub fn extract_field_path(&self) -> Result<Vec<String>, ExprError> {
        match self {
            GroupExpr::Field(atom) | GroupExpr::Ref(atom) => Ok(vec![atom.clone()]),
            GroupExpr::Tuple(elements) => {
                let atoms = atoms_of(elements)?;
                if atoms.len() < 2 {
                    return Err(ExprError::UnrecognizedFormat(format!(
                        "tuple expression needs at least 2 elements, got {}",
                        atoms.len()
                    )));
                }
                Ok(atoms)
            }
            GroupExpr::GetPath { path, .. } => {
                let segments = atoms_of(path)?;
                if segments.is_empty() {
                    return Err(ExprError::UnrecognizedFormat(
                        "get_path with empty path".to_string(),
                    ));
                }
                Ok(segments)
            }
            GroupExpr::Literal(s) => Err(ExprError::UnrecognizedFormat(format!(
                "string literal {s:?} is not a field reference"
            ))),
        }
    }

    /// Like [`extract_field`](Self::extract_field), but falls back to the
    /// given name instead of failing. Never errors.
    pub fn extract_field_with_fallback(&self, fallback: &str) -> String {
        self.extract_field()
            .unwrap_or_else(|_| fallback.to_string())
    }
}

/// Collect the atoms of a homogeneous element list. Any element that is not a
/// bare atom (or ref) invalidates the whole expression.
fn atoms_of(elements: &[GroupExpr]) -> Result<Vec<String>, ExprError> {
    elements
        .iter()
        .map(|e| match e {
            GroupExpr::Field(atom) | GroupExpr::Ref(atom) => Ok(atom.clone()),
            other => Err(ExprError::UnrecognizedFormat(format!(
                "expected field atom, got {other:?}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(s: &str) -> GroupExpr {
        GroupExpr::Field(s.to_string())
    }

    #[test]
    fn test_bare_atom() {
        assert_eq!(atom("territory").extract_field().as_deref(), Ok("territory"));
        assert_eq!(
            atom("territory").extract_field_path(),
            Ok(vec!["territory".to_string()])
        );
    }

    #[test]
    fn test_ref_expression() {
        let expr = GroupExpr::Ref("customer_name".to_string());
        assert_eq!(expr.extract_field().as_deref(), Ok("customer_name"));
    }

    #[test]
    fn test_tuple_returns_terminal_atom() {
        let expr = GroupExpr::Tuple(vec![atom("orders"), atom("customer"), atom("territory")]);
        assert_eq!(expr.extract_field().as_deref(), Ok("territory"));
        assert_eq!(
            expr.extract_field_path(),
            Ok(vec![
                "orders".to_string(),
                "customer".to_string(),
                "territory".to_string()
            ])
        );
    }

    #[test]
    fn test_tuple_needs_two_elements() {
        let expr = GroupExpr::Tuple(vec![atom("territory")]);
        assert!(expr.extract_field().is_err());
    }

    #[test]
    fn test_tuple_with_invalid_middle_element_fails() {
        let expr = GroupExpr::Tuple(vec![
            atom("orders"),
            GroupExpr::Literal("oops".to_string()),
            atom("territory"),
        ]);
        assert!(expr.extract_field().is_err());
    }

    #[test]
    fn test_get_path() {
        let expr = GroupExpr::GetPath {
            inner: Box::new(GroupExpr::Ref("order".to_string())),
            path: vec![atom("customer"), atom("territory")],
        };
        assert_eq!(expr.extract_field().as_deref(), Ok("territory"));
        assert_eq!(
            expr.extract_field_path(),
            Ok(vec!["customer".to_string(), "territory".to_string()])
        );
    }

    #[test]
    fn test_get_path_empty_fails() {
        let expr = GroupExpr::GetPath {
            inner: Box::new(atom("order")),
            path: vec![],
        };
        assert!(expr.extract_field().is_err());
    }

    #[test]
    fn test_string_input_fails() {
        let expr = GroupExpr::Literal("territory".to_string());
        assert!(expr.extract_field().is_err());
    }

    #[test]
    fn test_fallback_never_fails() {
        let expr = GroupExpr::Literal("bogus".to_string());
        assert_eq!(expr.extract_field_with_fallback("territory"), "territory");

        let ok = atom("region");
        assert_eq!(ok.extract_field_with_fallback("territory"), "region");
    }

    #[test]
    fn test_deserialize_shapes() {
        let field: GroupExpr = serde_json::from_str(r#"{"field": "territory"}"#).unwrap();
        assert_eq!(field, atom("territory"));

        let reference: GroupExpr = serde_json::from_str(r#"{"ref": "territory"}"#).unwrap();
        assert_eq!(reference, GroupExpr::Ref("territory".to_string()));

        let literal: GroupExpr = serde_json::from_str(r#""territory""#).unwrap();
        assert_eq!(literal, GroupExpr::Literal("territory".to_string()));
    }
}
