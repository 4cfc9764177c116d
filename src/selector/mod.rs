//! Label and field selector expressions
//!
//! Scripts build expressions through the DSL classes in [`dsl`]; this module
//! holds the plain data and the rendering into the API's selector syntax:
//!
//! - labels: `app in (a, b),tier notin (x),owner,team=core`
//! - fields: `status.phase==Running,spec.nodeName!=node-1`

pub mod dsl;

use std::fmt;

use crate::bridge::{BridgeError, Result};
use crate::kubernetes::field_selectors::{FieldSelector, FieldSelectorOperator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    PresenceOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    Label,
    Field,
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorKind::Label => write!(f, "label"),
            SelectorKind::Field => write!(f, "field"),
        }
    }
}

/// One key/operator/values constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: Vec<String>,
}

impl Expression {
    pub fn new(key: impl Into<String>, operator: Operator, values: Vec<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(BridgeError::argument("selector key must not be blank"));
        }
        match operator {
            Operator::PresenceOnly if !values.is_empty() => {
                return Err(BridgeError::argument(format!(
                    "presence check on '{}' takes no values",
                    key
                )));
            }
            Operator::PresenceOnly => {}
            _ if values.is_empty() => {
                return Err(BridgeError::argument(format!(
                    "'{}' needs at least one value",
                    key
                )));
            }
            _ => {}
        }
        Ok(Self {
            key,
            operator,
            values,
        })
    }

    fn render_label(&self) -> String {
        let set = |op: &str| format!("{} {} ({})", self.key, op, self.values.join(", "));
        match self.operator {
            Operator::In => set("in"),
            Operator::NotIn => set("notin"),
            Operator::Equals if self.values.len() == 1 => format!("{}={}", self.key, self.values[0]),
            Operator::Equals => set("in"),
            Operator::NotEquals if self.values.len() == 1 => {
                format!("{}!={}", self.key, self.values[0])
            }
            Operator::NotEquals => set("notin"),
            Operator::PresenceOnly => self.key.clone(),
        }
    }

    fn field_terms(&self) -> Result<Vec<FieldSelector>> {
        let operator = match self.operator {
            Operator::Equals | Operator::In => FieldSelectorOperator::Equals,
            Operator::NotEquals | Operator::NotIn => FieldSelectorOperator::NotEquals,
            Operator::PresenceOnly => {
                return Err(BridgeError::argument(format!(
                    "field selectors cannot test for presence of '{}'",
                    self.key
                )));
            }
        };
        Ok(self
            .values
            .iter()
            .map(|v| FieldSelector {
                path: self.key.clone(),
                operator,
                value: v.clone(),
            })
            .collect())
    }
}

/// Render expressions into the wire-format selector string
pub fn render(kind: SelectorKind, expressions: &[Expression]) -> Result<String> {
    match kind {
        SelectorKind::Label => Ok(expressions
            .iter()
            .map(Expression::render_label)
            .collect::<Vec<_>>()
            .join(",")),
        SelectorKind::Field => {
            let mut terms = Vec::new();
            for expr in expressions {
                terms.extend(expr.field_terms()?.iter().map(FieldSelector::to_k8s_string));
            }
            Ok(terms.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(key: &str, op: Operator, values: &[&str]) -> Expression {
        Expression::new(key, op, values.iter().map(|v| v.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_label_rendering() {
        let exprs = vec![
            expr("app", Operator::In, &["a", "b"]),
            expr("tier", Operator::PresenceOnly, &[]),
        ];
        assert_eq!(
            render(SelectorKind::Label, &exprs).unwrap(),
            "app in (a, b),tier"
        );
    }

    #[test]
    fn test_label_equality_forms() {
        let exprs = vec![
            expr("team", Operator::Equals, &["core"]),
            expr("env", Operator::NotEquals, &["dev"]),
            expr("zone", Operator::Equals, &["a", "b"]),
            expr("owner", Operator::NotIn, &["bob"]),
        ];
        assert_eq!(
            render(SelectorKind::Label, &exprs).unwrap(),
            "team=core,env!=dev,zone in (a, b),owner notin (bob)"
        );
    }

    #[test]
    fn test_field_rendering() {
        let exprs = vec![
            expr("status.phase", Operator::Equals, &["Running"]),
            expr("spec.nodeName", Operator::NotIn, &["n1", "n2"]),
        ];
        assert_eq!(
            render(SelectorKind::Field, &exprs).unwrap(),
            "status.phase==Running,spec.nodeName!=n1,spec.nodeName!=n2"
        );
    }

    #[test]
    fn test_field_presence_rejected() {
        let exprs = vec![expr("status.phase", Operator::PresenceOnly, &[])];
        assert!(render(SelectorKind::Field, &exprs).is_err());
    }

    #[test]
    fn test_empty_renders_empty() {
        assert_eq!(render(SelectorKind::Label, &[]).unwrap(), "");
        assert_eq!(render(SelectorKind::Field, &[]).unwrap(), "");
    }

    #[test]
    fn test_expression_validation() {
        assert!(Expression::new("app", Operator::In, vec![]).is_err());
        assert!(Expression::new("app", Operator::PresenceOnly, vec!["x".into()]).is_err());
        assert!(Expression::new("  ", Operator::PresenceOnly, vec![]).is_err());
    }
}
