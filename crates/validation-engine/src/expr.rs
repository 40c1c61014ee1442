//! 目标表达式的语法树与运行期取值

use crate::error::{Result, RuleError};
use crate::operators::SupportFunction;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// 字段访问链的根
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRoot {
    /// 显式记录变量，如 `record`
    Record(String),
    /// 隐式键值存储中的键，如 `lookup("page")`
    Lookup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Add,
    Sub,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Add => "+",
            Self::Sub => "-",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(RelValue),
    Access {
        root: AccessRoot,
        path: Vec<String>,
    },
    Call {
        function: SupportFunction,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// 表达式中出现的记录变量名
    pub fn record_roots(&self) -> Vec<&str> {
        let mut roots = Vec::new();
        self.collect_roots(&mut roots);
        roots
    }

    fn collect_roots<'a>(&'a self, roots: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Access { root, .. } => {
                if let AccessRoot::Record(var) = root {
                    roots.push(var.as_str());
                }
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_roots(roots)),
            Expr::Not(inner) | Expr::Negate(inner) => inner.collect_roots(roots),
            Expr::Binary { left, right, .. } => {
                left.collect_roots(roots);
                right.collect_roots(roots);
            }
        }
    }

    /// 是否访问了隐式键值存储
    pub fn uses_lookup(&self) -> bool {
        match self {
            Expr::Literal(_) => false,
            Expr::Access { root, .. } => matches!(root, AccessRoot::Lookup(_)),
            Expr::Call { args, .. } => args.iter().any(Expr::uses_lookup),
            Expr::Not(inner) | Expr::Negate(inner) => inner.uses_lookup(),
            Expr::Binary { left, right, .. } => left.uses_lookup() || right.uses_lookup(),
        }
    }
}

/// 求值过程中的值
#[derive(Debug, Clone, PartialEq)]
pub enum RelValue {
    Null,
    Bool(bool),
    Number(Decimal),
    Text(String),
    List(Vec<RelValue>),
    Object(Map<String, Value>),
}

impl RelValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// JSON 数字必须能以十进制数表示，超出范围时报执行错误
    pub fn from_json(value: &Value) -> Result<Self> {
        let value = match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => {
                let number = parse_decimal(&n.to_string())
                    .ok_or_else(|| RuleError::ExecutionError(format!("数值超出范围: {}", n)))?;
                Self::Number(number)
            }
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(items) => Self::List(
                items
                    .iter()
                    .map(Self::from_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(map) => Self::Object(map.clone()),
        };
        Ok(value)
    }
}

impl fmt::Display for RelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n.normalize()),
            Self::Text(s) => write!(f, "{}", s),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Object(map) => write!(f, "{}", Value::Object(map.clone())),
        }
    }
}

/// 解析十进制数，兼容科学计数法
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .ok()
        .or_else(|| Decimal::from_scientific(text).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_numbers_become_decimals() {
        assert_eq!(
            RelValue::from_json(&json!(100)).unwrap(),
            RelValue::Number(Decimal::from(100))
        );
        assert_eq!(
            RelValue::from_json(&json!(0.1)).unwrap(),
            RelValue::Number(Decimal::from_str("0.1").unwrap())
        );
        assert_eq!(parse_decimal("1e3"), Some(Decimal::from(1000)));
        assert_eq!(parse_decimal("abc"), None);
    }

    #[test]
    fn test_out_of_range_number_is_not_text() {
        let err = RelValue::from_json(&json!(1e30)).unwrap_err();
        assert!(matches!(err, RuleError::ExecutionError(ref m) if m.contains("超出范围")));

        assert!(RelValue::from_json(&json!([1, 1e30])).is_err());
        assert_eq!(
            RelValue::from_json(&json!(["a", null])).unwrap(),
            RelValue::List(vec![RelValue::Text("a".into()), RelValue::Null])
        );
    }

    #[test]
    fn test_record_roots() {
        let expr = Expr::Binary {
            op: BinaryOp::And,
            left: Box::new(Expr::Access {
                root: AccessRoot::Record("record".into()),
                path: vec!["a".into()],
            }),
            right: Box::new(Expr::Access {
                root: AccessRoot::Lookup("page".into()),
                path: vec![],
            }),
        };
        assert_eq!(expr.record_roots(), vec!["record"]);
        assert!(expr.uses_lookup());
    }
}
