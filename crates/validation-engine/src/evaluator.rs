//! 表达式求值器
//!
//! 实现运行时支持函数 `rel::*`。比较函数先尝试按十进制数比较，再尝试按时间比较；
//! 与 `null` 比较总是得到确定的结果，只有两侧都不是数值或时间时才报类型错误。

use crate::error::{Result, RuleError};
use crate::expr::{AccessRoot, BinaryOp, Expr, RelValue, parse_decimal};
use crate::models::Record;
use crate::operators::SupportFunction;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::cmp::Ordering;

/// 求值作用域
pub struct Scope<'a> {
    record_var: &'a str,
    record: &'a Record,
}

impl<'a> Scope<'a> {
    pub fn for_record(record_var: &'a str, record: &'a Record) -> Self {
        Self { record_var, record }
    }
}

/// 对条件求值，结果必须是布尔值
pub fn evaluate_condition(expr: &Expr, scope: &Scope<'_>) -> Result<bool> {
    match evaluate(expr, scope)? {
        RelValue::Bool(b) => Ok(b),
        other => Err(RuleError::type_mismatch("boolean", other.type_name())),
    }
}

pub fn evaluate(expr: &Expr, scope: &Scope<'_>) -> Result<RelValue> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Access { root, path } => resolve_access(root, path, scope),
        Expr::Call { function, args } => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, scope))
                .collect::<Result<Vec<_>>>()?;
            call(*function, &values)
        }
        Expr::Not(inner) => Ok(RelValue::Bool(!expect_bool(&evaluate(inner, scope)?)?)),
        Expr::Negate(inner) => match evaluate(inner, scope)? {
            RelValue::Number(n) => Ok(RelValue::Number(-n)),
            other => Err(RuleError::type_mismatch("number", other.type_name())),
        },
        Expr::Binary { op, left, right } => match op {
            // 短路求值
            BinaryOp::And => {
                if !expect_bool(&evaluate(left, scope)?)? {
                    return Ok(RelValue::Bool(false));
                }
                Ok(RelValue::Bool(expect_bool(&evaluate(right, scope)?)?))
            }
            BinaryOp::Or => {
                if expect_bool(&evaluate(left, scope)?)? {
                    return Ok(RelValue::Bool(true));
                }
                Ok(RelValue::Bool(expect_bool(&evaluate(right, scope)?)?))
            }
            BinaryOp::Add => add(evaluate(left, scope)?, evaluate(right, scope)?),
            BinaryOp::Sub => match (evaluate(left, scope)?, evaluate(right, scope)?) {
                (RelValue::Number(a), RelValue::Number(b)) => a
                    .checked_sub(b)
                    .map(RelValue::Number)
                    .ok_or_else(|| overflow(a, "-", b)),
                (a, b) => Err(RuleError::type_mismatch(
                    "number - number",
                    format!("{} - {}", a.type_name(), b.type_name()),
                )),
            },
        },
    }
}

fn resolve_access(root: &AccessRoot, path: &[String], scope: &Scope<'_>) -> Result<RelValue> {
    let (first, rest) = match root {
        AccessRoot::Record(var) => {
            if var != scope.record_var {
                return Err(RuleError::ExecutionError(format!("未定义的变量 '{}'", var)));
            }
            let (field, rest) = path
                .split_first()
                .ok_or_else(|| RuleError::ExecutionError(format!("变量 '{}' 缺少字段访问", var)))?;
            (scope.record.get(field), rest)
        }
        AccessRoot::Lookup(key) => {
            return Err(RuleError::ExecutionError(format!(
                "校验规则不能访问键值存储 '{}'",
                key
            )));
        }
    };

    let mut current = RelValue::from_json(first.unwrap_or(&Value::Null))?;
    for segment in rest {
        current = get_member(current, segment)?;
    }
    Ok(current)
}

/// 访问器 `.get("seg")`：对象取成员，`null` 继续为 `null`，
/// 以字符串保存的引用在访问 `id` 时返回自身
fn get_member(value: RelValue, segment: &str) -> Result<RelValue> {
    match value {
        RelValue::Null => Ok(RelValue::Null),
        RelValue::Object(map) => map
            .get(segment)
            .map_or(Ok(RelValue::Null), RelValue::from_json),
        RelValue::Text(id) if segment == crate::schema::ID_FIELD => Ok(RelValue::Text(id)),
        other => Err(RuleError::type_mismatch("object", other.type_name())),
    }
}

fn call(function: SupportFunction, args: &[RelValue]) -> Result<RelValue> {
    if args.len() != function.arity() {
        return Err(RuleError::ExecutionError(format!(
            "{} 需要 {} 个参数，实际 {} 个",
            function,
            function.arity(),
            args.len()
        )));
    }

    let value = match function {
        SupportFunction::Gt => compare(&args[0], &args[1], Ordering::is_gt)?,
        SupportFunction::Ge => compare(&args[0], &args[1], Ordering::is_ge)?,
        SupportFunction::Lt => compare(&args[0], &args[1], Ordering::is_lt)?,
        SupportFunction::Le => compare(&args[0], &args[1], Ordering::is_le)?,
        SupportFunction::Eq => eq(&args[0], &args[1]),
        SupportFunction::IsEmpty => is_empty(&args[0]),
        SupportFunction::IsNull => args[0].is_null(),
        SupportFunction::IsNotNull => !args[0].is_null(),
        SupportFunction::Not => !expect_bool(&args[0])?,
        SupportFunction::Length => return length(&args[0]),
    };
    Ok(RelValue::Bool(value))
}

/// 相等比较，不会报错
pub fn eq(a: &RelValue, b: &RelValue) -> bool {
    match (a, b) {
        (RelValue::Null, RelValue::Null) => true,
        (RelValue::Null, _) | (_, RelValue::Null) => false,
        _ => {
            if let (Some(x), Some(y)) = (as_decimal(a), as_decimal(b)) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (as_datetime(a), as_datetime(b)) {
                return x == y;
            }
            a == b
        }
    }
}

/// 大小比较
///
/// 数值对或时间对按值比较；仅一侧为 `null` 且另一侧可比较时为 false；
/// 其余组合（文本、布尔、两侧都为 `null`、数值对时间）为类型错误。
pub fn compare<F>(a: &RelValue, b: &RelValue, accept: F) -> Result<bool>
where
    F: Fn(Ordering) -> bool,
{
    if let (Some(x), Some(y)) = (as_decimal(a), as_decimal(b)) {
        return Ok(accept(x.cmp(&y)));
    }
    if let (Some(x), Some(y)) = (as_datetime(a), as_datetime(b)) {
        return Ok(accept(x.cmp(&y)));
    }

    let comparable = |v: &RelValue| as_decimal(v).is_some() || as_datetime(v).is_some();
    match (a, b) {
        (RelValue::Null, other) | (other, RelValue::Null) if comparable(other) => Ok(false),
        _ => Err(RuleError::type_mismatch(
            "number or date",
            format!("{} and {}", a.type_name(), b.type_name()),
        )),
    }
}

fn is_empty(value: &RelValue) -> bool {
    match value {
        RelValue::Null => true,
        RelValue::Text(s) => s.is_empty(),
        RelValue::List(items) => items.is_empty(),
        RelValue::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn length(value: &RelValue) -> Result<RelValue> {
    let len = match value {
        RelValue::Text(s) => s.chars().count(),
        RelValue::List(items) => items.len(),
        other => return Err(RuleError::type_mismatch("text or list", other.type_name())),
    };
    Ok(RelValue::Number(Decimal::from(len)))
}

fn add(a: RelValue, b: RelValue) -> Result<RelValue> {
    match (a, b) {
        (RelValue::Number(x), RelValue::Number(y)) => x
            .checked_add(y)
            .map(RelValue::Number)
            .ok_or_else(|| overflow(x, "+", y)),
        (RelValue::Text(x), y @ (RelValue::Text(_) | RelValue::Number(_) | RelValue::Bool(_))) => {
            Ok(RelValue::Text(format!("{}{}", x, y)))
        }
        (x @ (RelValue::Number(_) | RelValue::Bool(_)), RelValue::Text(y)) => {
            Ok(RelValue::Text(format!("{}{}", x, y)))
        }
        (x, y) => Err(RuleError::type_mismatch(
            "number + number or text + text",
            format!("{} + {}", x.type_name(), y.type_name()),
        )),
    }
}

fn overflow(a: Decimal, op: &str, b: Decimal) -> RuleError {
    RuleError::ExecutionError(format!("数值溢出: {} {} {}", a, op, b))
}

fn expect_bool(value: &RelValue) -> Result<bool> {
    match value {
        RelValue::Bool(b) => Ok(*b),
        other => Err(RuleError::type_mismatch("boolean", other.type_name())),
    }
}

/// 数值强制转换：数字，或可解析为数字的文本
fn as_decimal(value: &RelValue) -> Option<Decimal> {
    match value {
        RelValue::Number(n) => Some(*n),
        RelValue::Text(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

/// 时间强制转换：RFC 3339 或 `YYYY-MM-DD`
fn as_datetime(value: &RelValue) -> Option<DateTime<Utc>> {
    let RelValue::Text(s) = value else {
        return None;
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
