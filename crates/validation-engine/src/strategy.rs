//! 变量解析策略
//!
//! 把 REL 中的裸标识符翻译成目标表达式，并报告它是否引用了类型字段。
//! 内置两种策略：
//! - [`RecordBound`]：以显式记录变量为根的访问链，用于校验规则
//! - [`KeyedStoreBound`]：首段作为键到隐式键值存储中查找，用于模板插值

use crate::error::{Result, RuleError};
use crate::schema::{ID_FIELD, SchemaType};
use crate::tokenizer::DEFAULT_QUOTE;
use serde::{Deserialize, Serialize};

/// 单个 token 的翻译结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableTranslation {
    pub target_expression: String,
    /// 引用的顶层字段名，字面量和 `null` 为 None
    pub referenced_field: Option<String>,
}

impl VariableTranslation {
    fn literal(target_expression: impl Into<String>) -> Self {
        Self {
            target_expression: target_expression.into(),
            referenced_field: None,
        }
    }

    pub fn is_schema_field(&self) -> bool {
        self.referenced_field.is_some()
    }
}

pub trait VariableStrategy: Send + Sync {
    /// 翻译一个标识符 token
    ///
    /// `check_fields` 为 true 时，去掉 `.id` 后缀后的名称必须是 `schema` 上的字段，
    /// 否则返回语法错误。
    fn translate(
        &self,
        token: &str,
        record_var: Option<&str>,
        check_fields: bool,
        schema: Option<&SchemaType>,
    ) -> Result<VariableTranslation>;
}

/// 策略选择，供 API 层按名称挑选
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Record,
    KeyedStore,
}

impl StrategyKind {
    pub fn build(&self, quote: char) -> Box<dyn VariableStrategy> {
        match self {
            Self::Record => Box::new(RecordBound::new(quote)),
            Self::KeyedStore => Box::new(KeyedStoreBound::new(quote)),
        }
    }
}

/// 以记录变量为根：`amount` -> `record.get("amount")`
#[derive(Debug, Clone, Copy)]
pub struct RecordBound {
    quote: char,
}

impl RecordBound {
    pub fn new(quote: char) -> Self {
        Self { quote }
    }
}

impl Default for RecordBound {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTE)
    }
}

impl VariableStrategy for RecordBound {
    fn translate(
        &self,
        token: &str,
        record_var: Option<&str>,
        check_fields: bool,
        schema: Option<&SchemaType>,
    ) -> Result<VariableTranslation> {
        if let Some(literal) = translate_literal(token, self.quote) {
            return Ok(literal);
        }

        let record_var = record_var
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RuleError::Configuration("记录变量名未提供".to_string()))?;

        let segments = split_path(token)?;
        let referenced_field = resolve_field(&segments, check_fields, schema)?;

        let mut target = record_var.to_string();
        for segment in &segments {
            target.push_str(&format!(".get({})", quote_string(segment)));
        }

        Ok(VariableTranslation {
            target_expression: target,
            referenced_field: Some(referenced_field),
        })
    }
}

/// 以隐式键值存储为根：`page.title` -> `lookup("page").get("title")`
#[derive(Debug, Clone, Copy)]
pub struct KeyedStoreBound {
    quote: char,
}

impl KeyedStoreBound {
    pub fn new(quote: char) -> Self {
        Self { quote }
    }
}

impl Default for KeyedStoreBound {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTE)
    }
}

impl VariableStrategy for KeyedStoreBound {
    fn translate(
        &self,
        token: &str,
        record_var: Option<&str>,
        check_fields: bool,
        schema: Option<&SchemaType>,
    ) -> Result<VariableTranslation> {
        if let Some(literal) = translate_literal(token, self.quote) {
            return Ok(literal);
        }

        if let Some(var) = record_var.filter(|v| !v.is_empty()) {
            return Err(RuleError::Configuration(format!(
                "键值存储策略自带根对象，不能指定记录变量 '{}'",
                var
            )));
        }

        let segments = split_path(token)?;
        let referenced_field = resolve_field(&segments, check_fields, schema)?;

        let mut target = format!("lookup({})", quote_string(&segments[0]));
        for segment in &segments[1..] {
            target.push_str(&format!(".get({})", quote_string(segment)));
        }

        Ok(VariableTranslation {
            target_expression: target,
            referenced_field: Some(referenced_field),
        })
    }
}

/// 字符串字面量与 `null`
fn translate_literal(token: &str, quote: char) -> Option<VariableTranslation> {
    if token == "null" {
        return Some(VariableTranslation::literal("null"));
    }

    let inner = token
        .strip_prefix(quote)
        .and_then(|rest| rest.strip_suffix(quote))
        .filter(|_| token.chars().count() >= 2)?;

    Some(VariableTranslation::literal(quote_string(&unescape(
        inner, quote,
    ))))
}

fn unescape(raw: &str, quote: char) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if next == quote || next == '\\' {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// 渲染为目标语言的双引号字符串字面量
pub fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn split_path(token: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = token.split('.').collect();
    for segment in &segments {
        if !is_identifier(segment) {
            return Err(RuleError::Syntax(format!("无效的标识符: '{}'", token)));
        }
    }
    Ok(segments)
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 校验路径并返回引用的顶层字段名
///
/// 只接受顶层字段或 `<字段>.id` 两级路径。
fn resolve_field(
    segments: &[&str],
    check_fields: bool,
    schema: Option<&SchemaType>,
) -> Result<String> {
    let root = segments[0];
    if !check_fields {
        return Ok(root.to_string());
    }

    let path = segments.join(".");
    let schema = schema
        .ok_or_else(|| RuleError::Configuration("字段校验需要提供对象类型".to_string()))?;

    match segments.len() {
        1 => {}
        2 if segments[1] == ID_FIELD => {}
        2 => {
            return Err(RuleError::Syntax(format!(
                "字段 '{}' 无效: 关联字段只能访问 '{}'",
                path, ID_FIELD
            )));
        }
        _ => {
            return Err(RuleError::Syntax(format!(
                "字段 '{}' 无效: 不支持两级以上的路径",
                path
            )));
        }
    }

    if schema.field(root).is_none() {
        return Err(RuleError::Syntax(format!(
            "字段 '{}' 在类型 '{}' 上不存在",
            root, schema.api_name
        )));
    }

    Ok(root.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    fn schema() -> SchemaType {
        SchemaType::new("a01", "Account")
            .with_field("a", FieldKind::Number)
            .with_field("b", FieldKind::Reference)
    }

    #[test]
    fn test_record_bound_getter_chain() {
        let strategy = RecordBound::default();
        let schema = schema();

        let result = strategy
            .translate("a", Some("record"), true, Some(&schema))
            .unwrap();
        assert_eq!(result.target_expression, r#"record.get("a")"#);
        assert_eq!(result.referenced_field.as_deref(), Some("a"));

        let result = strategy
            .translate("b.id", Some("rec"), true, Some(&schema))
            .unwrap();
        assert_eq!(result.target_expression, r#"rec.get("b").get("id")"#);
        assert_eq!(result.referenced_field.as_deref(), Some("b"));
    }

    #[test]
    fn test_record_bound_rejects_unknown_and_deep_paths() {
        let strategy = RecordBound::default();
        let schema = schema();

        for token in ["c", "b.name", "b.id.x"] {
            let err = strategy
                .translate(token, Some("record"), true, Some(&schema))
                .unwrap_err();
            assert!(matches!(err, RuleError::Syntax(_)), "token {}", token);
        }
    }

    #[test]
    fn test_record_bound_requires_record_var() {
        let err = RecordBound::default()
            .translate("a", None, false, None)
            .unwrap_err();
        assert!(matches!(err, RuleError::Configuration(_)));
    }

    #[test]
    fn test_literals_are_not_fields() {
        let strategy = RecordBound::default();

        let result = strategy.translate("'x'", Some("record"), true, None).unwrap();
        assert_eq!(result.target_expression, "\"x\"");
        assert!(!result.is_schema_field());

        let result = strategy
            .translate(r#"'say "hi"\'s'"#, Some("record"), true, None)
            .unwrap();
        assert_eq!(result.target_expression, r#""say \"hi\"'s""#);

        let result = strategy.translate("null", None, true, None).unwrap();
        assert_eq!(result.target_expression, "null");
        assert!(!result.is_schema_field());
    }

    #[test]
    fn test_keyed_store_bound() {
        let strategy = KeyedStoreBound::default();

        let result = strategy.translate("page.title", None, false, None).unwrap();
        assert_eq!(result.target_expression, r#"lookup("page").get("title")"#);
        assert_eq!(result.referenced_field.as_deref(), Some("page"));

        let err = strategy
            .translate("page", Some("record"), false, None)
            .unwrap_err();
        assert!(matches!(err, RuleError::Configuration(_)));
    }

    #[test]
    fn test_unchecked_paths_allow_any_depth() {
        let result = RecordBound::default()
            .translate("owner.account.name", Some("record"), false, None)
            .unwrap();
        assert_eq!(result.referenced_field.as_deref(), Some("owner"));
    }

    #[test]
    fn test_invalid_identifier() {
        let err = RecordBound::default()
            .translate("a..b", Some("record"), false, None)
            .unwrap_err();
        assert!(matches!(err, RuleError::Syntax(_)));
    }
}
