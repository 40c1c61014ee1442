//! 规则聚合与执行器源码生成
//!
//! 一个对象类型的全部启用规则合并为一个执行器：每条规则一个带初始化守卫的方法，
//! 外加一个依次调用所有规则方法的分发入口。

use crate::error::{Result, RuleError};
use crate::models::{ValidationRule, ValidationRuleError};
use crate::schema::SchemaType;
use crate::strategy::{RecordBound, quote_string};
use crate::translator::{TranslateOptions, translate};
use serde::Serialize;
use uuid::Uuid;

/// 执行器名称后缀
pub const EXECUTOR_SUFFIX: &str = "RuleExecutor";

/// 由类型键前缀派生的执行器名称
pub fn executor_name(key_prefix: &str) -> String {
    format!("{}{}", key_prefix, EXECUTOR_SUFFIX)
}

/// 规则未通过时的错误模板，标签优先于字面信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ErrorTemplate {
    Message(String),
    Label(String),
}

impl ErrorTemplate {
    pub fn for_rule(rule: &ValidationRule) -> Result<Self> {
        if let Some(label) = rule.usable_label() {
            return Ok(Self::Label(label.to_string()));
        }
        rule.usable_message()
            .map(|m| Self::Message(m.to_string()))
            .ok_or_else(|| {
                RuleError::Configuration(format!("规则 '{}' 缺少错误信息", rule.name))
            })
    }

    pub fn to_error(&self) -> ValidationRuleError {
        match self {
            Self::Message(m) => ValidationRuleError::message(m.clone()),
            Self::Label(l) => ValidationRuleError::label(l.clone()),
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Message(m) => format!("message({})", quote_string(m)),
            Self::Label(l) => format!("label({})", quote_string(l)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMethodSource {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub method_name: String,
    /// 守卫检查的字段，全部已初始化才对条件求值
    pub guard_fields: Vec<String>,
    /// 翻译后的条件表达式
    pub condition: String,
    pub error: ErrorTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutorSource {
    pub artifact_name: String,
    pub type_id: Uuid,
    pub type_key: String,
    pub record_var: String,
    pub rules: Vec<RuleMethodSource>,
}

impl ExecutorSource {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 渲染为文本清单
    pub fn render(&self) -> String {
        self.render_with_lines().0
    }

    /// 渲染文本清单，并返回每条规则条件所在的行号（从 1 开始）
    pub fn render_with_lines(&self) -> (String, Vec<usize>) {
        let mut lines = vec![
            format!("// {} {}", self.type_key, self.type_id),
            format!("executor {} {{", self.artifact_name),
            format!("    record {}", self.record_var),
        ];
        let mut condition_lines = Vec::with_capacity(self.rules.len());

        for rule in &self.rules {
            let guard = rule
                .guard_fields
                .iter()
                .map(|f| format!("isSet({})", quote_string(f)))
                .collect::<Vec<_>>()
                .join(" && ");

            lines.push(String::new());
            lines.push(format!("    rule {} {{", rule.method_name));
            lines.push(format!("        id {}", rule.rule_id));
            lines.push(format!("        guard {}", guard));
            lines.push(format!("        when {}", rule.condition));
            condition_lines.push(lines.len());
            lines.push(format!("        else {}", rule.error.render()));
            lines.push("    }".to_string());
        }

        let methods = self
            .rules
            .iter()
            .map(|r| r.method_name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(String::new());
        lines.push(format!("    dispatch [{}]", methods));
        lines.push("}".to_string());

        (lines.join("\n"), condition_lines)
    }
}

/// 为一个类型的启用规则生成执行器源码
///
/// 规则按名称排序，同一规则集总是生成相同的源码。未计算依赖字段的规则无法生成。
pub fn generate(
    schema: &SchemaType,
    rules: &[ValidationRule],
    record_var: &str,
) -> Result<ExecutorSource> {
    let strategy = RecordBound::default();
    let mut active: Vec<&ValidationRule> = rules.iter().filter(|r| r.active).collect();
    active.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

    let mut methods = Vec::with_capacity(active.len());
    for rule in active {
        let guard_fields = rule.referenced_field_list();
        if guard_fields.is_empty() {
            return Err(RuleError::Configuration(format!(
                "规则 '{}' 的依赖字段尚未计算",
                rule.name
            )));
        }

        let translation = translate(
            &rule.code,
            Some(schema),
            TranslateOptions::for_record(record_var),
            &strategy,
        )?;

        methods.push(RuleMethodSource {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            method_name: format!("validate_{}", rule.name),
            guard_fields,
            condition: translation.code,
            error: ErrorTemplate::for_rule(rule)?,
        });
    }

    Ok(ExecutorSource {
        artifact_name: executor_name(&schema.key_prefix),
        type_id: schema.id,
        type_key: schema.key_prefix.clone(),
        record_var: record_var.to_string(),
        rules: methods,
    })
}
