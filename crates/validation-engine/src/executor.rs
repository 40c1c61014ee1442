//! 编译后的规则执行器
//!
//! 每个对象类型一个执行器。分发入口依次执行每条规则，单条规则的求值错误不会
//! 中断其余规则，而是作为该规则的错误项收集。

use crate::codegen::ErrorTemplate;
use crate::error::Result;
use crate::evaluator::{Scope, evaluate_condition};
use crate::expr::Expr;
use crate::models::{Record, UninitializedFieldsMode, ValidationRuleError};
use std::collections::BTreeSet;
use tracing::{debug, warn};
use uuid::Uuid;

/// 单条规则的可执行形式
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule_id: Uuid,
    pub name: String,
    pub guard_fields: Vec<String>,
    pub condition: Expr,
    pub error: ErrorTemplate,
}

impl CompiledRule {
    /// 未初始化的守卫字段
    fn uninitialized_fields<'a>(&'a self, record: &Record) -> Vec<&'a str> {
        self.guard_fields
            .iter()
            .filter(|f| !record.is_set(f))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct CompiledExecutor {
    name: String,
    type_id: Uuid,
    type_key: String,
    record_var: String,
    rules: Vec<CompiledRule>,
}

impl CompiledExecutor {
    pub fn new(
        name: String,
        type_id: Uuid,
        type_key: String,
        record_var: String,
        rules: Vec<CompiledRule>,
    ) -> Self {
        Self {
            name,
            type_id,
            type_key,
            record_var,
            rules,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> Uuid {
        self.type_id
    }

    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 分发入口：执行全部规则，返回错误集合，空集合表示记录有效
    pub fn run(&self, record: &Record, mode: UninitializedFieldsMode) -> BTreeSet<ValidationRuleError> {
        let mut errors = BTreeSet::new();

        for rule in &self.rules {
            match self.run_rule(rule, record, mode) {
                Ok(Some(error)) => {
                    errors.insert(error);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        executor = %self.name,
                        rule = %rule.name,
                        error = %err,
                        "规则求值失败"
                    );
                    errors.insert(ValidationRuleError::message(format!(
                        "规则 '{}' 无法求值: {}",
                        rule.name, err
                    )));
                }
            }
        }

        errors
    }

    /// 带初始化守卫的单条规则
    fn run_rule(
        &self,
        rule: &CompiledRule,
        record: &Record,
        mode: UninitializedFieldsMode,
    ) -> Result<Option<ValidationRuleError>> {
        let missing = rule.uninitialized_fields(record);
        if !missing.is_empty() {
            match mode {
                UninitializedFieldsMode::Evaluate => {}
                UninitializedFieldsMode::Ignore => {
                    debug!(rule = %rule.name, ?missing, "字段未初始化，跳过规则");
                    return Ok(None);
                }
                UninitializedFieldsMode::Fail => {
                    return Ok(Some(ValidationRuleError::message(format!(
                        "规则 '{}' 无法求值: 字段未初始化 {}",
                        rule.name,
                        missing.join(", ")
                    ))));
                }
            }
        }

        let scope = Scope::for_record(&self.record_var, record);
        if evaluate_condition(&rule.condition, &scope)? {
            Ok(None)
        } else {
            Ok(Some(rule.error.to_error()))
        }
    }
}
