//! 请求与响应 DTO

use crate::models::{ValidationRule, ValidationRuleError};
use crate::service::InitializationReport;
use crate::strategy::StrategyKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;
use validator::Validate;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    pub fn success_empty() -> ApiResponse<()> {
        ApiResponse {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: None,
        }
    }
}

/// 保存规则请求，不带 `id` 时新建
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SaveRuleRequest {
    pub id: Option<Uuid>,
    pub type_id: Uuid,
    #[validate(length(min = 1, max = 80, message = "规则名称长度必须在1-80个字符之间"))]
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[validate(length(min = 1, message = "规则表达式不能为空"))]
    pub code: String,
    pub error_message: Option<String>,
    pub error_message_label: Option<String>,
    /// 为 false 时只保存，不重建执行器
    #[serde(default = "default_true")]
    pub regenerate: bool,
}

fn default_true() -> bool {
    true
}

impl SaveRuleRequest {
    pub fn into_rule(self) -> ValidationRule {
        let mut rule = ValidationRule::new(self.type_id, self.name, self.code);
        if let Some(id) = self.id {
            rule.id = id;
        }
        rule.active = self.active;
        rule.error_message = self.error_message;
        rule.error_message_label = self.error_message_label;
        rule
    }
}

#[derive(Debug, Deserialize)]
pub struct ListRulesQuery {
    pub type_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveRequest {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    pub mode: Option<String>,
}

/// 翻译预览请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    #[validate(length(min = 1, message = "表达式不能为空"))]
    pub code: String,
    /// 提供时按该类型检查字段
    pub type_id: Option<Uuid>,
    #[serde(default)]
    pub strategy: StrategyKind,
    pub record_var: Option<String>,
    #[serde(default = "default_true")]
    pub check_fields: bool,
    #[serde(default = "default_true")]
    pub translate_operators: bool,
    /// 字符串字面量引号，缺省为单引号
    pub quote: Option<char>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDto {
    pub id: Uuid,
    pub type_id: Uuid,
    pub name: String,
    pub active: bool,
    pub code: String,
    pub error_message: Option<String>,
    pub error_message_label: Option<String>,
    pub is_system: bool,
    pub referenced_fields: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ValidationRule> for RuleDto {
    fn from(rule: ValidationRule) -> Self {
        let referenced_fields = rule.referenced_field_list();
        Self {
            id: rule.id,
            type_id: rule.type_id,
            name: rule.name,
            active: rule.active,
            code: rule.code,
            error_message: rule.error_message,
            error_message_label: rule.error_message_label,
            is_system: rule.is_system,
            referenced_fields,
            created_at: rule.created_at,
            updated_at: rule.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResultDto {
    pub valid: bool,
    pub errors: Vec<ValidationRuleError>,
}

impl From<BTreeSet<ValidationRuleError>> for ValidationResultDto {
    fn from(errors: BTreeSet<ValidationRuleError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors: errors.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationDto {
    pub code: String,
    pub referenced_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeFailureDto {
    pub type_key: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationDto {
    pub compiled: Vec<String>,
    pub failed: Vec<TypeFailureDto>,
}

impl From<InitializationReport> for InitializationDto {
    fn from(report: InitializationReport) -> Self {
        Self {
            compiled: report.compiled,
            failed: report
                .failed
                .into_iter()
                .map(|f| TypeFailureDto {
                    type_key: f.type_key,
                    error: f.error,
                })
                .collect(),
        }
    }
}
