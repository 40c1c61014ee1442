//! 校验规则领域模型

use crate::error::{Result, RuleError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 校验规则定义
///
/// `referenced_fields` 由服务端根据 `code` 计算，调用方提交的值会被覆盖。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: Uuid,
    pub type_id: Uuid,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub code: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_message_label: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    /// 逗号拼接的字段列表
    #[serde(default)]
    pub referenced_fields: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl ValidationRule {
    pub fn new(type_id: Uuid, name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_id,
            name: name.into(),
            active: true,
            code: code.into(),
            error_message: None,
            error_message_label: None,
            is_system: false,
            referenced_fields: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.error_message_label = Some(label.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// 拆分后的依赖字段列表，空串视为无依赖
    pub fn referenced_field_list(&self) -> Vec<String> {
        self.referenced_fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn set_referenced_fields(&mut self, fields: &BTreeSet<String>) {
        self.referenced_fields = fields.iter().cloned().collect::<Vec<_>>().join(",");
    }

    /// 非空的字面错误信息
    pub fn usable_message(&self) -> Option<&str> {
        self.error_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    /// 非空的标签键
    pub fn usable_label(&self) -> Option<&str> {
        self.error_message_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

/// 规则未通过时产生的错误，`message` 与 `message_label` 只会有一个
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValidationRuleError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_label: Option<String>,
}

impl ValidationRuleError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            message_label: None,
        }
    }

    pub fn label(label: impl Into<String>) -> Self {
        Self {
            message: None,
            message_label: Some(label.into()),
        }
    }
}

/// 引用字段尚未初始化时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UninitializedFieldsMode {
    /// 跳过该规则
    #[default]
    Ignore,
    /// 忽略初始化检查，照常求值
    Evaluate,
    /// 返回"无法求值"错误
    Fail,
}

impl FromStr for UninitializedFieldsMode {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IGNORE" => Ok(Self::Ignore),
            "EVALUATE" => Ok(Self::Evaluate),
            "FAIL" => Ok(Self::Fail),
            other => Err(RuleError::Configuration(format!(
                "不支持的未初始化字段模式: '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for UninitializedFieldsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => write!(f, "IGNORE"),
            Self::Evaluate => write!(f, "EVALUATE"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// 待校验的记录实例
///
/// 字段是否已初始化以键是否存在为准，显式的 `null` 也算已赋值。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: Map<String, Value>,
}

impl Record {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// 从 JSON 对象创建，非对象视为配置错误
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            other => Err(RuleError::Configuration(format!(
                "记录必须是 JSON 对象，实际为 {}",
                other
            ))),
        }
    }

    pub fn is_set(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.values.insert(field.into(), value);
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}
