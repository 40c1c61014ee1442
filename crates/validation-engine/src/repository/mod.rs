//! 持久化接口
//!
//! 服务层只依赖这里的 trait，内存实现用于测试和嵌入式场景，PostgreSQL 实现用于部署。

mod memory;
mod postgres;

pub use memory::{InMemoryLabelStore, InMemoryRuleRepository};
pub use postgres::{PgLabelStore, PgRuleRepository, PgSchemaLoader};

use crate::error::Result;
use crate::models::ValidationRule;
use async_trait::async_trait;
use uuid::Uuid;

/// 规则查询条件，未设置的条件不参与过滤
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFilter {
    pub type_id: Option<Uuid>,
    pub active: Option<bool>,
    pub name: Option<String>,
}

impl RuleFilter {
    pub fn by_type(type_id: Uuid) -> Self {
        Self {
            type_id: Some(type_id),
            ..Default::default()
        }
    }

    pub fn active_only(mut self) -> Self {
        self.active = Some(true);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn matches(&self, rule: &ValidationRule) -> bool {
        self.type_id.is_none_or(|t| t == rule.type_id)
            && self.active.is_none_or(|a| a == rule.active)
            && self.name.as_deref().is_none_or(|n| n == rule.name)
    }
}

/// 校验规则仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<ValidationRule>>;

    /// 按条件查询，结果按名称排序
    async fn find(&self, filter: RuleFilter) -> Result<Vec<ValidationRule>>;

    async fn upsert(&self, rule: &ValidationRule) -> Result<()>;

    /// 删除规则，返回是否存在
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// 多语言标签存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelStore: Send + Sync {
    async fn label_exists(&self, key: &str) -> Result<bool>;
}
