//! 对象类型元数据
//!
//! 类型和字段在运行期创建，校验引擎只通过 [`SchemaCatalog`] 读取它们。

use crate::error::{Result, RuleError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// 标识字段名，两级路径的第二段只允许是它
pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Boolean,
    Reference,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Boolean => "boolean",
            Self::Reference => "reference",
        }
    }
}

impl FromStr for FieldKind {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "number" => Ok(Self::Number),
            "date" => Ok(Self::Date),
            "boolean" => Ok(Self::Boolean),
            "reference" => Ok(Self::Reference),
            other => Err(RuleError::Configuration(format!("未知字段类型: '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub api_name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(api_name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            api_name: api_name.into(),
            kind,
        }
    }
}

/// 对象类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaType {
    pub id: Uuid,
    /// 类型键前缀，执行器名称由它派生
    pub key_prefix: String,
    pub api_name: String,
    pub fields: Vec<FieldDef>,
}

impl SchemaType {
    pub fn new(key_prefix: impl Into<String>, api_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key_prefix: key_prefix.into(),
            api_name: api_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, api_name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef::new(api_name, kind));
        self
    }

    /// 按 API 名称查找字段
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.api_name == name)
    }
}

/// 类型元数据来源
pub trait SchemaCatalog: Send + Sync {
    fn get_type(&self, type_id: Uuid) -> Option<Arc<SchemaType>>;

    fn get_type_by_prefix(&self, key_prefix: &str) -> Option<Arc<SchemaType>>;

    fn list_types(&self) -> Vec<Arc<SchemaType>>;
}

/// 内存中的类型目录
#[derive(Clone, Default)]
pub struct InMemorySchemaCatalog {
    types: Arc<DashMap<Uuid, Arc<SchemaType>>>,
    prefixes: Arc<DashMap<String, Uuid>>,
}

impl InMemorySchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册或替换类型定义
    pub fn register(&self, schema_type: SchemaType) -> Arc<SchemaType> {
        let schema_type = Arc::new(schema_type);
        self.prefixes
            .insert(schema_type.key_prefix.clone(), schema_type.id);
        self.types.insert(schema_type.id, schema_type.clone());
        schema_type
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl SchemaCatalog for InMemorySchemaCatalog {
    fn get_type(&self, type_id: Uuid) -> Option<Arc<SchemaType>> {
        self.types.get(&type_id).map(|t| t.value().clone())
    }

    fn get_type_by_prefix(&self, key_prefix: &str) -> Option<Arc<SchemaType>> {
        let type_id = *self.prefixes.get(key_prefix)?;
        self.get_type(type_id)
    }

    fn list_types(&self) -> Vec<Arc<SchemaType>> {
        self.types.iter().map(|t| t.value().clone()).collect()
    }
}
