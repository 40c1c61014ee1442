//! PostgreSQL 仓储实现

use super::{LabelStore, RuleFilter, RuleRepository};
use crate::error::Result;
use crate::models::ValidationRule;
use crate::schema::{FieldDef, FieldKind, InMemorySchemaCatalog, SchemaType};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

const RULE_COLUMNS: &str = r#"id, type_id, name, active, code, error_message, error_message_label,
       is_system, referenced_fields, created_at, updated_at"#;

pub struct PgRuleRepository {
    pool: PgPool,
}

impl PgRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> std::result::Result<ValidationRule, sqlx::Error> {
        Ok(ValidationRule {
            id: row.try_get("id")?,
            type_id: row.try_get("type_id")?,
            name: row.try_get("name")?,
            active: row.try_get("active")?,
            code: row.try_get("code")?,
            error_message: row.try_get("error_message")?,
            error_message_label: row.try_get("error_message_label")?,
            is_system: row.try_get("is_system")?,
            referenced_fields: row.try_get("referenced_fields")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl RuleRepository for PgRuleRepository {
    async fn get(&self, id: Uuid) -> Result<Option<ValidationRule>> {
        let sql = format!("SELECT {} FROM validation_rules WHERE id = $1", RULE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Self::map_row(&r)).transpose()?)
    }

    async fn find(&self, filter: RuleFilter) -> Result<Vec<ValidationRule>> {
        // 未设置的条件绑定为 NULL，由 SQL 跳过
        let sql = format!(
            r#"SELECT {} FROM validation_rules
               WHERE ($1::uuid IS NULL OR type_id = $1)
                 AND ($2::boolean IS NULL OR active = $2)
                 AND ($3::text IS NULL OR name = $3)
               ORDER BY name, id"#,
            RULE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(filter.type_id)
            .bind(filter.active)
            .bind(filter.name)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(Self::map_row)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn upsert(&self, rule: &ValidationRule) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO validation_rules
               (id, type_id, name, active, code, error_message, error_message_label,
                is_system, referenced_fields, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               ON CONFLICT (id) DO UPDATE SET
                   name = EXCLUDED.name,
                   active = EXCLUDED.active,
                   code = EXCLUDED.code,
                   error_message = EXCLUDED.error_message,
                   error_message_label = EXCLUDED.error_message_label,
                   is_system = EXCLUDED.is_system,
                   referenced_fields = EXCLUDED.referenced_fields,
                   updated_at = EXCLUDED.updated_at"#,
        )
        .bind(rule.id)
        .bind(rule.type_id)
        .bind(&rule.name)
        .bind(rule.active)
        .bind(&rule.code)
        .bind(&rule.error_message)
        .bind(&rule.error_message_label)
        .bind(rule.is_system)
        .bind(&rule.referenced_fields)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM validation_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct PgLabelStore {
    pool: PgPool,
}

impl PgLabelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LabelStore for PgLabelStore {
    async fn label_exists(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM text_labels WHERE key = $1) AS exists")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("exists")?)
    }
}

/// 启动时把类型元数据加载到内存目录
pub struct PgSchemaLoader {
    pool: PgPool,
}

impl PgSchemaLoader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 返回加载的类型数量
    pub async fn load_into(&self, catalog: &InMemorySchemaCatalog) -> Result<usize> {
        let type_rows = sqlx::query("SELECT id, key_prefix, api_name FROM schema_types")
            .fetch_all(&self.pool)
            .await?;
        let field_rows = sqlx::query(
            "SELECT type_id, api_name, kind FROM schema_fields ORDER BY type_id, api_name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut types = HashMap::with_capacity(type_rows.len());
        for row in &type_rows {
            let id: Uuid = row.try_get("id")?;
            types.insert(
                id,
                SchemaType {
                    id,
                    key_prefix: row.try_get("key_prefix")?,
                    api_name: row.try_get("api_name")?,
                    fields: Vec::new(),
                },
            );
        }

        for row in &field_rows {
            let type_id: Uuid = row.try_get("type_id")?;
            let api_name: String = row.try_get("api_name")?;
            let kind: String = row.try_get("kind")?;

            let Some(schema_type) = types.get_mut(&type_id) else {
                continue;
            };
            match kind.parse::<FieldKind>() {
                Ok(kind) => {
                    schema_type.fields.push(FieldDef::new(api_name, kind));
                }
                Err(e) => warn!(type_id = %type_id, field = %api_name, error = %e, "跳过无法识别的字段"),
            }
        }

        let count = types.len();
        for (_, schema_type) in types {
            catalog.register(schema_type);
        }

        info!(count, "对象类型已加载");
        Ok(count)
    }
}
