//! Axum 共享状态

use crate::invoker::RuleInvoker;
use crate::schema::SchemaCatalog;
use crate::service::RuleLifecycleService;
use rel_shared::database::Database;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RuleLifecycleService>,
    pub invoker: RuleInvoker,
    pub catalog: Arc<dyn SchemaCatalog>,
    /// 翻译预览默认使用的记录变量名
    pub record_var: String,
    /// 未配置时健康检查跳过数据库
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        service: Arc<RuleLifecycleService>,
        invoker: RuleInvoker,
        catalog: Arc<dyn SchemaCatalog>,
        record_var: impl Into<String>,
    ) -> Self {
        Self {
            service,
            invoker,
            catalog,
            record_var: record_var.into(),
            database: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}
