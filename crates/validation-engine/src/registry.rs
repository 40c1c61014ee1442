//! 执行器注册表
//!
//! 以执行器名称（`<键前缀>RuleExecutor`）为键保存已编译的执行器，
//! 新执行器整体替换旧执行器，不保留版本。

use crate::codegen::executor_name;
use crate::executor::CompiledExecutor;
use dashmap::DashMap;
use rel_shared::observability::metrics;
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Default)]
pub struct ArtifactRegistry {
    executors: Arc<DashMap<String, Arc<CompiledExecutor>>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// 安装执行器，返回被替换的旧执行器
    pub fn install(&self, executor: CompiledExecutor) -> Option<Arc<CompiledExecutor>> {
        let name = executor.name().to_string();
        let rule_count = executor.rule_count();
        let previous = self.executors.insert(name.clone(), Arc::new(executor));

        info!(executor = %name, rule_count, replaced = previous.is_some(), "执行器已安装");
        metrics::set_installed_executors(self.executors.len());
        previous
    }

    /// 按类型键前缀查找
    pub fn get(&self, key_prefix: &str) -> Option<Arc<CompiledExecutor>> {
        self.executors
            .get(&executor_name(key_prefix))
            .map(|e| e.value().clone())
    }
}
