//! 运行期规则调用

use crate::error::{Result, RuleError};
use crate::models::{Record, UninitializedFieldsMode, ValidationRuleError};
use crate::registry::ArtifactRegistry;
use rel_shared::observability::metrics;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, instrument};

/// 按类型键前缀找到执行器并校验记录
#[derive(Clone)]
pub struct RuleInvoker {
    registry: ArtifactRegistry,
    default_mode: UninitializedFieldsMode,
}

impl RuleInvoker {
    pub fn new(registry: ArtifactRegistry, default_mode: UninitializedFieldsMode) -> Self {
        Self {
            registry,
            default_mode,
        }
    }

    /// 校验记录，返回错误集合；记录无效是正常结果，不作为错误返回
    ///
    /// `mode` 为 None 时使用默认模式，无法识别的模式为配置错误。
    #[instrument(skip(self, record))]
    pub fn run_rules(
        &self,
        record: &Record,
        key_prefix: &str,
        mode: Option<&str>,
    ) -> Result<BTreeSet<ValidationRuleError>> {
        let mode = match mode {
            Some(mode) => mode.parse::<UninitializedFieldsMode>()?,
            None => self.default_mode,
        };

        let executor = self.registry.get(key_prefix).ok_or_else(|| {
            RuleError::Configuration(format!("类型 '{}' 的规则执行器尚未初始化", key_prefix))
        })?;

        let start = Instant::now();
        let errors = executor.run(record, mode);
        metrics::record_rule_run(
            executor.type_key(),
            errors.is_empty(),
            start.elapsed().as_secs_f64(),
        );

        debug!(
            executor = %executor.name(),
            type_id = %executor.type_id(),
            %mode,
            error_count = errors.len(),
            "记录校验完成"
        );
        Ok(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::executor_name;
    use crate::executor::CompiledExecutor;
    use serde_json::json;
    use uuid::Uuid;

    fn invoker() -> RuleInvoker {
        let registry = ArtifactRegistry::new();
        registry.install(CompiledExecutor::new(
            executor_name("a01"),
            Uuid::new_v4(),
            "a01".to_string(),
            "record".to_string(),
            Vec::new(),
        ));
        RuleInvoker::new(registry, UninitializedFieldsMode::default())
    }

    #[test]
    fn test_missing_executor_is_configuration_error() {
        let record = Record::from_json(json!({})).unwrap();
        let err = invoker().run_rules(&record, "zzz", None).unwrap_err();
        assert!(matches!(err, RuleError::Configuration(_)));
    }

    #[test]
    fn test_unsupported_mode_is_configuration_error() {
        let record = Record::from_json(json!({})).unwrap();
        let err = invoker().run_rules(&record, "a01", Some("SKIP")).unwrap_err();
        assert!(matches!(err, RuleError::Configuration(_)));
    }

    #[test]
    fn test_empty_executor_returns_no_errors() {
        let record = Record::from_json(json!({"amount": 1})).unwrap();
        let errors = invoker().run_rules(&record, "a01", Some("FAIL")).unwrap();
        assert!(errors.is_empty());
    }
}
