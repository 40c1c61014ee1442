//! 规则生命周期服务
//!
//! 负责规则的校验、持久化和执行器重建。同一对象类型的所有变更按类型串行化，
//! 整个"生成 -> 编译 -> 持久化 -> 安装"过程持有该类型的锁：
//! 先用候选规则集编译执行器，编译成功后才写入仓储，最后替换注册表中的执行器。
//! 编译失败时仓储保持不变。

use crate::codegen::{self, executor_name};
use crate::compiler::ArtifactCompiler;
use crate::error::{Result, RuleError};
use crate::executor::CompiledExecutor;
use crate::models::ValidationRule;
use crate::registry::ArtifactRegistry;
use crate::repository::{LabelStore, RuleFilter, RuleRepository};
use crate::schema::{SchemaCatalog, SchemaType};
use crate::strategy::RecordBound;
use crate::translator::{TranslateOptions, translate};
use chrono::Utc;
use dashmap::DashMap;
use regex::Regex;
use rel_shared::config::EngineConfig;
use rel_shared::observability::metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// 规则名称：字母开头，字母数字与单个下划线组成，不以下划线结尾
const RULE_NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9]*(_[A-Za-z0-9]+)*$";
const RULE_NAME_MAX_LEN: usize = 80;

/// 保存选项
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// 为 false 时只校验并持久化，执行器留待 initialize 时重建（批量导入）
    pub regenerate: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self { regenerate: true }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeFailure {
    pub type_key: String,
    pub error: String,
}

/// 批量初始化结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitializationReport {
    /// 成功安装的执行器名称
    pub compiled: Vec<String>,
    pub failed: Vec<TypeFailure>,
}

impl InitializationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct RuleLifecycleService {
    catalog: Arc<dyn SchemaCatalog>,
    rules: Arc<dyn RuleRepository>,
    labels: Arc<dyn LabelStore>,
    compiler: Arc<dyn ArtifactCompiler>,
    registry: ArtifactRegistry,
    record_var: String,
    compile_timeout: Duration,
    name_pattern: Regex,
    type_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl RuleLifecycleService {
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        rules: Arc<dyn RuleRepository>,
        labels: Arc<dyn LabelStore>,
        compiler: Arc<dyn ArtifactCompiler>,
        registry: ArtifactRegistry,
        config: &EngineConfig,
    ) -> Self {
        Self {
            catalog,
            rules,
            labels,
            compiler,
            registry,
            record_var: config.record_variable.clone(),
            compile_timeout: config.compile_timeout(),
            name_pattern: Regex::new(RULE_NAME_PATTERN).unwrap(),
            type_locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    /// 保存规则（新建或更新）
    ///
    /// 依赖字段总是由服务端根据 `code` 重新计算，返回实际保存的规则。
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, rule_name = %rule.name, type_id = %rule.type_id))]
    pub async fn save(&self, mut rule: ValidationRule, options: SaveOptions) -> Result<ValidationRule> {
        self.validate_name(&rule.name)?;
        self.validate_error_message(&rule).await?;

        let schema = self.schema(rule.type_id)?;
        let translation = translate(
            &rule.code,
            Some(&schema),
            TranslateOptions::for_record(&self.record_var),
            &RecordBound::default(),
        )?;
        if translation.referenced_fields.is_empty() {
            return Err(RuleError::Configuration(format!(
                "规则 '{}' 没有引用任何字段",
                rule.name
            )));
        }
        rule.set_referenced_fields(&translation.referenced_fields);

        let lock = self.type_lock(rule.type_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.rules.get(rule.id).await? {
            if existing.type_id != rule.type_id {
                return Err(RuleError::Configuration(format!(
                    "规则 '{}' 不能迁移到其他类型",
                    rule.name
                )));
            }
            rule.created_at = existing.created_at;
            rule.is_system = existing.is_system;
        }
        let duplicated = self
            .rules
            .find(RuleFilter::by_type(rule.type_id).with_name(rule.name.clone()))
            .await?
            .into_iter()
            .any(|r| r.id != rule.id);
        if duplicated {
            return Err(RuleError::InvalidName(format!(
                "类型 '{}' 下已存在规则 '{}'",
                schema.api_name, rule.name
            )));
        }
        rule.updated_at = Utc::now();

        if !options.regenerate {
            self.rules.upsert(&rule).await?;
            info!("规则已保存，执行器待重建");
            return Ok(rule);
        }

        let candidates = self.candidate_rules(rule.type_id, rule.id, Some(&rule)).await?;
        let executor = self.build_executor(&schema, &candidates).await?;
        self.rules.upsert(&rule).await?;
        self.registry.install(executor);

        info!(referenced_fields = %rule.referenced_fields, "规则已保存");
        Ok(rule)
    }

    /// 删除规则并重建所属类型的执行器
    #[instrument(skip(self))]
    pub async fn delete(&self, rule_id: Uuid) -> Result<()> {
        let rule = self.get_rule(rule_id).await?;
        if rule.is_system {
            return Err(RuleError::Configuration(format!(
                "系统规则 '{}' 不允许删除",
                rule.name
            )));
        }
        let schema = self.schema(rule.type_id)?;

        let lock = self.type_lock(rule.type_id);
        let _guard = lock.lock().await;

        let candidates = self.candidate_rules(rule.type_id, rule.id, None).await?;
        let executor = self.build_executor(&schema, &candidates).await?;
        if !self.rules.delete(rule.id).await? {
            warn!("规则在删除前已被移除");
        }
        self.registry.install(executor);

        info!(rule_name = %rule.name, "规则已删除");
        Ok(())
    }

    /// 启用或停用规则
    #[instrument(skip(self))]
    pub async fn set_active(&self, rule_id: Uuid, active: bool) -> Result<ValidationRule> {
        let type_id = self.get_rule(rule_id).await?.type_id;
        let schema = self.schema(type_id)?;

        let lock = self.type_lock(type_id);
        let _guard = lock.lock().await;

        // 持锁后重新读取，避免覆盖并发保存的内容
        let mut rule = self.get_rule(rule_id).await?;
        rule.active = active;
        rule.updated_at = Utc::now();

        let candidates = self.candidate_rules(rule.type_id, rule.id, Some(&rule)).await?;
        let executor = self.build_executor(&schema, &candidates).await?;
        self.rules.upsert(&rule).await?;
        self.registry.install(executor);

        info!(rule_name = %rule.name, active, "规则状态已更新");
        Ok(rule)
    }

    pub async fn get_rule(&self, rule_id: Uuid) -> Result<ValidationRule> {
        self.rules
            .get(rule_id)
            .await?
            .ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))
    }

    pub async fn list_rules(&self, type_id: Uuid) -> Result<Vec<ValidationRule>> {
        self.rules.find(RuleFilter::by_type(type_id)).await
    }

    /// 重建单个类型的执行器，返回编入的规则数
    #[instrument(skip(self))]
    pub async fn initialize_type(&self, type_id: Uuid) -> Result<usize> {
        let schema = self.schema(type_id)?;

        let lock = self.type_lock(type_id);
        let _guard = lock.lock().await;

        let rules = self
            .rules
            .find(RuleFilter::by_type(type_id).active_only())
            .await?;
        let executor = self.build_executor(&schema, &rules).await?;
        let count = executor.rule_count();
        self.registry.install(executor);
        Ok(count)
    }

    /// 重建全部类型的执行器
    ///
    /// 进程重启后执行器需要从规则定义重新生成。单个类型失败不影响其他类型，
    /// 没有启用规则的类型安装空执行器。
    #[instrument(skip(self))]
    pub async fn initialize_all(&self) -> Result<InitializationReport> {
        let active = self.rules.find(RuleFilter::default().active_only()).await?;

        let mut grouped: BTreeMap<Uuid, Vec<ValidationRule>> = BTreeMap::new();
        for schema_type in self.catalog.list_types() {
            grouped.entry(schema_type.id).or_default();
        }
        for rule in active {
            grouped.entry(rule.type_id).or_default().push(rule);
        }

        let mut report = InitializationReport::default();
        for (type_id, rules) in grouped {
            let Some(schema) = self.catalog.get_type(type_id) else {
                error!(%type_id, rule_count = rules.len(), "规则所属类型不存在");
                report.failed.push(TypeFailure {
                    type_key: type_id.to_string(),
                    error: RuleError::TypeNotFound(type_id.to_string()).to_string(),
                });
                continue;
            };

            let lock = self.type_lock(type_id);
            let _guard = lock.lock().await;

            match self.build_executor(&schema, &rules).await {
                Ok(executor) => {
                    report.compiled.push(executor.name().to_string());
                    self.registry.install(executor);
                }
                Err(e) => {
                    error!(type_key = %schema.key_prefix, error = %e, "执行器初始化失败");
                    report.failed.push(TypeFailure {
                        type_key: schema.key_prefix.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            compiled = report.compiled.len(),
            failed = report.failed.len(),
            "执行器初始化完成"
        );
        Ok(report)
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        if name.len() > RULE_NAME_MAX_LEN || !self.name_pattern.is_match(name) {
            return Err(RuleError::InvalidName(format!(
                "'{}' 必须以字母开头，只包含字母、数字和单个下划线，且不以下划线结尾",
                name
            )));
        }
        Ok(())
    }

    /// 标签与字面信息二选一，标签优先且必须存在
    async fn validate_error_message(&self, rule: &ValidationRule) -> Result<()> {
        if let Some(label) = rule.usable_label() {
            if !self.labels.label_exists(label).await? {
                return Err(RuleError::InvalidReference(format!(
                    "错误信息标签 '{}' 不存在",
                    label
                )));
            }
            return Ok(());
        }

        if rule.usable_message().is_none() {
            return Err(RuleError::Configuration(format!(
                "规则 '{}' 必须提供错误信息或错误信息标签",
                rule.name
            )));
        }
        Ok(())
    }

    fn schema(&self, type_id: Uuid) -> Result<Arc<SchemaType>> {
        self.catalog
            .get_type(type_id)
            .ok_or_else(|| RuleError::TypeNotFound(type_id.to_string()))
    }

    fn type_lock(&self, type_id: Uuid) -> Arc<Mutex<()>> {
        self.type_locks.entry(type_id).or_default().clone()
    }

    /// 当前启用规则中去掉 `replaced`，再加入启用状态的 `replacement`
    async fn candidate_rules(
        &self,
        type_id: Uuid,
        replaced: Uuid,
        replacement: Option<&ValidationRule>,
    ) -> Result<Vec<ValidationRule>> {
        let mut rules: Vec<ValidationRule> = self
            .rules
            .find(RuleFilter::by_type(type_id).active_only())
            .await?
            .into_iter()
            .filter(|r| r.id != replaced)
            .collect();

        if let Some(rule) = replacement.filter(|r| r.active) {
            rules.push(rule.clone());
        }
        Ok(rules)
    }

    /// 生成并在阻塞线程池上编译执行器
    async fn build_executor(
        &self,
        schema: &SchemaType,
        rules: &[ValidationRule],
    ) -> Result<CompiledExecutor> {
        let source = codegen::generate(schema, rules, &self.record_var)?;
        let compiler = self.compiler.clone();
        let type_key = schema.key_prefix.clone();
        let start = Instant::now();

        let task = tokio::task::spawn_blocking(move || compiler.compile(&source));
        let outcome = match tokio::time::timeout(self.compile_timeout, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                metrics::record_compilation(&type_key, "error", start.elapsed().as_secs_f64());
                return Err(RuleError::Internal(format!("编译任务异常: {}", e)));
            }
            Err(_) => {
                metrics::record_compilation(&type_key, "timeout", start.elapsed().as_secs_f64());
                warn!(executor = %executor_name(&type_key), timeout = ?self.compile_timeout, "执行器编译超时");
                return Err(RuleError::CompileTimeout(self.compile_timeout));
            }
        };

        let status = if outcome.is_success() { "success" } else { "failure" };
        metrics::record_compilation(&type_key, status, start.elapsed().as_secs_f64());
        outcome.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::ExecutorSource;
    use crate::compiler::{CompileOutcome, InterpretingCompiler};
    use crate::error::Diagnostic;
    use crate::models::{Record, UninitializedFieldsMode, ValidationRuleError};
    use crate::repository::{
        InMemoryLabelStore, InMemoryRuleRepository, MockLabelStore, MockRuleRepository,
    };
    use crate::schema::{FieldKind, InMemorySchemaCatalog};
    use serde_json::json;

    struct Fixture {
        service: RuleLifecycleService,
        repo: InMemoryRuleRepository,
        account: Arc<SchemaType>,
    }

    fn fixture_with(
        labels: Arc<dyn LabelStore>,
        compiler: Arc<dyn ArtifactCompiler>,
        config: EngineConfig,
    ) -> Fixture {
        let catalog = InMemorySchemaCatalog::new();
        let account = catalog.register(
            SchemaType::new("a01", "Account")
                .with_field("amount", FieldKind::Number)
                .with_field("name", FieldKind::Text)
                .with_field("owner", FieldKind::Reference),
        );
        let repo = InMemoryRuleRepository::new();
        let service = RuleLifecycleService::new(
            Arc::new(catalog),
            Arc::new(repo.clone()),
            labels,
            compiler,
            ArtifactRegistry::new(),
            &config,
        );
        Fixture {
            service,
            repo,
            account,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            Arc::new(InMemoryLabelStore::with_labels(["AMOUNT_INVALID"])),
            Arc::new(InterpretingCompiler::new()),
            EngineConfig::default(),
        )
    }

    fn amount_rule(type_id: Uuid) -> ValidationRule {
        ValidationRule::new(type_id, "Amount_Positive", "amount > 0").with_message("金额必须为正")
    }

    /// 总是失败的编译器
    struct RejectingCompiler;

    impl ArtifactCompiler for RejectingCompiler {
        fn compile(&self, _source: &ExecutorSource) -> CompileOutcome {
            CompileOutcome::failure(vec![Diagnostic::new(7, "模拟编译失败")])
        }
    }

    struct SlowCompiler;

    impl ArtifactCompiler for SlowCompiler {
        fn compile(&self, source: &ExecutorSource) -> CompileOutcome {
            std::thread::sleep(Duration::from_millis(300));
            InterpretingCompiler::new().compile(source)
        }
    }

    #[tokio::test]
    async fn test_save_computes_referenced_fields_and_installs_executor() {
        let f = fixture();
        let mut rule = amount_rule(f.account.id);
        rule.referenced_fields = "bogus".to_string();

        let saved = f.service.save(rule, SaveOptions::default()).await.unwrap();
        assert_eq!(saved.referenced_fields, "amount");

        let executor = f.service.registry().get("a01").unwrap();
        assert_eq!(executor.rule_count(), 1);

        let record = Record::from_json(json!({"amount": 0})).unwrap();
        let errors = executor.run(&record, UninitializedFieldsMode::Ignore);
        assert!(errors.contains(&ValidationRuleError::message("金额必须为正")));
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_names() {
        let f = fixture();
        let too_long = "x".repeat(81);
        for name in ["", "1abc", "a__b", "trailing_", "has space", too_long.as_str()] {
            let mut rule = amount_rule(f.account.id);
            rule.name = name.to_string();
            let err = f.service.save(rule, SaveOptions::default()).await.unwrap_err();
            assert!(matches!(err, RuleError::InvalidName(_)), "name: {}", name);
        }
    }

    #[tokio::test]
    async fn test_save_requires_error_message() {
        let f = fixture();
        let rule = ValidationRule::new(f.account.id, "A", "amount > 0");
        let err = f.service.save(rule, SaveOptions::default()).await.unwrap_err();
        assert!(matches!(err, RuleError::Configuration(_)));
        assert!(f.repo.is_empty());
    }

    #[tokio::test]
    async fn test_save_checks_label_exists() {
        let mut labels = MockLabelStore::new();
        labels
            .expect_label_exists()
            .withf(|key| key == "MISSING_LABEL")
            .times(1)
            .returning(|_| Ok(false));

        let f = fixture_with(
            Arc::new(labels),
            Arc::new(InterpretingCompiler::new()),
            EngineConfig::default(),
        );
        let rule = ValidationRule::new(f.account.id, "A", "amount > 0").with_label("MISSING_LABEL");

        let err = f.service.save(rule, SaveOptions::default()).await.unwrap_err();
        assert!(matches!(err, RuleError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn test_save_rejects_rule_without_fields() {
        let f = fixture();
        let rule = ValidationRule::new(f.account.id, "A", "1 == 1").with_message("x");
        let err = f.service.save(rule, SaveOptions::default()).await.unwrap_err();
        assert!(matches!(err, RuleError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_save_propagates_syntax_errors() {
        let f = fixture();
        for code in ["missing > 0", "owner.name == 'x'", "(amount > 0", "amount > 0 and name == 'x' or amount < 9"] {
            let rule = ValidationRule::new(f.account.id, "A", code).with_message("x");
            let err = f.service.save(rule, SaveOptions::default()).await.unwrap_err();
            assert!(matches!(err, RuleError::Syntax(_)), "code: {}", code);
        }
        assert!(f.repo.is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_duplicate_name_in_type() {
        let f = fixture();
        f.service
            .save(amount_rule(f.account.id), SaveOptions::default())
            .await
            .unwrap();

        let err = f
            .service
            .save(amount_rule(f.account.id), SaveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuleError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_compile_failure_leaves_repository_untouched() {
        let f = fixture_with(
            Arc::new(InMemoryLabelStore::new()),
            Arc::new(RejectingCompiler),
            EngineConfig::default(),
        );

        let err = f
            .service
            .save(amount_rule(f.account.id), SaveOptions::default())
            .await
            .unwrap_err();
        match err {
            RuleError::Compilation(diagnostics) => assert_eq!(diagnostics[0].line, 7),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(f.repo.is_empty());
        assert!(f.service.registry().get("a01").is_none());
    }

    #[tokio::test]
    async fn test_compile_timeout() {
        let config = EngineConfig {
            compile_timeout_ms: 20,
            ..Default::default()
        };
        let f = fixture_with(
            Arc::new(InMemoryLabelStore::new()),
            Arc::new(SlowCompiler),
            config,
        );

        let err = f
            .service
            .save(amount_rule(f.account.id), SaveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuleError::CompileTimeout(_)));
        assert!(f.repo.is_empty());
    }

    #[tokio::test]
    async fn test_save_without_regenerate_defers_executor() {
        let f = fixture();
        f.service
            .save(amount_rule(f.account.id), SaveOptions { regenerate: false })
            .await
            .unwrap();

        assert_eq!(f.repo.len(), 1);
        assert!(f.service.registry().get("a01").is_none());

        assert_eq!(f.service.initialize_type(f.account.id).await.unwrap(), 1);
        assert!(f.service.registry().get("a01").is_some());
    }

    #[tokio::test]
    async fn test_set_active_regenerates() {
        let f = fixture();
        let saved = f
            .service
            .save(amount_rule(f.account.id), SaveOptions::default())
            .await
            .unwrap();

        let updated = f.service.set_active(saved.id, false).await.unwrap();
        assert!(!updated.active);
        assert_eq!(f.service.registry().get("a01").unwrap().rule_count(), 0);

        f.service.set_active(saved.id, true).await.unwrap();
        assert_eq!(f.service.registry().get("a01").unwrap().rule_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_system_rule_is_rejected() {
        let f = fixture();
        let mut rule = amount_rule(f.account.id);
        rule.is_system = true;
        let saved = f.service.save(rule, SaveOptions::default()).await.unwrap();

        let err = f.service.delete(saved.id).await.unwrap_err();
        assert!(matches!(err, RuleError::Configuration(_)));
        assert_eq!(f.repo.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_rule() {
        let f = fixture();
        let err = f.service.delete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RuleError::RuleNotFound(_)));
    }

    #[tokio::test]
    async fn test_initialize_all_reports_failures_and_continues() {
        let f = fixture();
        // 绕过服务直接写入一条依赖不存在类型的规则
        let orphan = ValidationRule::new(Uuid::new_v4(), "Orphan", "amount > 0").with_message("x");
        let mut amount = amount_rule(f.account.id);
        amount.referenced_fields = "amount".to_string();
        f.repo.upsert(&orphan).await.unwrap();
        f.repo.upsert(&amount).await.unwrap();

        let report = f.service.initialize_all().await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].type_key, orphan.type_id.to_string());
        assert_eq!(report.compiled, vec!["a01RuleExecutor"]);
        assert_eq!(f.service.registry().get("a01").unwrap().rule_count(), 1);
    }

    #[tokio::test]
    async fn test_initialize_all_rejects_rules_without_referenced_fields() {
        let f = fixture();
        // 直接写入仓储、未经服务计算依赖字段的规则
        f.repo.upsert(&amount_rule(f.account.id)).await.unwrap();

        let report = f.service.initialize_all().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].type_key, "a01");
        assert!(report.failed[0].error.contains("配置错误"));
    }

    #[tokio::test]
    async fn test_initialize_all_installs_empty_executor_for_types_without_rules() {
        let f = fixture();
        let report = f.service.initialize_all().await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.compiled, vec!["a01RuleExecutor"]);
        assert_eq!(f.service.registry().get("a01").unwrap().rule_count(), 0);
    }

    #[test]
    fn test_repository_failure_leaves_registry_untouched() {
        let catalog = InMemorySchemaCatalog::new();
        let account = catalog
            .register(SchemaType::new("a01", "Account").with_field("amount", FieldKind::Number));

        let mut rules = MockRuleRepository::new();
        rules.expect_get().returning(|_| Ok(None));
        rules
            .expect_find()
            .returning(|_| Err(RuleError::Database(sqlx::Error::PoolTimedOut)));
        rules.expect_upsert().never();

        let service = RuleLifecycleService::new(
            Arc::new(catalog),
            Arc::new(rules),
            Arc::new(InMemoryLabelStore::new()),
            Arc::new(InterpretingCompiler::new()),
            ArtifactRegistry::new(),
            &EngineConfig::default(),
        );

        let err = tokio_test::block_on(service.save(amount_rule(account.id), SaveOptions::default()))
            .unwrap_err();
        assert!(matches!(err, RuleError::Database(_)));
        assert!(service.registry().is_empty());
    }
}
