//! 记录校验引擎
//!
//! 把用户编写的 REL 条件表达式翻译成目标表达式，按对象类型聚合为规则执行器，
//! 并在运行期校验记录实例。
//!
//! ## 处理流程
//!
//! - **翻译**：`tokenizer` 分词，`translator` 借助 `strategy` 解析变量，把比较运算改写为支持函数调用
//! - **生成**：`codegen` 把一个类型的启用规则聚合为执行器源码清单
//! - **编译**：`compiler` 解析清单中的条件，产出带行号诊断的结果或 `CompiledExecutor`
//! - **安装**：`registry` 按 `<键前缀>RuleExecutor` 保存执行器，`service` 负责整个生命周期
//! - **执行**：`invoker` 按类型找到执行器，返回错误集合
//!
//! ## 模块结构
//!
//! - `api`: REST API（Axum）
//! - `repository`: 规则与标签的持久化（内存 / PostgreSQL）
//! - `schema`: 对象类型元数据目录

pub mod api;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod expr;
pub mod invoker;
pub mod models;
pub mod operators;
pub mod registry;
pub mod repository;
pub mod schema;
pub mod service;
pub mod strategy;
pub mod tokenizer;
pub mod translator;

// 重新导出核心类型
pub use codegen::{ErrorTemplate, ExecutorSource, executor_name, generate};
pub use compiler::{ArtifactCompiler, CompileOutcome, InterpretingCompiler};
pub use error::{Diagnostic, Result, RuleError};
pub use executor::CompiledExecutor;
pub use invoker::RuleInvoker;
pub use models::{Record, UninitializedFieldsMode, ValidationRule, ValidationRuleError};
pub use registry::ArtifactRegistry;
pub use repository::{
    InMemoryLabelStore, InMemoryRuleRepository, LabelStore, PgLabelStore, PgRuleRepository,
    PgSchemaLoader, RuleFilter, RuleRepository,
};
pub use schema::{FieldKind, InMemorySchemaCatalog, SchemaCatalog, SchemaType};
pub use service::{InitializationReport, RuleLifecycleService, SaveOptions};
pub use strategy::{KeyedStoreBound, RecordBound, StrategyKind, VariableStrategy};
pub use translator::{TranslateOptions, Translation, translate};
