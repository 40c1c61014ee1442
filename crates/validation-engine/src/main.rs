//! 记录校验引擎服务
//!
//! 启动时从数据库加载对象类型和规则，重建全部执行器后对外提供 REST API。

use std::sync::Arc;

use rel_shared::{config::AppConfig, database::Database, observability};
use sqlx::migrate::Migrator;
use tokio::net::TcpListener;
use tracing::{info, warn};
use validation_engine::{
    ArtifactRegistry, InMemorySchemaCatalog, InterpretingCompiler, PgLabelStore,
    PgRuleRepository, PgSchemaLoader, RuleInvoker, RuleLifecycleService, UninitializedFieldsMode,
    api::{self, AppState},
};

const SERVICE_NAME: &str = "validation-engine";

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_default();

    let obs_config = config.observability.clone().with_service_name(SERVICE_NAME);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting {} on {}", SERVICE_NAME, config.server_addr());

    // 启动参数先校验，避免带着错误配置对外服务
    let default_mode: UninitializedFieldsMode = config.engine.default_uninitialized_mode.parse()?;

    let db = Database::connect(&config.database).await?;
    db.run_migrations(&MIGRATOR).await?;

    let catalog = Arc::new(InMemorySchemaCatalog::new());
    PgSchemaLoader::new(db.pool().clone())
        .load_into(&catalog)
        .await?;

    let registry = ArtifactRegistry::new();
    let service = Arc::new(RuleLifecycleService::new(
        catalog.clone(),
        Arc::new(PgRuleRepository::new(db.pool().clone())),
        Arc::new(PgLabelStore::new(db.pool().clone())),
        Arc::new(InterpretingCompiler::new()),
        registry.clone(),
        &config.engine,
    ));

    let report = service.initialize_all().await?;
    for failure in &report.failed {
        warn!(type_key = %failure.type_key, error = %failure.error, "执行器初始化失败");
    }
    info!(
        compiled = report.compiled.len(),
        failed = report.failed.len(),
        "执行器初始化完成"
    );

    let invoker = RuleInvoker::new(registry, default_mode);
    let state = AppState::new(
        service,
        invoker,
        catalog,
        config.engine.record_variable.clone(),
    )
    .with_database(db.clone());
    let app = api::app(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// 收到 SIGTERM 或 Ctrl+C 后返回，触发 axum 的优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
