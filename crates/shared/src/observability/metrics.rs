//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "rel_translations_total",
        "Total number of REL translations"
    );

    metrics::describe_counter!(
        "rule_executor_compilations_total",
        "Total number of rule executor compilations"
    );
    metrics::describe_histogram!(
        "rule_executor_compilation_duration_seconds",
        "Rule executor compilation duration in seconds"
    );

    metrics::describe_counter!("rule_runs_total", "Total number of record validation runs");
    metrics::describe_histogram!(
        "rule_run_duration_seconds",
        "Record validation run duration in seconds"
    );
    metrics::describe_gauge!(
        "rule_executors_installed",
        "Number of rule executors currently installed"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录 REL 翻译
#[inline]
pub fn record_translation(status: &str) {
    metrics::counter!("rel_translations_total", "status" => status.to_string()).increment(1);
}

/// 记录执行器编译
#[inline]
pub fn record_compilation(type_key: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "rule_executor_compilations_total",
        "type_key" => type_key.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "rule_executor_compilation_duration_seconds",
        "type_key" => type_key.to_string()
    )
    .record(duration_secs);
}

/// 记录一次记录校验
#[inline]
pub fn record_rule_run(type_key: &str, valid: bool, duration_secs: f64) {
    metrics::counter!(
        "rule_runs_total",
        "type_key" => type_key.to_string(),
        "valid" => valid.to_string()
    )
    .increment(1);

    metrics::histogram!("rule_run_duration_seconds", "type_key" => type_key.to_string())
        .record(duration_secs);
}

/// 更新已安装执行器数量
#[inline]
pub fn set_installed_executors(count: usize) {
    metrics::gauge!("rule_executors_installed").set(count as f64);
}
