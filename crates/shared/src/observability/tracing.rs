//! 日志初始化模块
//!
//! 基于 tracing-subscriber 构建日志输出，支持 JSON 与人类可读两种格式。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

/// 初始化 tracing 日志
///
/// `RUST_LOG` 优先于配置中的 `log_level`。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = build_filter(&config.log_level);

    let fmt_layer = if config.json_logs {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// 构建环境过滤器，非法的过滤表达式回退到 info
fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_falls_back_on_invalid_directive() {
        // 非法表达式不应 panic
        let _ = build_filter("validation_engine=[");
        let _ = build_filter("debug");
    }

    #[test]
    fn test_init_twice_returns_error() {
        let config = ObservabilityConfig::default();
        let first = init(&config);
        let second = init(&config);
        // 全局 subscriber 只能安装一次，第二次必须报错而不是 panic
        assert!(first.is_err() || second.is_err());
    }
}
