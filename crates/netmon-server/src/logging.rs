use netmon_config::{LogFormat, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 选择日志过滤规则：RUST_LOG 优先，其次 --debug，最后配置文件
pub fn filter_directive(config: &LoggingConfig, debug: bool, env: Option<&str>) -> String {
    match env {
        Some(directive) if !directive.trim().is_empty() => directive.to_string(),
        _ if debug => "debug".to_string(),
        _ => config.level.clone(),
    }
}

/// 安装全局 tracing 订阅器
pub fn init_logging(config: &LoggingConfig, debug: bool) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(config, debug, env.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}
