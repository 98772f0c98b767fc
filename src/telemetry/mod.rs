//! # 日志初始化模块
//!
//! 分发核心只通过 `tracing` 宏输出结构化日志，从不安装 subscriber；
//! 由可执行程序在启动时调用本模块完成初始化。

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 从配置初始化日志系统
///
/// # 参数
/// * `logging_config` - 日志配置（可选），如果为 None 则使用默认配置（info 级别）
///
/// # 示例
/// ```rust,ignore
/// use cluster_run::config::LoggingConfig;
///
/// // 使用默认配置
/// init_tracing_from_config(None);
///
/// // 使用自定义配置
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     with_target: false,
///     with_thread_ids: true,
///     with_file: true,
///     with_line_number: true,
/// };
/// init_tracing_from_config(Some(&config));
/// ```
pub fn init_tracing_from_config(logging_config: Option<&LoggingConfig>) {
    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    // 优先使用环境变量 RUST_LOG，如果没有则使用配置文件的日志级别
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(config.level.as_str()),
    };

    // 日志写到 stderr，stdout 留给命令输出
    let result = fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .try_init();

    if let Err(err) = result {
        tracing::debug!(error = %err, "tracing subscriber already installed");
    }
}
