//! cluster-run 配置模块
//!
//! 该模块提供了完整的配置管理功能，包括：
//! - 配置文件加载和解析（单文件或 `config/` 目录合并）
//! - 环境特定配置覆盖
//! - 控制面连接、超时、重试与并发等执行参数

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;
use tracing::{info, warn};

use crate::client::ExecutionPolicy;
use crate::error::DispatchError;
use crate::types::ExitCodePolicy;

mod manager;
pub use manager::{ConfigManager, ENV_VAR};

/// 未指定环境时使用的环境名称
pub const DEFAULT_ENVIRONMENT: &str = "local";

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（`RUST_LOG` 优先）
    pub level: String,
    /// 是否输出 target
    pub with_target: bool,
    /// 是否输出线程 ID
    pub with_thread_ids: bool,
    /// 是否输出文件名
    pub with_file: bool,
    /// 是否输出行号
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// 控制面连接方式
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerConfig {
    /// HTTP 控制面 API
    Http {
        endpoint: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// 在本机 shell 中执行
    Local {
        #[serde(default = "default_shell")]
        shell: String,
    },
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig::Local {
            shell: default_shell(),
        }
    }
}

fn default_shell() -> String {
    "sh".to_string()
}

/// 单个环境（集群）的配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// 控制面连接
    pub controller: ControllerConfig,
    /// 默认单目标超时（毫秒）
    pub default_timeout_ms: u64,
    /// 服务展开（拓扑查询）超时（毫秒）
    pub topology_timeout_ms: u64,
    /// 连接失败后的重试次数
    pub max_retries: u32,
    /// 重试间隔（毫秒）
    pub retry_backoff_ms: u64,
    /// 同时在途的目标上限
    pub max_concurrency: Option<usize>,
    /// 非零退出码的判定策略
    pub exit_code_policy: ExitCodePolicy,
    /// 静态服务拓扑（服务名 → 单元列表），仅 `local` 控制面使用
    pub services: HashMap<String, Vec<String>>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            default_timeout_ms: 300_000,
            topology_timeout_ms: 30_000,
            max_retries: 0,
            retry_backoff_ms: 200,
            max_concurrency: None,
            exit_code_policy: ExitCodePolicy::default(),
            services: HashMap::new(),
        }
    }
}

impl EnvironmentConfig {
    pub fn execution_policy(&self) -> ExecutionPolicy {
        ExecutionPolicy::default()
            .with_default_timeout(Duration::from_millis(self.default_timeout_ms))
            .with_max_retries(self.max_retries)
            .with_retry_backoff(Duration::from_millis(self.retry_backoff_ms))
    }

    pub fn topology_timeout(&self) -> Duration {
        Duration::from_millis(self.topology_timeout_ms)
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 默认环境名称
    pub default_environment: String,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 环境配置集合
    pub environments: HashMap<String, EnvironmentConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut cfg = Self {
            default_environment: DEFAULT_ENVIRONMENT.to_string(),
            logging: LoggingConfig::default(),
            environments: HashMap::new(),
        };
        cfg.ensure_defaults();
        cfg
    }
}

impl AppConfig {
    /// 获取环境配置
    pub fn environment(&self, name: &str) -> std::result::Result<&EnvironmentConfig, DispatchError> {
        self.environments.get(name).ok_or_else(|| {
            DispatchError::Config(format!("environment '{name}' is not configured"))
        })
    }

    /// 确保配置有默认值
    fn ensure_defaults(&mut self) {
        if self.default_environment.is_empty() {
            self.default_environment = DEFAULT_ENVIRONMENT.to_string();
        }
        self.environments
            .entry(DEFAULT_ENVIRONMENT.to_string())
            .or_default();
    }
}

/// 配置来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// 从文件或目录加载
    Source(PathBuf),
    /// 候选路径均不存在，使用内置默认配置
    Defaults,
}

/// 加载结果：配置本身与它的来源
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub origin: ConfigOrigin,
}

impl LoadedConfig {
    /// 记录配置来源；日志系统初始化之后调用
    pub fn log_origin(&self) {
        match &self.origin {
            ConfigOrigin::Source(path) => {
                info!(path = %path.display(), "configuration loaded");
            }
            ConfigOrigin::Defaults => {
                warn!("no configuration found, using built-in defaults");
            }
        }
    }
}

/// 加载配置
///
/// 指定路径时只加载该路径，任何失败都直接返回错误；否则依次尝试 `config/` 目录和
/// `cluster-run.toml`。存在但无法解析的候选同样返回错误，候选都不存在时才使用默认配置。
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    match path {
        Some(path) => {
            let config = load_config_from_source(path)?;
            Ok(LoadedConfig {
                config,
                origin: ConfigOrigin::Source(path.to_path_buf()),
            })
        }
        None => load_with_fallback(&[PathBuf::from("config"), PathBuf::from("cluster-run.toml")]),
    }
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> Result<LoadedConfig> {
    for path in candidates {
        if !path.exists() {
            continue;
        }
        let config = load_config_from_source(path)?;
        return Ok(LoadedConfig {
            config,
            origin: ConfigOrigin::Source(path.clone()),
        });
    }

    Ok(LoadedConfig {
        config: AppConfig::default(),
        origin: ConfigOrigin::Defaults,
    })
}

/// 从源加载配置
pub fn load_config_from_source(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_from_directory(path)
    } else {
        load_config_from_file(path)
    }
}

/// 从文件加载配置
fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    let mut cfg: AppConfig = toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))?;
    cfg.ensure_defaults();
    Ok(cfg)
}

/// 从目录加载配置，按以下顺序深度合并：
/// `base.toml` → `shared/*.toml` → `environments/{name}.toml` → `overrides/*.toml`
fn load_config_from_directory(path: &Path) -> Result<AppConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("shared"))?;
    ConfigManager::merge_environment_files(&mut merged, &path.join("environments"))?;
    merge_directory(&mut merged, &path.join("overrides"))?;

    let mut cfg: AppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

    cfg.ensure_defaults();
    Ok(cfg)
}

/// 合并目录中的配置，按文件名排序
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in toml_files(dir)? {
        let value = load_toml_value(&entry)?;
        merge_value(root, value);
    }

    Ok(())
}

/// 列出目录下的 `.toml` 文件，按路径排序
fn toml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort();
    Ok(entries)
}

/// 加载 TOML 值
fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 合并值：表递归合并，其余类型整体覆盖
fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
