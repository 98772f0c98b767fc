//! 配置管理器 - 负责环境选择和环境特定配置的加载
//!
//! 环境选择优先级：
//! 1. 命令行 `-e/--environment`
//! 2. 环境变量 `CLUSTER_RUN_ENV`
//! 3. 配置文件中的 `default_environment`

use std::env;
use std::ffi::OsStr;
use std::path::Path;

use anyhow::{Result, bail};
use toml::{Table, Value};

use super::{AppConfig, load_toml_value, merge_value, toml_files};

/// 选择环境的环境变量
pub const ENV_VAR: &str = "CLUSTER_RUN_ENV";

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    pub fn get_environment(flag: Option<&str>, config: &AppConfig) -> String {
        Self::resolve_environment(flag, env::var(ENV_VAR).ok(), config)
    }

    fn resolve_environment(
        flag: Option<&str>,
        from_env: Option<String>,
        config: &AppConfig,
    ) -> String {
        flag.map(str::to_string)
            .filter(|name| !name.is_empty())
            .or_else(|| from_env.filter(|name| !name.is_empty()))
            .unwrap_or_else(|| config.default_environment.clone())
    }

    /// 把 `environments/{name}.toml` 深度合并到 `environments.{name}`
    ///
    /// 片段只需写出与基础配置不同的字段，未写出的字段保持原值。
    pub(super) fn merge_environment_files(root: &mut Value, dir: &Path) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }

        for path in toml_files(dir)? {
            let Some(name) = path.file_stem().and_then(OsStr::to_str) else {
                continue;
            };
            let fragment = load_toml_value(&path)?;
            if !fragment.is_table() {
                bail!("environment fragment must be a table: {}", path.display());
            }

            let mut environment = Table::new();
            environment.insert(name.to_string(), fragment);
            let mut overlay = Table::new();
            overlay.insert("environments".to_string(), Value::Table(environment));
            merge_value(root, Value::Table(overlay));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_environment_variable() {
        let cfg = AppConfig::default();
        assert_eq!(
            ConfigManager::resolve_environment(Some("prod"), Some("staging".into()), &cfg),
            "prod"
        );
    }

    #[test]
    fn environment_variable_wins_over_default() {
        let cfg = AppConfig::default();
        assert_eq!(
            ConfigManager::resolve_environment(None, Some("staging".into()), &cfg),
            "staging"
        );
        assert_eq!(
            ConfigManager::resolve_environment(Some(""), Some("".into()), &cfg),
            "local"
        );
    }
}
