//! 配置加载
//!
//! 配置文件为 TOML 格式，所有字段都有默认值：
//!
//! ```toml
//! [weaver]
//! excluded_namespaces = ["tapestry", "internal.plugins"]
//! warn_unmatched_selectors = true
//! auto_load = true
//!
//! [logging]
//! level = "debug"
//! format = "compact"
//! ```

use crate::error::{WeaveError, WeaveResult};
use crate::logging::LoggingConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "TAPESTRY_CONFIG";

/// 织入器配置，对应 `[weaver]` 表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeaverConfig {
    /// 这些命名空间（前缀匹配）下的类型永远不会被织入
    pub excluded_namespaces: Vec<String>,

    /// 切点没有匹配到任何方法时是否输出 warn 日志
    pub warn_unmatched_selectors: bool,

    /// 全局织入器创建时是否自动加载通过 inventory 注册的类型和切面
    pub auto_load: bool,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            excluded_namespaces: vec!["tapestry".to_string()],
            warn_unmatched_selectors: true,
            auto_load: true,
        }
    }
}

impl WeaverConfig {
    /// 判断类型是否位于排除的命名空间内
    ///
    /// 按路径段匹配：`tapestry` 排除 `tapestry.Foo`，但不排除 `tapestryx.Foo`。
    pub fn is_excluded(&self, type_name: &str) -> bool {
        self.excluded_namespaces.iter().any(|ns| {
            type_name
                .strip_prefix(ns.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
        })
    }
}

/// 完整配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TapestryConfig {
    pub weaver: WeaverConfig,
    pub logging: LoggingConfig,
}

impl TapestryConfig {
    pub fn from_toml_str(content: &str) -> WeaveResult<Self> {
        toml::from_str(content).map_err(|e| WeaveError::Config(e.to_string()))
    }

    /// 从文件加载配置
    pub fn load(path: impl AsRef<Path>) -> WeaveResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            WeaveError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded tapestry configuration");
        Ok(config)
    }

    /// 若设置了 `TAPESTRY_CONFIG` 则从该文件加载，否则使用默认配置
    pub fn from_env_or_default() -> WeaveResult<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim()),
            _ => Ok(Self::default()),
        }
    }
}
