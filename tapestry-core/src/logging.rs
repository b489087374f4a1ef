//! 日志初始化
//!
//! 框架本身只通过 `tracing` 宏输出日志，这里负责按配置安装
//! `tracing-subscriber`（进程内只需要调用一次）。

use crate::error::{WeaveError, WeaveResult};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{fmt as subscriber_fmt, EnvFilter};

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("Invalid log level: {}", other)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 紧凑格式（默认）
    Compact,
    /// 完整格式
    Full,
    Json,
    /// 多行美化格式，适合开发调试
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "full" => Ok(LogFormat::Full),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("Invalid log format: {}", other)),
        }
    }
}

/// 日志配置，对应配置文件中的 `[logging]` 表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// 是否输出模块路径
    pub show_target: bool,
    pub show_thread_ids: bool,
    /// 自定义过滤器，例如 `"tapestry_aop=trace,warn"`，优先于 `level`
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            show_target: false,
            show_thread_ids: false,
            filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// 用环境变量覆盖当前配置
    ///
    /// - `RUST_LOG`：过滤器
    /// - `TAPESTRY_LOG_LEVEL`：日志级别
    /// - `TAPESTRY_LOG_FORMAT`：输出格式
    ///
    /// 无法解析的值会被忽略。
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(filter) = std::env::var("RUST_LOG") {
            self.filter = Some(filter);
        }
        if let Some(level) = std::env::var("TAPESTRY_LOG_LEVEL")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.level = level;
        }
        if let Some(format) = std::env::var("TAPESTRY_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.format = format;
        }
        self
    }

    fn env_filter(&self) -> EnvFilter {
        self.filter
            .as_deref()
            .and_then(|filter| EnvFilter::try_new(filter).ok())
            .unwrap_or_else(|| EnvFilter::new(self.level.to_string()))
    }

    /// 安装全局 subscriber
    ///
    /// 重复调用会返回 [`WeaveError::LoggingInit`]。
    pub fn init(&self) -> WeaveResult<()> {
        let builder = subscriber_fmt()
            .with_env_filter(self.env_filter())
            .with_target(self.show_target);

        let installed = match self.format {
            LogFormat::Compact => builder
                .compact()
                .with_thread_ids(self.show_thread_ids)
                .try_init(),
            LogFormat::Full => builder.with_thread_ids(self.show_thread_ids).try_init(),
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
        };

        installed.map_err(|e| WeaveError::LoggingInit(e.to_string()))
    }
}
