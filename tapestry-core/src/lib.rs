// tapestry-core: 织入框架共享的基础设施
//
// - 统一错误类型
// - TOML 配置
// - 日志初始化

pub mod config;
pub mod error;
pub mod logging;

pub use config::{TapestryConfig, WeaverConfig, CONFIG_PATH_ENV};
pub use error::{Result, WeaveError, WeaveResult};
pub use logging::{LogFormat, LogLevel, LoggingConfig};

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::config::{TapestryConfig, WeaverConfig};
    pub use crate::error::{Result, WeaveError, WeaveResult};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use anyhow::{anyhow, bail, Context};
}
