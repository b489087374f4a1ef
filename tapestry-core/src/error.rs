//! 统一的错误处理类型
//!
//! 目标方法与通知的执行结果统一使用 `anyhow::Result`，
//! 框架自身的错误使用 [`WeaveError`] 表达，经 `?` 转换后仍可通过
//! `downcast_ref::<WeaveError>()` 取回。
//!
//! # 示例
//!
//! ```rust,ignore
//! use tapestry_core::{Result, WeaveError};
//!
//! fn find(name: &str) -> Result<()> {
//!     Err(WeaveError::TypeNotFound(name.to_string()).into())
//! }
//! ```

use thiserror::Error;

pub use anyhow::Result;

/// 织入框架错误
#[derive(Debug, Error)]
pub enum WeaveError {
    /// 切点表达式格式错误（注册时立即拒绝）
    #[error("Malformed selector '{selector}': {reason}")]
    MalformedSelector { selector: String, reason: String },

    /// 类型未注册
    #[error("Type not found: {0}")]
    TypeNotFound(String),

    /// 抽象类型、接口或没有构造器的类型无法实例化
    #[error("Type '{0}' cannot be instantiated")]
    TypeNotInstantiable(String),

    /// 类型上不存在指定方法
    #[error("Method '{signature}' not found on type '{type_name}'")]
    MethodNotFound { type_name: String, signature: String },

    /// 调用目标的实际类型与方法声明的类型不一致
    #[error("Target of '{signature}' is not a '{expected}'")]
    TargetTypeMismatch { expected: String, signature: String },

    /// 参数缺失或类型不匹配
    #[error("Argument #{index} is missing or not a '{expected}'")]
    ArgumentMismatch { index: usize, expected: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),
}

impl WeaveError {
    pub fn malformed(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedSelector {
            selector: selector.into(),
            reason: reason.into(),
        }
    }
}

/// 框架内部操作的结果类型
pub type WeaveResult<T> = std::result::Result<T, WeaveError>;
