//! 错误信息结构
//!
//! 提供结构化的错误信息传递给异常通知和日志

use std::any::type_name;
use std::error::Error;
use std::fmt;
use tapestry_core::WeaveError;

/// 结构化的错误信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// 错误消息
    pub message: String,

    /// 错误类型名称
    pub error_type: String,

    /// 错误源链（cause chain），不含最外层
    pub source_chain: Vec<String>,
}

impl ErrorInfo {
    /// 从标准错误创建 ErrorInfo
    pub fn from_error<E: Error>(error: &E) -> Self {
        let mut source_chain = Vec::new();
        let mut current = error.source();
        while let Some(source) = current {
            source_chain.push(source.to_string());
            current = source.source();
        }

        Self {
            message: error.to_string(),
            error_type: type_name::<E>().to_string(),
            source_chain,
        }
    }

    /// 从方法或通知返回的错误创建
    ///
    /// 框架自身的错误能识别出 [`WeaveError`]，其他错误类型记为 `anyhow::Error`。
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        let error_type = if error.downcast_ref::<WeaveError>().is_some() {
            type_name::<WeaveError>()
        } else {
            type_name::<anyhow::Error>()
        };

        Self {
            message: error.to_string(),
            error_type: error_type.to_string(),
            source_chain: error.chain().skip(1).map(ToString::to_string).collect(),
        }
    }

    /// 创建简单的 ErrorInfo（只包含消息）
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "Unknown".to_string(),
            source_chain: Vec::new(),
        }
    }

    /// 获取完整的错误描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!(
                "{}\nCaused by:\n  {}",
                self.message,
                self.source_chain.join("\n  ")
            )
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_type, self.message)
    }
}

impl From<&anyhow::Error> for ErrorInfo {
    fn from(error: &anyhow::Error) -> Self {
        Self::from_anyhow(error)
    }
}
