use netmon_core::ErrorClass;
use std::time::Duration;
use thiserror::Error;

/// 适配器错误
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Poll timed out after {0:?}")]
    Timeout(Duration),

    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Command {program} failed with status {status:?}: {stderr}")]
    CommandFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

impl AdapterError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        AdapterError::Malformed(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            AdapterError::Timeout(_)
            | AdapterError::Unreachable(_)
            | AdapterError::CommandFailed { .. }
            | AdapterError::Io(_) => ErrorClass::Transient,
            AdapterError::Malformed(_) => ErrorClass::Data,
            AdapterError::Unsupported(_) | AdapterError::MissingCredentials(_) => {
                ErrorClass::Configuration
            }
        }
    }

    /// 是否值得重试
    pub fn is_transient(&self) -> bool {
        self.class().is_retryable()
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, AdapterError>;
