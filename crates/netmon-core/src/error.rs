use thiserror::Error;

/// 错误分类
///
/// 决定错误的处理方式：瞬时错误重试，配置错误禁用受影响的设备，
/// 数据错误丢弃样本，资源耗尽则延后处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Configuration,
    Data,
    ResourceExhausted,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// netmon 统一错误类型
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed data: {0}")]
    Data(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MonitorError::Transient(_) | MonitorError::Io(_) => ErrorClass::Transient,
            MonitorError::Config(_) | MonitorError::NotFound(_) => ErrorClass::Configuration,
            MonitorError::Data(_) | MonitorError::Serialization(_) => ErrorClass::Data,
            MonitorError::ResourceExhausted(_) => ErrorClass::ResourceExhausted,
            MonitorError::Internal(_) => ErrorClass::Data,
        }
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, MonitorError>;
