use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Invalid environment variable {name}={value}: {reason}")]
    Env {
        name: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ConfigError::Invalid(msg.into())
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ConfigError>;
