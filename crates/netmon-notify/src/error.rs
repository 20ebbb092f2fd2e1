use thiserror::Error;

/// 渠道投递错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Message(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Delivery timed out")]
    Timeout,

    #[error("Rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Permanent failure: {0}")]
    Permanent(String),
}

impl ChannelError {
    /// 是否值得重试
    pub fn is_transient(&self) -> bool {
        match self {
            ChannelError::Transport(_) | ChannelError::Timeout => true,
            ChannelError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
