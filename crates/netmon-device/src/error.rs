use thiserror::Error;

/// 设备清单错误类型
#[derive(Error, Debug)]
pub enum DeviceError {
    /// 设备未找到
    #[error("Device not found: {0}")]
    NotFound(String),

    /// 设备已存在
    #[error("Device already exists: {0}")]
    AlreadyExists(String),
}

/// 设备清单结果类型
pub type Result<T> = std::result::Result<T, DeviceError>;
