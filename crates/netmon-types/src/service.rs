use serde::{Deserialize, Serialize};

/// 业务服务
///
/// 由配置提供，描述一组设备共同支撑的逻辑服务。`priority` 数值越小优先级越高。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessService {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub priority: u8,
    /// 依赖的设备 ID
    #[serde(default)]
    pub devices: Vec<String>,
    /// 服务联系人（邮件地址）
    #[serde(default)]
    pub contacts: Vec<String>,
}

impl BusinessService {
    pub fn new(name: impl Into<String>, priority: u8) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            priority,
            devices: Vec::new(),
            contacts: Vec::new(),
        }
    }

    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_contacts(mut self, contacts: Vec<String>) -> Self {
        self.contacts = contacts;
        self
    }

    pub fn depends_on(&self, device_id: &str) -> bool {
        self.devices.iter().any(|d| d == device_id)
    }
}
