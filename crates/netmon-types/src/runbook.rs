use crate::{DeviceType, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_RESOLUTION_STEPS: [&str; 4] = [
    "1. Verify alert conditions",
    "2. Check device status",
    "3. Review logs",
    "4. Contact system administrator if issue persists",
];

const DEFAULT_ESCALATION_PATH: [&str; 4] = [
    "Level 1 Support",
    "Level 2 Support",
    "System Administrator",
    "IT Manager",
];

/// 告警处置手册
///
/// 处理步骤按 `<设备类型>_<条件>` 查找（例如 `router_cpu_usage`），
/// 升级路径按级别查找（`info` / `warning` / `critical`）。未配置时使用内置默认值。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Runbook {
    #[serde(default)]
    pub resolution_steps: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub escalation_paths: HashMap<String, Vec<String>>,
}

impl Runbook {
    pub fn resolution_steps(&self, device_type: DeviceType, condition: &str) -> Vec<String> {
        let key = format!("{}_{}", device_type.as_str(), condition);
        match self.resolution_steps.get(&key) {
            Some(steps) => steps.clone(),
            None => DEFAULT_RESOLUTION_STEPS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn escalation_path(&self, severity: Severity) -> Vec<String> {
        match self.escalation_paths.get(severity.as_str()) {
            Some(path) => path.clone(),
            None => DEFAULT_ESCALATION_PATH.iter().map(|s| s.to_string()).collect(),
        }
    }
}
