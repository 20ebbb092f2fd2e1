use std::collections::HashMap;

/// 凭据解析器
///
/// 配置文件只保存凭据引用（例如环境变量名），真正的秘密由外部凭据存储提供。
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Option<String>;
}

/// 从环境变量解析凭据
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialResolver;

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, reference: &str) -> Option<String> {
        std::env::var(reference).ok().filter(|v| !v.is_empty())
    }
}

/// 固定映射的凭据解析器
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialResolver {
    secrets: HashMap<String, String>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(reference.into(), secret.into());
        self
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self, reference: &str) -> Option<String> {
        self.secrets.get(reference).cloned()
    }
}
