// Credentials adapters - API key lookup by service name

use std::collections::HashMap;

use crate::ports::CredentialsProvider;

/// Credentials held in memory, typically built once at startup
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, service: &str, key: &str) -> Self {
        self.keys.insert(service.to_string(), key.to_string());
        self
    }
}

impl CredentialsProvider for StaticCredentials {
    fn api_key(&self, service: &str) -> Option<String> {
        self.keys.get(service).cloned()
    }
}

/// Credentials read from `<PREFIX>_<SERVICE>_API_KEY` environment variables.
///
/// Only the binary constructs this; library components receive a provider.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    prefix: String,
}

impl EnvCredentials {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// Environment variable consulted for `service`
    pub fn variable_name(&self, service: &str) -> String {
        let service = service
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect::<String>();
        format!("{}_{}_API_KEY", self.prefix, service)
    }
}

impl CredentialsProvider for EnvCredentials {
    fn api_key(&self, service: &str) -> Option<String> {
        std::env::var(self.variable_name(service))
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}
