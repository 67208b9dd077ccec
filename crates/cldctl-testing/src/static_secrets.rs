//! A [`SecretsManager`] backed by a fixed, in-memory key/value map instead
//! of the environment — lets tests assert exact secret resolution without
//! touching process env vars.

use async_trait::async_trait;
use cldctl_core::error::Result;
use cldctl_core::secrets::SecretsManager;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct StaticSecretsManager {
    values: Mutex<HashMap<String, String>>,
}

impl StaticSecretsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build directly from a map of `key -> value`, ignoring provider.
    pub fn with_values(values: HashMap<String, String>) -> Self {
        StaticSecretsManager {
            values: Mutex::new(values),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.lock().insert(key.into(), value.into());
    }
}

#[async_trait]
impl SecretsManager for StaticSecretsManager {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn get_from_provider(&self, _provider: &str, key: &str) -> Result<Option<String>> {
        self.get(key).await
    }

    async fn get_batch(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let values = self.values.lock();
        Ok(keys
            .iter()
            .filter_map(|k| values.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cldctl_core::value::Value;

    #[tokio::test]
    async fn resolves_known_secret_token() {
        let manager = StaticSecretsManager::new();
        manager.set("DB_PASSWORD", "hunter2");

        let resolved = manager
            .resolve_secrets(Value::String("${secret:DB_PASSWORD}".to_string()))
            .await
            .unwrap();
        assert_eq!(resolved, Value::String("hunter2".to_string()));
    }

    #[tokio::test]
    async fn unknown_secret_is_an_error() {
        let manager = StaticSecretsManager::new();
        let result = manager
            .resolve_secrets(Value::String("${secret:MISSING}".to_string()))
            .await;
        assert!(result.is_err());
    }
}
