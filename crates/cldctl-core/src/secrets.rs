//! The `SecretsManager` trait (spec §6) plus [`EnvSecretsProvider`], and the
//! `${secret:[provider:]key}` token-substitution walker (spec §6, §5's
//! "cache access is synchronized" requirement satisfied with
//! `parking_lot::Mutex`, matching the teacher's synchronization style).

use crate::error::{Error, Result};
use crate::value::Value;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The secrets boundary (spec §6): `get/get_from_provider/get_batch/resolve_secrets`.
#[async_trait]
pub trait SecretsManager: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn get_from_provider(&self, provider: &str, key: &str) -> Result<Option<String>>;
    async fn get_batch(&self, keys: &[String]) -> Result<HashMap<String, String>>;

    /// Walk `value`, substituting every `${secret:[provider:]key}` token
    /// found inside string leaves. An unclosed token is an error; a
    /// resolved-to-missing key is [`Error::SecretNotFound`].
    async fn resolve_secrets(&self, value: Value) -> Result<Value> {
        resolve_secrets_in(self, value).await
    }
}

async fn resolve_secrets_in(manager: &(impl SecretsManager + ?Sized), value: Value) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(resolve_secret_tokens(manager, &s).await?)),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(Box::pin(resolve_secrets_in(manager, item)).await?);
            }
            Ok(Value::List(out))
        }
        Value::Map(map) => {
            let mut out = HashMap::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, Box::pin(resolve_secrets_in(manager, v)).await?);
            }
            Ok(Value::Map(out))
        }
        other => Ok(other),
    }
}

async fn resolve_secret_tokens(manager: &(impl SecretsManager + ?Sized), text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${secret:") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + "${secret:".len()..];
        let end = after_open
            .find('}')
            .ok_or_else(|| Error::UnclosedSecretToken {
                fragment: text.to_string(),
            })?;
        let token = &after_open[..end];
        let value = match token.split_once(':') {
            Some((provider, key)) => manager.get_from_provider(provider, key).await?,
            None => manager.get(token).await?,
        };
        let value = value.ok_or_else(|| Error::SecretNotFound {
            key: token.to_string(),
        })?;
        out.push_str(&value);
        rest = &after_open[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Reads secrets from process environment variables: `key` is the env var
/// name directly; `provider` is ignored (there is only one provider).
/// Caches lookups behind a `parking_lot::Mutex` so repeated references to
/// the same key don't re-read the environment.
#[derive(Default)]
pub struct EnvSecretsProvider {
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl EnvSecretsProvider {
    pub fn new() -> Self {
        EnvSecretsProvider::default()
    }

    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(cached) = self.cache.lock().get(key) {
            return cached.clone();
        }
        let value = std::env::var(key).ok();
        self.cache.lock().insert(key.to_string(), value.clone());
        value
    }
}

#[async_trait]
impl SecretsManager for EnvSecretsProvider {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lookup(key))
    }

    async fn get_from_provider(&self, _provider: &str, key: &str) -> Result<Option<String>> {
        Ok(self.lookup(key))
    }

    /// Fans out across keys concurrently, per spec §5 ("batch fetches fan
    /// out to providers in parallel").
    async fn get_batch(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let fetches = keys.iter().map(|k| async move { (k.clone(), self.get(k).await) });
        let results = join_all(fetches).await;
        let mut out = HashMap::with_capacity(results.len());
        for (key, value) in results {
            if let Some(v) = value? {
                out.insert(key, v);
            }
        }
        Ok(out)
    }
}
