//! An in-memory [`StateBackend`], so executor tests don't touch the
//! filesystem. Locking is a plain map entry guarded by a mutex rather than
//! `fs2` — there is no other process to race against inside one test
//! binary, only other tasks in the same runtime.

use async_trait::async_trait;
use cldctl_core::error::{Error, Result};
use cldctl_core::state_backend::{LockGuard, LockInfo, StateBackend};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Default)]
pub struct InMemoryStateBackend {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    locks: Arc<Mutex<HashMap<String, LockInfo>>>,
}

impl InMemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a path with bytes as if a prior run had written it.
    pub fn seed(&self, path: &str, bytes: Vec<u8>) {
        self.data.lock().insert(path.to_string(), bytes);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.data.lock().contains_key(path)
    }
}

#[async_trait]
impl StateBackend for InMemoryStateBackend {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().get(path).cloned())
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.data.lock().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.data.lock().remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut out: Vec<String> = self
            .data
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.data.lock().contains_key(path))
    }

    async fn lock(&self, path: &str, holder: &str) -> Result<Box<dyn LockGuard>> {
        let mut locks = self.locks.lock();
        if let Some(existing) = locks.get(path) {
            return Err(Error::LockContention {
                path: path.to_string(),
                holder: existing.holder.clone(),
            });
        }
        let info = LockInfo {
            holder: holder.to_string(),
            acquired_at_unix: now_unix(),
            heartbeat_unix: now_unix(),
        };
        locks.insert(path.to_string(), info.clone());
        Ok(Box::new(InMemoryLock {
            path: path.to_string(),
            info,
            locks: Arc::clone(&self.locks),
        }))
    }
}

struct InMemoryLock {
    path: String,
    info: LockInfo,
    locks: Arc<Mutex<HashMap<String, LockInfo>>>,
}

#[async_trait]
impl LockGuard for InMemoryLock {
    fn holder(&self) -> &str {
        &self.info.holder
    }

    async fn heartbeat(&mut self) -> Result<()> {
        self.info.heartbeat_unix = now_unix();
        if let Some(entry) = self.locks.lock().get_mut(&self.path) {
            entry.heartbeat_unix = self.info.heartbeat_unix;
        }
        Ok(())
    }

    async fn unlock(self: Box<Self>) -> Result<()> {
        self.locks.lock().remove(&self.path);
        Ok(())
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let backend = InMemoryStateBackend::new();
        backend.write("nodes/a.json", b"hello").await.unwrap();
        assert_eq!(backend.read("nodes/a.json").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn missing_path_reads_as_none() {
        let backend = InMemoryStateBackend::new();
        assert_eq!(backend.read("nodes/missing.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn second_lock_is_contention() {
        let backend = InMemoryStateBackend::new();
        let guard = backend.lock("run/lock", "worker-a").await.unwrap();
        let second = backend.lock("run/lock", "worker-b").await;
        assert!(matches!(second, Err(Error::LockContention { .. })));
        guard.unlock().await.unwrap();
        assert!(backend.lock("run/lock", "worker-b").await.is_ok());
    }
}
