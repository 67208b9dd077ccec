//! The `StateBackend` trait (spec §6) plus [`LocalFileStateBackend`], the
//! one concrete implementation this crate ships.
//!
//! Grounded on the teacher's file-based checkpointer variants
//! (`CompressedFileCheckpointer`, `VersionedFileCheckpointer`): a directory
//! of serialized records, each integrity-checked with a checksum sidecar,
//! narrowed here to the read/write/lock/delete surface spec §6 names.

use crate::error::{Error, Result};
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

/// Metadata recorded alongside an advisory lock so a stale lock can be
/// identified and broken with an operator override (spec §5, §9 Design
/// Notes "State backend lock").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LockInfo {
    pub holder: String,
    pub acquired_at_unix: u64,
    pub heartbeat_unix: u64,
}

/// A held lock. Backends hand back their own implementation (a real
/// `flock`-backed file for [`LocalFileStateBackend`], a plain map entry for
/// an in-memory test double) behind this trait object so callers never
/// need to know which.
///
/// Dropping a guard without calling [`LockGuard::unlock`] should release
/// whatever underlying resource is held (e.g. the kernel releases a
/// descriptor-bound `flock` on drop) but is not required to clean up any
/// on-disk marker — matching the spec's "no retry at this layer" stance: a
/// crashed holder's lock is cleaned up by an operator, not silently
/// reclaimed.
#[async_trait]
pub trait LockGuard: Send {
    fn holder(&self) -> &str;
    /// Refresh the lock's heartbeat timestamp (spec §9: "refresh-on-heartbeat").
    async fn heartbeat(&mut self) -> Result<()>;
    async fn unlock(self: Box<Self>) -> Result<()>;
}

/// A [`LockGuard`] backed by an OS-level advisory exclusive lock
/// ([`fs2::FileExt::try_lock_exclusive`]) on the `.lock` sidecar file,
/// with [`LockInfo`] written into that same file for operator visibility.
pub struct FileLock {
    path: PathBuf,
    info: LockInfo,
    file: File,
}

#[async_trait]
impl LockGuard for FileLock {
    fn holder(&self) -> &str {
        &self.info.holder
    }

    async fn heartbeat(&mut self) -> Result<()> {
        self.info.heartbeat_unix = now_unix();
        let info = self.info.clone();
        let path = self.path.clone();
        // `File` isn't `Clone`; duplicate the descriptor so the blocking
        // closure can own one while `self.file` keeps holding the lock.
        let file = self.file.try_clone().map_err(|e| Error::State {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let path_for_err = path.clone();
        tokio::task::spawn_blocking(move || write_lock_info(file, &info))
            .await
            .map_err(|e| Error::State {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
            .map_err(|message| Error::State {
                path: path_for_err.display().to_string(),
                message,
            })?;
        Ok(())
    }

    async fn unlock(self: Box<Self>) -> Result<()> {
        let FileLock { path, file, .. } = *self;
        tokio::task::spawn_blocking(move || file.unlock())
            .await
            .map_err(|e| Error::State {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
            .map_err(|e| Error::State {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Error::State {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }
}

/// The state backend boundary (spec §6): `read/write/delete/list/exists/lock`.
/// Names are opaque paths relative to whatever root the backend was
/// constructed with.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn lock(&self, path: &str, holder: &str) -> Result<Box<dyn LockGuard>>;
}

/// JSON-file-per-key state on local disk, with a CRC32 checksum sidecar
/// per record and a `.lock` sidecar for the advisory lock.
pub struct LocalFileStateBackend {
    root: PathBuf,
}

impl LocalFileStateBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFileStateBackend { root: root.into() }
    }

    fn data_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn checksum_path(&self, path: &str) -> PathBuf {
        let mut p = self.data_path(path).into_os_string();
        p.push(".crc32");
        PathBuf::from(p)
    }

    fn lock_path(&self, path: &str) -> PathBuf {
        let mut p = self.data_path(path).into_os_string();
        p.push(".lock");
        PathBuf::from(p)
    }
}

#[async_trait]
impl StateBackend for LocalFileStateBackend {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let data_path = self.data_path(path);
        let bytes = match fs::read(&data_path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::State {
                    path: path.to_string(),
                    message: e.to_string(),
                })
            }
        };

        if let Ok(checksum_raw) = fs::read_to_string(self.checksum_path(path)).await {
            let expected: u32 = checksum_raw.trim().parse().unwrap_or(0);
            if crc32fast::hash(&bytes) != expected {
                return Err(Error::State {
                    path: path.to_string(),
                    message: "checksum mismatch: state file is corrupt".to_string(),
                });
            }
        }

        Ok(Some(bytes))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let data_path = self.data_path(path);
        if let Some(parent) = data_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Error::State {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        }
        fs::write(&data_path, bytes).await.map_err(|e| Error::State {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        let checksum = crc32fast::hash(bytes);
        fs::write(self.checksum_path(path), checksum.to_string())
            .await
            .map_err(|e| Error::State {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let data_path = self.data_path(path);
        match fs::remove_file(&data_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::State {
                    path: path.to_string(),
                    message: e.to_string(),
                })
            }
        }
        let _ = fs::remove_file(self.checksum_path(path)).await;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.data_path(prefix);
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => {
                return Err(Error::State {
                    path: prefix.to_string(),
                    message: e.to_string(),
                })
            }
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::State {
            path: prefix.to_string(),
            message: e.to_string(),
        })? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".crc32") || name.ends_with(".lock") {
                continue;
            }
            out.push(format!("{prefix}/{name}"));
        }
        out.sort();
        Ok(out)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.data_path(path)).await.unwrap_or(false))
    }

    async fn lock(&self, path: &str, holder: &str) -> Result<Box<dyn LockGuard>> {
        let lock_path = self.lock_path(path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Error::State {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        }

        let info = LockInfo {
            holder: holder.to_string(),
            acquired_at_unix: now_unix(),
            heartbeat_unix: now_unix(),
        };

        let path_for_blocking = lock_path.clone();
        let path_for_err = path.to_string();
        let (file, info) = tokio::task::spawn_blocking(move || {
            acquire_lock_file(&path_for_blocking, info)
        })
        .await
        .map_err(|e| Error::State {
            path: path_for_err.clone(),
            message: e.to_string(),
        })?
        .map_err(|e| match e {
            LockAcquireError::Contention(holder) => Error::LockContention {
                path: path_for_err.clone(),
                holder,
            },
            LockAcquireError::Io(message) => Error::State {
                path: path_for_err.clone(),
                message,
            },
        })?;

        Ok(Box::new(FileLock {
            path: lock_path,
            info,
            file,
        }))
    }
}

enum LockAcquireError {
    /// Another holder already has the OS lock; carries their recorded
    /// `holder` name (best-effort — "unknown" if the sidecar content
    /// couldn't be read before the lock attempt failed).
    Contention(String),
    Io(String),
}

/// Open (or create) the `.lock` sidecar, take an OS-level exclusive
/// advisory lock on it via `fs2`, and stamp it with `info`. Runs on a
/// blocking thread since `fs2::FileExt` is synchronous.
fn acquire_lock_file(
    path: &std::path::Path,
    info: LockInfo,
) -> std::result::Result<(File, LockInfo), LockAcquireError> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| LockAcquireError::Io(e.to_string()))?;

    if file.try_lock_exclusive().is_err() {
        let mut existing = String::new();
        let holder = if file.read_to_string(&mut existing).is_ok() {
            serde_json::from_str::<LockInfo>(&existing)
                .map(|i| i.holder)
                .unwrap_or_else(|_| "unknown".to_string())
        } else {
            "unknown".to_string()
        };
        return Err(LockAcquireError::Contention(holder));
    }

    write_lock_info(file.try_clone().map_err(|e| LockAcquireError::Io(e.to_string()))?, &info)
        .map_err(|e| LockAcquireError::Io(e.to_string()))?;
    // `write_lock_info` wrote through the cloned descriptor; reuse the
    // original handle so the lock stays held via `file`.
    Ok((file, info))
}

/// Truncate and rewrite the lock sidecar's JSON body without releasing
/// the `flock` held on `file`.
fn write_lock_info(mut file: File, info: &LockInfo) -> std::result::Result<(), String> {
    let bytes = serde_json::to_vec_pretty(info).map_err(|e| e.to_string())?;
    file.seek(SeekFrom::Start(0)).map_err(|e| e.to_string())?;
    file.set_len(0).map_err(|e| e.to_string())?;
    file.write_all(&bytes).map_err(|e| e.to_string())?;
    file.flush().map_err(|e| e.to_string())
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
