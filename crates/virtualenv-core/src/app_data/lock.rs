use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use anyhow::{anyhow, Context, Result};
use fs4::FileExt;
use once_cell::sync::Lazy;

use crate::error::VirtualenvError;
use crate::fs::ensure_dir;

/// One entry per lock file path, shared by every handle in this process.
#[derive(Default)]
struct Holder {
    owner: Option<ThreadId>,
    depth: usize,
    file: Option<File>,
}

#[derive(Default)]
struct Slot {
    holder: Mutex<Holder>,
    released: Condvar,
}

static SLOTS: Lazy<Mutex<HashMap<PathBuf, Arc<Slot>>>> = Lazy::new(Mutex::default);

fn slot_for(path: &Path) -> Result<Arc<Slot>> {
    let mut slots = SLOTS
        .lock()
        .map_err(|_| anyhow!("lock registry poisoned"))?;
    Ok(slots.entry(path.to_path_buf()).or_default().clone())
}

fn hold(slot: &Slot) -> Result<MutexGuard<'_, Holder>> {
    slot.holder
        .lock()
        .map_err(|_| anyhow!("lock state poisoned"))
}

/// A directory guarded by `<name>.lock` files.
///
/// The same thread may take a lock it already owns; other threads of this
/// process wait on a condition variable, and other processes on the file
/// lock itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReentrantFileLock {
    path: PathBuf,
}

impl ReentrantFileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn join(&self, rel: impl AsRef<Path>) -> Self {
        Self::new(self.path.join(rel))
    }

    /// Lock the directory itself through a sibling `<dir>.lock`.
    pub fn lock(&self) -> Result<LockGuard> {
        let name = self
            .path
            .file_name()
            .map(|name| format!("{}.lock", name.to_string_lossy()))
            .ok_or_else(|| anyhow!("cannot lock {}", self.path.display()))?;
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        acquire(&parent.join(name), false)
    }

    /// Lock `<dir>/<key>.lock`. With `no_block` a lock held elsewhere fails
    /// with [`VirtualenvError::LockTimeout`] instead of waiting.
    pub fn lock_for_key(&self, key: &str, no_block: bool) -> Result<LockGuard> {
        acquire(&self.path.join(format!("{key}.lock")), no_block)
    }
}

/// Released when dropped; the file lock goes away with the outermost guard.
#[must_use]
pub struct LockGuard {
    slot: Arc<Slot>,
    path: PathBuf,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Ok(mut holder) = self.slot.holder.lock() else {
            return;
        };
        holder.depth = holder.depth.saturating_sub(1);
        if holder.depth == 0 {
            if let Some(file) = holder.file.take() {
                let _ = file.unlock();
            }
            holder.owner = None;
            tracing::trace!(path = %self.path.display(), "released lock");
            self.slot.released.notify_one();
        }
    }
}

fn acquire(lock_file: &Path, no_block: bool) -> Result<LockGuard> {
    let slot = slot_for(lock_file)?;
    let me = thread::current().id();
    {
        let mut holder = hold(&slot)?;
        loop {
            match holder.owner {
                Some(owner) if owner == me => {
                    holder.depth += 1;
                    drop(holder);
                    return Ok(LockGuard {
                        slot,
                        path: lock_file.to_path_buf(),
                    });
                }
                None => break,
                Some(_) if no_block => {
                    return Err(VirtualenvError::LockTimeout {
                        path: lock_file.to_path_buf(),
                    }
                    .into())
                }
                Some(_) => {
                    holder = slot
                        .released
                        .wait(holder)
                        .map_err(|_| anyhow!("lock state poisoned"))?;
                }
            }
        }
        holder.owner = Some(me);
        holder.depth = 1;
    }

    match open_and_lock(lock_file, no_block) {
        Ok(file) => {
            hold(&slot)?.file = Some(file);
            tracing::trace!(path = %lock_file.display(), "acquired lock");
            Ok(LockGuard {
                slot,
                path: lock_file.to_path_buf(),
            })
        }
        Err(err) => {
            let mut holder = hold(&slot)?;
            holder.owner = None;
            holder.depth = 0;
            slot.released.notify_one();
            Err(err)
        }
    }
}

fn open_and_lock(path: &Path, no_block: bool) -> Result<File> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    match file.try_lock_exclusive() {
        Ok(()) => return Ok(file),
        Err(err) if is_busy(&err) => {}
        Err(err) => return Err(err).with_context(|| format!("failed to lock {}", path.display())),
    }
    if no_block {
        return Err(VirtualenvError::LockTimeout {
            path: path.to_path_buf(),
        }
        .into());
    }
    tracing::debug!(path = %path.display(), "lock file present, will block until released");
    file.lock_exclusive()
        .with_context(|| format!("failed to lock {}", path.display()))?;
    Ok(file)
}

fn is_busy(err: &std::io::Error) -> bool {
    if err.kind() == ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(windows)]
    if matches!(err.raw_os_error(), Some(32 | 33)) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn same_thread_reenters() -> Result<()> {
        let temp = tempdir()?;
        let lock = ReentrantFileLock::new(temp.path().join("cache"));
        let outer = lock.lock_for_key("entry", false)?;
        let inner = lock.lock_for_key("entry", true)?;
        drop(inner);
        drop(outer);
        assert!(temp.path().join("cache/entry.lock").exists());
        Ok(())
    }

    #[test]
    fn other_thread_fails_fast_with_no_block() -> Result<()> {
        let temp = tempdir()?;
        let lock = ReentrantFileLock::new(temp.path());
        let guard = lock.lock_for_key("busy", false)?;
        let other = lock.clone();
        let result = thread::spawn(move || other.lock_for_key("busy", true).map(drop))
            .join()
            .map_err(|_| anyhow!("thread panicked"))?;
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VirtualenvError>(),
            Some(VirtualenvError::LockTimeout { .. })
        ));
        drop(guard);
        lock.lock_for_key("busy", true)?;
        Ok(())
    }

    #[test]
    fn blocking_waiter_proceeds_after_release() -> Result<()> {
        let temp = tempdir()?;
        let lock = ReentrantFileLock::new(temp.path());
        let guard = lock.lock()?;
        let (tx, rx) = mpsc::channel();
        let other = lock.clone();
        let handle = thread::spawn(move || {
            let acquired = other.lock().map(drop);
            let _ = tx.send(acquired.is_ok());
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(guard);
        assert!(rx.recv_timeout(Duration::from_secs(10))?);
        handle.join().map_err(|_| anyhow!("thread panicked"))?;
        Ok(())
    }
}
