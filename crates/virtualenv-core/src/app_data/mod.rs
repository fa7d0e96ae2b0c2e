//! Versioned on-disk cache shared by every run: interpreter probes, wheel
//! downloads, extracted wheel images and periodic update ledgers.
//!
//! Layout under the root:
//!
//! ```text
//! py_info/<tool-version>/<sha256(path)>.json
//! wheel/<pyver>/download/*.whl
//! wheel/<pyver>/embed/<distribution>.json
//! wheel/<pyver>/image/<tool-version>/<wheel-stem>/
//! ```

mod lock;
mod location;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

pub use lock::{LockGuard, ReentrantFileLock};
pub use location::{resolve_default, AppDataLocation, OVERRIDE_ENV};

use crate::config::EnvSnapshot;
use crate::error::VirtualenvError;
use crate::fs::{ensure_dir, is_dir_writable, safe_delete, write_atomic};

/// Entries written by other tool versions are ignored and cleaned up by
/// [`AppData::house_keep`].
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum AppDataMode {
    Store,
    ReadOnly,
    Disabled,
}

#[derive(Debug, Clone, Default)]
pub struct AppDataOptions {
    pub dir: Option<PathBuf>,
    pub read_only: bool,
    pub reset: bool,
}

#[derive(Debug)]
pub struct AppData {
    mode: AppDataMode,
    root: PathBuf,
    lock: ReentrantFileLock,
    // Disabled: the root itself. ReadOnly: where images and downloads go.
    scratch: Option<TempDir>,
}

impl AppData {
    /// Pick the store for this run from the options and environment.
    pub fn open(options: &AppDataOptions, env: &EnvSnapshot) -> Result<Self> {
        let location = match &options.dir {
            Some(dir) => AppDataLocation {
                path: Some(dir.clone()),
                source: "--app-data",
            },
            None => resolve_default(env),
        };
        let Some(path) = location.path else {
            tracing::debug!(source = location.source, "app data disabled");
            return Self::disabled();
        };
        let path = std::path::absolute(&path)
            .with_context(|| format!("failed to resolve {}", path.display()))?;
        let app_data = if options.read_only {
            if options.reset {
                return Err(VirtualenvError::user("read-only app data cannot be reset").into());
            }
            if !path.is_dir() {
                return Err(VirtualenvError::user(format!(
                    "read-only app data folder {} does not exist",
                    path.display()
                ))
                .into());
            }
            Self::read_only(path)?
        } else if prepare_folder(&path) {
            Self::store(path)
        } else {
            tracing::warn!(
                path = %path.display(),
                "app data folder is not writable, using a temporary folder"
            );
            Self::disabled()?
        };
        if options.reset {
            app_data.reset()?;
        }
        tracing::debug!(mode = %app_data.mode, root = %app_data.root.display(), "app data");
        Ok(app_data)
    }

    pub fn store(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            mode: AppDataMode::Store,
            lock: ReentrantFileLock::new(&root),
            root,
            scratch: None,
        }
    }

    pub fn read_only(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let scratch = tempfile::Builder::new()
            .prefix("virtualenv-app-data")
            .tempdir()
            .context("failed to create scratch folder for read-only app data")?;
        Ok(Self {
            mode: AppDataMode::ReadOnly,
            lock: ReentrantFileLock::new(&root),
            root,
            scratch: Some(scratch),
        })
    }

    pub fn disabled() -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("virtualenv-app-data")
            .tempdir()
            .context("failed to create temporary app data folder")?;
        let root = scratch.path().to_path_buf();
        tracing::debug!(path = %root.display(), "created temporary app data folder");
        Ok(Self {
            mode: AppDataMode::Disabled,
            lock: ReentrantFileLock::new(&root),
            root,
            scratch: Some(scratch),
        })
    }

    pub fn mode(&self) -> AppDataMode {
        self.mode
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == AppDataMode::ReadOnly
    }

    /// Images and downloads are removed when this value drops.
    pub fn is_transient(&self) -> bool {
        self.mode != AppDataMode::Store
    }

    /// Only a persistent, writable store can host periodic updates.
    pub fn can_update(&self) -> bool {
        self.mode == AppDataMode::Store
    }

    /// Drop every cached entry.
    pub fn reset(&self) -> Result<()> {
        if self.is_read_only() {
            bail!("read-only app data cannot be reset");
        }
        tracing::debug!(path = %self.root.display(), "reset app data folder");
        safe_delete(&self.root)?;
        ensure_dir(&self.root)
    }

    /// Remove subtrees written by other tool versions.
    pub fn house_keep(&self) -> Result<()> {
        if self.mode != AppDataMode::Store {
            return Ok(());
        }
        let _guard = self.lock.lock_for_key("house-keep", false)?;
        remove_other_versions(&self.root.join("py_info"))?;
        let wheel = self.root.join("wheel");
        if wheel.is_dir() {
            for entry in fs::read_dir(&wheel)
                .with_context(|| format!("failed to list {}", wheel.display()))?
                .flatten()
            {
                remove_other_versions(&entry.path().join("image"))?;
            }
        }
        Ok(())
    }

    pub fn py_info(&self, exe: &Path) -> ContentStore {
        let key = hex::encode(Sha256::digest(exe.to_string_lossy().as_bytes()));
        let folder = self.root.join("py_info").join(TOOL_VERSION);
        ContentStore::new(folder, key, self.mode != AppDataMode::ReadOnly)
    }

    pub fn py_info_clear(&self) -> Result<()> {
        if self.is_read_only() {
            return Ok(());
        }
        let folder = self.root.join("py_info").join(TOOL_VERSION);
        let _guard = ReentrantFileLock::new(&folder).lock()?;
        safe_delete(&folder)
    }

    pub fn embed_update_log(&self, distribution: &str, for_py_version: &str) -> ContentStore {
        let folder = self.root.join("wheel").join(for_py_version).join("embed");
        ContentStore::new(folder, distribution.to_string(), self.can_update())
    }

    /// Folder holding downloaded wheels for `for_py_version`.
    pub fn house(&self, for_py_version: &str) -> PathBuf {
        self.writable_root()
            .join("wheel")
            .join(for_py_version)
            .join("download")
    }

    /// Folders scanned for previously downloaded wheels, most specific first.
    pub fn house_candidates(&self, for_py_version: &str) -> Vec<PathBuf> {
        let mut folders = vec![self.house(for_py_version)];
        if self.is_read_only() {
            folders.push(
                self.root
                    .join("wheel")
                    .join(for_py_version)
                    .join("download"),
            );
        }
        folders
    }

    pub fn wheel_image(&self, for_py_version: &str, stem: &str) -> WheelImage {
        let rel = Path::new("wheel")
            .join(for_py_version)
            .join("image")
            .join(TOOL_VERSION);
        let shared = self.root.join(&rel);
        let folder = if self.is_read_only() && !shared.join(stem).is_dir() {
            self.writable_root().join(&rel)
        } else {
            shared
        };
        WheelImage {
            path: folder.join(stem),
            lock: ReentrantFileLock::new(folder),
            stem: stem.to_string(),
        }
    }

    /// Lock an arbitrary path in the store for the guard's lifetime.
    pub fn locked(&self, path: &Path) -> Result<Option<LockGuard>> {
        if self.is_read_only() && path.starts_with(&self.root) {
            return Ok(None);
        }
        ReentrantFileLock::new(path).lock().map(Some)
    }

    fn writable_root(&self) -> &Path {
        match (&self.mode, &self.scratch) {
            (AppDataMode::ReadOnly, Some(scratch)) => scratch.path(),
            _ => &self.root,
        }
    }
}

fn prepare_folder(path: &Path) -> bool {
    if !path.exists() {
        if let Err(err) = fs::create_dir_all(path) {
            tracing::info!(path = %path.display(), error = %err, "could not create app data folder");
            return false;
        }
        tracing::debug!(path = %path.display(), "created app data folder");
    }
    is_dir_writable(path)
}

fn remove_other_versions(folder: &Path) -> Result<()> {
    if !folder.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(folder)
        .with_context(|| format!("failed to list {}", folder.display()))?
        .flatten()
    {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == TOOL_VERSION || name.ends_with(".lock") {
            continue;
        }
        tracing::debug!(path = %path.display(), "remove stale app data");
        safe_delete(&path)?;
    }
    Ok(())
}

/// One JSON document in the store with its own lock key.
#[derive(Debug, Clone)]
pub struct ContentStore {
    folder: PathBuf,
    key: String,
    writable: bool,
}

impl ContentStore {
    fn new(folder: PathBuf, key: String, writable: bool) -> Self {
        Self {
            folder,
            key,
            writable,
        }
    }

    pub fn file(&self) -> PathBuf {
        self.folder.join(format!("{}.json", self.key))
    }

    pub fn exists(&self) -> bool {
        self.file().is_file()
    }

    /// Corrupt documents are evicted and read as absent.
    pub fn read(&self) -> Option<Value> {
        let file = self.file();
        let bytes = fs::read(&file).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                tracing::trace!(path = %file.display(), "got cached content");
                Some(value)
            }
            Err(err) => {
                tracing::debug!(path = %file.display(), error = %err, "evict unreadable cache entry");
                if self.writable {
                    let _ = fs::remove_file(&file);
                }
                None
            }
        }
    }

    pub fn write(&self, content: &Value) -> Result<()> {
        let file = self.file();
        if !self.writable {
            tracing::debug!(path = %file.display(), "app data is read-only, skip write");
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(content)?;
        write_atomic(&file, &bytes)?;
        tracing::debug!(path = %file.display(), "wrote cache entry");
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }
        let file = self.file();
        match fs::remove_file(&file) {
            Ok(()) => {
                tracing::debug!(path = %file.display(), "removed cache entry");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", file.display())),
        }
    }

    /// Exclusive lock on this entry; `None` when the store is read-only.
    pub fn locked(&self, no_block: bool) -> Result<Option<LockGuard>> {
        if !self.writable {
            return Ok(None);
        }
        ReentrantFileLock::new(&self.folder)
            .lock_for_key(&self.key, no_block)
            .map(Some)
    }
}

/// Extracted copy of one wheel, shared between environments.
#[derive(Debug, Clone)]
pub struct WheelImage {
    path: PathBuf,
    lock: ReentrantFileLock,
    stem: String,
}

impl WheelImage {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn locked(&self) -> Result<LockGuard> {
        self.lock.lock_for_key(&self.stem, false)
    }

    pub fn remove(&self) -> Result<()> {
        safe_delete(&self.path)
    }
}
