use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

static SUPPORTS_SYMLINK: Lazy<bool> = Lazy::new(probe_symlink_support);
static CASE_SENSITIVE: Lazy<bool> = Lazy::new(probe_case_sensitive);

pub fn fs_supports_symlink() -> bool {
    *SUPPORTS_SYMLINK
}

pub fn fs_is_case_sensitive() -> bool {
    *CASE_SENSITIVE
}

#[cfg(unix)]
fn probe_symlink_support() -> bool {
    true
}

#[cfg(not(unix))]
fn probe_symlink_support() -> bool {
    let Ok(dir) = tempfile::tempdir() else {
        return false;
    };
    let src = dir.path().join("src");
    if fs::write(&src, b"").is_err() {
        return false;
    }
    let supported = symlink(&src, &dir.path().join("dst")).is_ok();
    tracing::debug!(supported, "symlink support");
    supported
}

fn probe_case_sensitive() -> bool {
    let Ok(file) = tempfile::Builder::new().prefix("tmP").tempfile() else {
        return true;
    };
    let lower = file.path().with_file_name(
        file.path()
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default(),
    );
    let sensitive = !lower.exists();
    tracing::debug!(sensitive, "filesystem case sensitivity");
    sensitive
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "create folder");
    }
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
}

/// Add execute permission for owner, group and others.
#[cfg(unix)]
pub fn make_exe(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    let mode = meta.permissions().mode() | 0o111;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to make {} executable", path.display()))
}

#[cfg(not(unix))]
pub fn make_exe(_path: &Path) -> Result<()> {
    Ok(())
}

pub fn symlink(src: &Path, dst: &Path) -> Result<()> {
    tracing::debug!(src = %src.display(), dst = %dst.display(), "symlink");
    #[cfg(unix)]
    let result = std::os::unix::fs::symlink(src, dst);
    #[cfg(windows)]
    let result = if src.is_dir() {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    };
    result.with_context(|| format!("failed to symlink {} -> {}", dst.display(), src.display()))
}

pub fn hardlink(src: &Path, dst: &Path) -> Result<()> {
    tracing::debug!(src = %src.display(), dst = %dst.display(), "hard link");
    fs::hard_link(src, dst)
        .with_context(|| format!("failed to hard link {} -> {}", dst.display(), src.display()))
}

/// Copy a file or a directory tree. Symlinks inside trees are recreated
/// as links.
pub fn copy(src: &Path, dst: &Path) -> Result<()> {
    tracing::debug!(src = %src.display(), dst = %dst.display(), "copy");
    if src.is_dir() {
        copy_tree(src, dst)
    } else {
        copy_file(src, dst)
    }
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| anyhow!("{} escaped {}", entry.path().display(), src.display()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            ensure_dir(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("failed to read link {}", entry.path().display()))?;
            symlink(&link, &target)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Remove a file, link, or directory tree. Missing paths are fine.
pub fn safe_delete(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("failed to stat {}", path.display())),
    };
    if meta.is_dir() && !meta.file_type().is_symlink() {
        return remove_dir_all_writable(path);
    }
    fs::remove_file(path)
        .or_else(|err| {
            // directory symlinks on Windows are removed as directories
            if meta.file_type().is_symlink() {
                fs::remove_dir(path)
            } else {
                Err(err)
            }
        })
        .with_context(|| format!("failed to remove {}", path.display()))
}

/// Undo [`make_readonly_files`] below `path` so the tree can be removed.
/// Links are left alone; failures are ignored.
pub fn make_writable_recursive(path: &Path) {
    for entry in WalkDir::new(path).follow_links(false).into_iter().flatten() {
        if entry.path_is_symlink() {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let mut perms = meta.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let owner = if meta.is_dir() { 0o700 } else { 0o600 };
            perms.set_mode(perms.mode() | owner);
        }
        #[cfg(not(unix))]
        perms.set_readonly(false);
        let _ = fs::set_permissions(entry.path(), perms);
    }
}

/// Mark every regular file under `root` read-only; directories stay
/// traversable.
pub fn make_readonly_files(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let mut perms = fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?
            .permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(perms.mode() & 0o555);
        }
        #[cfg(not(unix))]
        perms.set_readonly(true);
        fs::set_permissions(path, perms)
            .with_context(|| format!("failed to protect {}", path.display()))?;
    }
    Ok(())
}

pub fn remove_dir_all_writable(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to stat {}", path.display())),
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(path).with_context(|| format!("failed to unlink {}", path.display()))
        }
        Ok(_) => {
            make_writable_recursive(path);
            fs::remove_dir_all(path).with_context(|| format!("failed to remove {}", path.display()))
        }
    }
}

/// Write through a sibling temp file and rename into place.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("failed to write {}", dest.display()))?;
    tmp.persist(dest)
        .map_err(|err| anyhow!("failed to persist {}: {}", dest.display(), err.error))?;
    Ok(())
}

/// First existing ancestor of `path`, including `path` itself.
pub fn first_existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors().find(|p| p.exists()).map(Path::to_path_buf)
}

/// Whether a new entry can be created inside `dir`.
pub fn is_dir_writable(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    tempfile::Builder::new()
        .prefix(".virtualenv-write-check")
        .tempfile_in(dir)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copy_tree_recreates_layout() -> Result<()> {
        let temp = tempdir()?;
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("pkg/sub"))?;
        fs::write(src.join("pkg/__init__.py"), "")?;
        fs::write(src.join("pkg/sub/mod.py"), "x = 1\n")?;
        let dst = temp.path().join("dst");
        copy(&src, &dst)?;
        assert_eq!(fs::read_to_string(dst.join("pkg/sub/mod.py"))?, "x = 1\n");
        Ok(())
    }

    #[test]
    fn safe_delete_handles_missing_and_readonly() -> Result<()> {
        let temp = tempdir()?;
        safe_delete(&temp.path().join("missing"))?;
        let tree = temp.path().join("tree");
        fs::create_dir_all(tree.join("a"))?;
        fs::write(tree.join("a/file.txt"), "x")?;
        make_readonly_files(&tree)?;
        safe_delete(&tree)?;
        assert!(!tree.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn make_exe_sets_all_execute_bits() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let temp = tempdir()?;
        let path = temp.path().join("tool");
        fs::write(&path, "#!/bin/sh\n")?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
        make_exe(&path)?;
        assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o755);
        Ok(())
    }

    #[test]
    fn write_atomic_replaces_content() -> Result<()> {
        let temp = tempdir()?;
        let dest = temp.path().join("nested/state.json");
        write_atomic(&dest, b"{}")?;
        write_atomic(&dest, b"{\"a\":1}")?;
        assert_eq!(fs::read_to_string(&dest)?, "{\"a\":1}");
        Ok(())
    }

    #[test]
    fn writable_check_and_ancestors() -> Result<()> {
        let temp = tempdir()?;
        assert!(is_dir_writable(temp.path()));
        let deep = temp.path().join("a/b/c");
        assert_eq!(first_existing_ancestor(&deep), Some(temp.path().to_path_buf()));
        Ok(())
    }
}
