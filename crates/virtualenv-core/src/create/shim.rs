//! Startup files dropped into a new environment.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

use super::Layout;
use crate::fs::ensure_dir;

const PATCH_SOURCE: &str = include_str!("../../resources/_virtualenv.py");
const SITE_SOURCE: &str = include_str!("../../resources/site.py");

pub const PATCH_MODULE: &str = "_virtualenv.py";
pub const PATCH_PTH: &str = "_virtualenv.pth";

/// Write `_virtualenv.py` and the `.pth` that imports it into purelib.
pub fn install_patch(layout: &Layout) -> Result<()> {
    ensure_dir(&layout.purelib)?;
    let script_dir = relative_to(&layout.bin_dir, &layout.purelib);
    let module = PATCH_SOURCE.replace("__SCRIPT_DIR__", &forward_slashes(&script_dir));
    write(&layout.purelib.join(PATCH_MODULE), &module)?;
    write(&layout.purelib.join(PATCH_PTH), "import _virtualenv")
}

/// Python 2 has no `pyvenv.cfg` support; a custom `site.py` in the
/// environment stdlib does the relocation instead.
pub fn install_site_py(layout: &Layout) -> Result<()> {
    let mut expected: Vec<String> = Vec::new();
    for dir in [&layout.purelib, &layout.platlib] {
        let relative = forward_slashes(&relative_to(dir, &layout.stdlib));
        if !expected.contains(&relative) {
            expected.push(relative);
        }
    }
    let expected = serde_json::to_string(&expected)?;
    let content = SITE_SOURCE.replace("___EXPECTED_SITE_PACKAGES___", &expected);
    ensure_dir(&layout.stdlib)?;
    write(&layout.stdlib.join("site.py"), &content)
}

fn write(path: &Path, content: &str) -> Result<()> {
    tracing::debug!(path = %path.display(), "write");
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

fn forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// `path` expressed relative to the directory `base`, both under the same
/// root.
pub(crate) fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path: Vec<Component<'_>> = path.components().collect();
    let base: Vec<Component<'_>> = base.components().collect();
    let common = path
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut relative = PathBuf::new();
    for _ in common..base.len() {
        relative.push("..");
    }
    for component in &path[common..] {
        relative.push(component.as_os_str());
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::fixtures::cpython_posix;
    use tempfile::tempdir;

    #[test]
    fn relative_paths_walk_up_then_down() {
        assert_eq!(
            relative_to(Path::new("/env/bin"), Path::new("/env/lib/python3.12/site-packages")),
            PathBuf::from("../../../bin")
        );
        assert_eq!(
            relative_to(Path::new("/env/lib/python2.7/site-packages"), Path::new("/env/lib/python2.7")),
            PathBuf::from("site-packages")
        );
        assert_eq!(relative_to(Path::new("/env"), Path::new("/env")), PathBuf::from("."));
    }

    #[test]
    fn patch_lands_in_purelib() -> Result<()> {
        let temp = tempdir()?;
        let info = cpython_posix(Path::new("/usr"));
        let layout = Layout::from_scheme(&info, temp.path())?;
        install_patch(&layout)?;
        assert_eq!(fs::read_to_string(layout.purelib.join(PATCH_PTH))?, "import _virtualenv");
        let module = fs::read_to_string(layout.purelib.join(PATCH_MODULE))?;
        assert!(module.contains("\"../../../bin\""));
        assert!(module.contains("posix_local"));
        Ok(())
    }

    #[test]
    fn site_py_lists_site_packages_once() -> Result<()> {
        let temp = tempdir()?;
        let info = cpython_posix(Path::new("/usr"));
        let layout = Layout::from_scheme(&info, temp.path())?;
        install_site_py(&layout)?;
        let site = fs::read_to_string(layout.stdlib.join("site.py"))?;
        assert!(site.contains("[\"site-packages\"]"));
        assert!(!site.contains("___EXPECTED_SITE_PACKAGES___"));
        Ok(())
    }
}
