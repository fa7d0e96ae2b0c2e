use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use super::refs::{Ref, RefMust};
use super::{Builtin, CreatorKind, Layout};
use crate::discovery::PyInfo;
use crate::process::run_command;

/// `<host name>`, `python`, `python3`, `python3.12`, plus any extras; the
/// first one becomes the primary executable.
pub(super) fn exe_names(info: &PyInfo, extra: &[&str]) -> Vec<String> {
    let suffix = info.exe_suffix();
    let mut names = Vec::new();
    if let Some(host) = info.base_executable().file_name() {
        names.push(host.to_string_lossy().into_owned());
    }
    names.extend(extra.iter().map(|stem| format!("{stem}{suffix}")));
    let version = &info.version_info;
    names.push(format!("python{suffix}"));
    names.push(format!("python{}{suffix}", version.major));
    names.push(format!("python{}.{}{suffix}", version.major, version.minor));
    names
}

/// Files in `dir` whose name satisfies `keep`, sorted for stable output.
pub(super) fn files_in(dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(&keep)
        })
        .collect();
    files.sort();
    files
}

fn is_cpython(info: &PyInfo, major: u32) -> bool {
    info.implementation == "CPython" && info.version_info.major == major
}

fn is_mac_framework(info: &PyInfo) -> bool {
    info.is_macos()
        && info
            .sysconfig_vars
            .get("PYTHONFRAMEWORK")
            .and_then(Option::as_deref)
            == Some("Python3")
}

fn host_exe_dir(info: &PyInfo) -> PathBuf {
    info.base_executable()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

pub(super) struct CPython3Posix;

impl Builtin for CPython3Posix {
    fn kind(&self) -> CreatorKind {
        CreatorKind::CPython3Posix
    }

    fn can_describe(&self, info: &PyInfo) -> bool {
        is_cpython(info, 3) && !info.is_windows() && !is_mac_framework(info)
    }

    fn sources(&self, info: &PyInfo, layout: &Layout) -> Vec<Ref> {
        vec![Ref::exe(info.base_executable(), &layout.bin_dir, exe_names(info, &[]))]
    }
}

/// Apple framework builds: the launcher is copied out of the framework
/// bundle and repointed at `.Python` in the environment root.
pub(super) struct CPython3MacFramework;

const FRAMEWORK_IMAGE: &str = "@executable_path/../../../../Python3";
const ENV_IMAGE: &str = "@executable_path/../.Python";

impl Builtin for CPython3MacFramework {
    fn kind(&self) -> CreatorKind {
        CreatorKind::CPython3MacFramework
    }

    fn can_describe(&self, info: &PyInfo) -> bool {
        is_cpython(info, 3) && is_mac_framework(info)
    }

    fn sources(&self, info: &PyInfo, layout: &Layout) -> Vec<Ref> {
        let launcher = info
            .prefix
            .join("Resources")
            .join("Python.app")
            .join("Contents")
            .join("MacOS")
            .join("Python");
        vec![
            Ref::exe(launcher, &layout.bin_dir, exe_names(info, &[])).must(RefMust::Copy),
            Ref::path(info.prefix.join("Python3"), layout.dest.join(".Python")),
        ]
    }

    fn finish(&self, info: &PyInfo, layout: &Layout, _symlinks: bool) -> Result<()> {
        let tool = Path::new("install_name_tool");
        for name in exe_names(info, &[]) {
            let exe = layout.bin_dir.join(name);
            let is_file = fs::symlink_metadata(&exe).is_ok_and(|meta| meta.file_type().is_file());
            if !is_file {
                continue;
            }
            let args = vec![
                "-change".to_string(),
                FRAMEWORK_IMAGE.to_string(),
                ENV_IMAGE.to_string(),
                exe.display().to_string(),
            ];
            tracing::debug!(exe = %exe.display(), "rewrite dylib reference");
            run_command(tool, &args, &[])?.ensure_success(tool, &args)?;
        }
        Ok(())
    }
}

pub(super) struct CPython3Windows;

impl CPython3Windows {
    /// The launcher the host's own venv would use, when it ships one.
    fn venv_launcher(info: &PyInfo, names: &[&str]) -> Option<PathBuf> {
        let dir = info.system_stdlib.join("venv").join("scripts").join("nt");
        names.iter().map(|name| dir.join(name)).find(|path| path.is_file())
    }

    fn python_zip(info: &PyInfo) -> Option<PathBuf> {
        let name = format!("python{}{}.zip", info.version_info.major, info.version_info.minor);
        info.path
            .iter()
            .map(PathBuf::from)
            .find(|entry| entry.file_name().is_some_and(|file| file.to_string_lossy() == name))
            .filter(|entry| entry.is_file())
    }
}

impl Builtin for CPython3Windows {
    fn kind(&self) -> CreatorKind {
        CreatorKind::CPython3Windows
    }

    fn can_describe(&self, info: &PyInfo) -> bool {
        // Store installs live under WindowsApps and refuse to be copied.
        is_cpython(info, 3)
            && info.is_windows()
            && !info
                .base_executable()
                .components()
                .any(|part| part.as_os_str() == "WindowsApps")
    }

    fn sources(&self, info: &PyInfo, layout: &Layout) -> Vec<Ref> {
        let bin = &layout.bin_dir;
        let mut names = vec!["python.exe".to_string()];
        names.extend(info.base_executable().file_name().map(|n| n.to_string_lossy().into_owned()));
        if let Some(launcher) = Self::venv_launcher(info, &["python.exe", "venvlauncher.exe"]) {
            let mut refs = vec![Ref::exe(launcher, bin, names).must(RefMust::Copy)];
            if let Some(gui) = Self::venv_launcher(info, &["pythonw.exe", "venvwlauncher.exe"]) {
                refs.push(Ref::exe(gui, bin, ["pythonw.exe"]).must(RefMust::Copy));
            }
            return refs;
        }

        let exe_dir = host_exe_dir(info);
        let mut refs = vec![Ref::exe(info.base_executable(), bin, names)];
        let gui = exe_dir.join("pythonw.exe");
        if gui.is_file() {
            refs.push(Ref::exe(gui, bin, ["pythonw.exe"]));
        }
        let is_library = |name: &str| {
            let name = name.to_ascii_lowercase();
            name.ends_with(".dll") || name.ends_with(".pyd")
        };
        for dir in [exe_dir, info.system_prefix().join("DLLs")] {
            for library in files_in(&dir, is_library) {
                if let Some(name) = library.file_name() {
                    let dest = bin.join(name);
                    refs.push(Ref::path(library, dest));
                }
            }
        }
        if let Some(zip) = Self::python_zip(info) {
            if let Some(name) = zip.file_name() {
                let dest = bin.join(name);
                refs.push(Ref::path(zip, dest));
            }
        }
        refs
    }
}

/// The `os` module is how Python 2 finds its prefix; it must sit in the
/// environment stdlib.
fn python2_landmarks(info: &PyInfo, layout: &Layout) -> Vec<Ref> {
    ["os.py", "os.pyc"]
        .into_iter()
        .map(|name| (info.system_stdlib.join(name), layout.stdlib.join(name)))
        .filter(|(src, _)| src.is_file())
        .map(|(src, dest)| Ref::path(src, dest))
        .collect()
}

pub(super) struct CPython2Posix;

impl Builtin for CPython2Posix {
    fn kind(&self) -> CreatorKind {
        CreatorKind::CPython2Posix
    }

    fn can_describe(&self, info: &PyInfo) -> bool {
        is_cpython(info, 2) && !info.is_windows()
    }

    fn sources(&self, info: &PyInfo, layout: &Layout) -> Vec<Ref> {
        let mut refs = vec![
            Ref::exe(info.base_executable(), &layout.bin_dir, exe_names(info, &[])).must(RefMust::Copy),
        ];
        refs.extend(python2_landmarks(info, layout));
        let dynload = info.system_stdlib.join("lib-dynload");
        if dynload.is_dir() {
            refs.push(Ref::path(dynload, layout.stdlib.join("lib-dynload")));
        }
        refs
    }
}

pub(super) struct CPython2Windows;

impl Builtin for CPython2Windows {
    fn kind(&self) -> CreatorKind {
        CreatorKind::CPython2Windows
    }

    fn can_describe(&self, info: &PyInfo) -> bool {
        is_cpython(info, 2) && info.is_windows()
    }

    fn sources(&self, info: &PyInfo, layout: &Layout) -> Vec<Ref> {
        let bin = &layout.bin_dir;
        let exe_dir = host_exe_dir(info);
        let mut names = vec!["python.exe".to_string()];
        names.extend(info.base_executable().file_name().map(|n| n.to_string_lossy().into_owned()));
        let mut refs = vec![Ref::exe(info.base_executable(), bin, names).must(RefMust::Copy)];
        let gui = exe_dir.join("pythonw.exe");
        if gui.is_file() {
            refs.push(Ref::exe(gui, bin, ["pythonw.exe"]).must(RefMust::Copy));
        }
        let dll = exe_dir.join(format!("python{}{}.dll", info.version_info.major, info.version_info.minor));
        if dll.is_file() {
            refs.push(Ref::path(dll.clone(), bin.join(dll.file_name().unwrap_or_default())));
        }
        let libs = info.system_prefix().join("libs");
        if libs.is_dir() {
            refs.push(Ref::path(libs, layout.dest.join("libs")));
        }
        refs.extend(python2_landmarks(info, layout));
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::fixtures::cpython_posix;
    use tempfile::tempdir;

    #[test]
    fn host_name_leads_the_aliases() {
        let info = cpython_posix(Path::new("/usr"));
        assert_eq!(
            exe_names(&info, &[]),
            vec!["python3.12", "python", "python3", "python3.12"]
        );
    }

    #[test]
    fn framework_builds_are_told_apart() {
        let mut info = cpython_posix(Path::new("/Library/Frameworks/Python3.framework/Versions/3.12"));
        assert!(CPython3Posix.can_describe(&info));
        info.platform = "darwin".into();
        info.sysconfig_vars
            .insert("PYTHONFRAMEWORK".into(), Some("Python3".into()));
        assert!(!CPython3Posix.can_describe(&info));
        assert!(CPython3MacFramework.can_describe(&info));
    }

    #[test]
    fn python2_copies_landmarks() -> Result<()> {
        let temp = tempdir()?;
        let mut info = cpython_posix(temp.path());
        info.version_info = virtualenv_domain::VersionInfo::new(2, 7, 18);
        fs::create_dir_all(info.system_stdlib.join("lib-dynload"))?;
        fs::write(info.system_stdlib.join("os.py"), b"")?;
        let layout = Layout::from_scheme(&info, &temp.path().join("env"))?;
        assert!(CPython2Posix.can_describe(&info));
        let refs = CPython2Posix.sources(&info, &layout);
        assert_eq!(refs[0].requirement(), RefMust::Copy);
        let dests: Vec<PathBuf> = refs.iter().flat_map(Ref::destinations).collect();
        assert!(dests.contains(&layout.stdlib.join("os.py")));
        assert!(dests.contains(&layout.stdlib.join("lib-dynload")));
        assert!(!dests.contains(&layout.stdlib.join("os.pyc")));
        Ok(())
    }

    #[test]
    fn windows_prefers_the_venv_launcher() -> Result<()> {
        let temp = tempdir()?;
        let mut info = cpython_posix(temp.path());
        info.os = "nt".into();
        info.platform = "win32".into();
        info.system_stdlib = temp.path().join("Lib");
        info.system_executable = Some(temp.path().join("python.exe"));
        fs::write(temp.path().join("python.exe"), b"")?;
        fs::write(temp.path().join("python312.dll"), b"")?;
        let layout = Layout::from_scheme(&info, &temp.path().join("env"))?;

        let refs = CPython3Windows.sources(&info, &layout);
        assert!(refs.iter().any(|r| r.src().ends_with("python312.dll")));

        let launchers = info.system_stdlib.join("venv").join("scripts").join("nt");
        fs::create_dir_all(&launchers)?;
        fs::write(launchers.join("python.exe"), b"")?;
        let refs = CPython3Windows.sources(&info, &layout);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].src(), launchers.join("python.exe"));
        assert_eq!(refs[0].exe_names(), ["python.exe"]);
        Ok(())
    }
}
