use once_cell::sync::Lazy;
use regex::Regex;

use super::cpython::{exe_names, files_in};
use super::refs::Ref;
use super::{Builtin, CreatorKind, Layout};
use crate::discovery::PyInfo;

static POSIX_SHARED_LIB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^libpypy.*-c\.(so|dylib)$").expect("valid regex"));

fn is_pypy3(info: &PyInfo) -> bool {
    info.implementation == "PyPy" && info.version_info.major == 3
}

pub(super) struct PyPy3Posix;

impl Builtin for PyPy3Posix {
    fn kind(&self) -> CreatorKind {
        CreatorKind::PyPy3Posix
    }

    fn can_describe(&self, info: &PyInfo) -> bool {
        is_pypy3(info) && !info.is_windows()
    }

    fn sources(&self, info: &PyInfo, layout: &Layout) -> Vec<Ref> {
        let exe = info.base_executable();
        let mut refs = vec![Ref::exe(exe, &layout.bin_dir, exe_names(info, &["pypy3", "pypy"]))];
        let Some(exe_dir) = exe.parent() else {
            return refs;
        };
        let host_lib = info.system_prefix().join("lib");
        let mut seen = Vec::new();
        for dir in [exe_dir.to_path_buf(), host_lib.clone()] {
            for library in files_in(&dir, |name| POSIX_SHARED_LIB.is_match(name)) {
                let Some(name) = library.file_name().map(ToOwned::to_owned) else {
                    continue;
                };
                if seen.contains(&name) {
                    continue;
                }
                seen.push(name.clone());
                refs.push(Ref::path_to_many(
                    library,
                    vec![layout.bin_dir.join(&name), layout.lib_dir.join(&name)],
                ));
            }
        }
        // Everything else in the host lib folder except the stdlib itself,
        // e.g. tcl/tk.
        if let Ok(entries) = std::fs::read_dir(&host_lib) {
            let mut extras: Vec<_> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| *path != info.system_stdlib)
                .filter(|path| path.file_name().is_some_and(|name| !seen.iter().any(|s| s == name)))
                .collect();
            extras.sort();
            for path in extras {
                if let Some(name) = path.file_name() {
                    let dest = layout.lib_dir.join(name);
                    if !layout.stdlib.starts_with(&dest) {
                        refs.push(Ref::path(path.clone(), dest));
                    }
                }
            }
        }
        refs
    }
}

pub(super) struct PyPy3Windows;

impl Builtin for PyPy3Windows {
    fn kind(&self) -> CreatorKind {
        CreatorKind::PyPy3Windows
    }

    fn can_describe(&self, info: &PyInfo) -> bool {
        is_pypy3(info) && info.is_windows()
    }

    fn sources(&self, info: &PyInfo, layout: &Layout) -> Vec<Ref> {
        let exe = info.base_executable();
        let mut refs = vec![Ref::exe(exe, &layout.bin_dir, exe_names(info, &["pypy3", "pypy"]))];
        let Some(exe_dir) = exe.parent() else {
            return refs;
        };
        for gui in ["pypyw.exe", "pythonw.exe"] {
            let path = exe_dir.join(gui);
            if path.is_file() {
                refs.push(Ref::exe(path, &layout.bin_dir, [gui]));
            }
        }
        for library in files_in(exe_dir, |name| name.to_ascii_lowercase().ends_with(".dll")) {
            if let Some(name) = library.file_name() {
                let dest = layout.bin_dir.join(name);
                refs.push(Ref::path(library.clone(), dest));
            }
        }
        let libs = exe_dir.join("libs");
        if libs.is_dir() {
            refs.push(Ref::path(libs, layout.dest.join("libs")));
        }
        refs
    }
}
