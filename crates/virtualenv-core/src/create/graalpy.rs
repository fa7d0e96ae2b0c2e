use std::path::PathBuf;

use virtualenv_domain::PyEnvCfg;

use super::cpython::exe_names;
use super::refs::{Ref, RefMust};
use super::{Builtin, CreatorKind, Layout};
use crate::discovery::PyInfo;

fn is_graalpy(info: &PyInfo) -> bool {
    info.implementation == "GraalVM"
}

fn native_lib(info: &PyInfo) -> PathBuf {
    let name = if info.is_macos() {
        "libpythonvm.dylib"
    } else {
        "libpythonvm.so"
    };
    info.system_prefix().join("lib").join(name)
}

/// The launcher plus the tools the probe reported next to it.
fn launchers(info: &PyInfo, layout: &Layout, must: RefMust) -> Vec<Ref> {
    let mut refs = vec![Ref::exe(info.base_executable(), &layout.bin_dir, exe_names(info, &["graalpy"])).must(must)];
    for (tool, names) in &info.extra_tools {
        refs.push(Ref::exe(tool, &layout.bin_dir, names.iter().cloned()).must(must));
    }
    refs
}

/// The posix launcher finds its runtime through a relative path, so only
/// symlinks work.
pub(super) struct GraalPyPosix;

impl Builtin for GraalPyPosix {
    fn kind(&self) -> CreatorKind {
        CreatorKind::GraalPyPosix
    }

    fn can_describe(&self, info: &PyInfo) -> bool {
        is_graalpy(info) && !info.is_windows()
    }

    fn sources(&self, info: &PyInfo, layout: &Layout) -> Vec<Ref> {
        let mut refs = launchers(info, layout, RefMust::Symlink);
        let lib = native_lib(info);
        if lib.is_file() {
            if let Some(name) = lib.file_name() {
                let dest = layout.lib_dir.join(name);
                refs.push(Ref::path(lib.clone(), dest).must(RefMust::Symlink));
            }
        }
        refs
    }
}

pub(super) struct GraalPyWindows;

impl Builtin for GraalPyWindows {
    fn kind(&self) -> CreatorKind {
        CreatorKind::GraalPyWindows
    }

    fn can_describe(&self, info: &PyInfo) -> bool {
        is_graalpy(info) && info.is_windows()
    }

    fn sources(&self, info: &PyInfo, layout: &Layout) -> Vec<Ref> {
        launchers(info, layout, RefMust::Any)
    }

    fn configure(&self, info: &PyInfo, cfg: &mut PyEnvCfg) {
        cfg.set("venvlauncher_command", info.base_executable().display().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create::RefMeta;
    use crate::discovery::fixtures::cpython_posix;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn posix_launchers_refuse_copies() -> Result<()> {
        let temp = tempdir()?;
        let mut info = cpython_posix(temp.path());
        info.implementation = "GraalVM".into();
        let bin = temp.path().join("bin");
        fs::create_dir_all(&bin)?;
        fs::write(bin.join("python3.12"), b"")?;
        fs::write(bin.join("graalpy-config"), b"")?;
        info.extra_tools
            .insert(bin.join("graalpy-config"), vec!["graalpy-config".into()]);
        let layout = Layout::from_scheme(&info, &temp.path().join("env"))?;

        let refs = GraalPyPosix.sources(&info, &layout);
        assert_eq!(refs.len(), 2);
        assert!(refs[0].exe_names().contains(&"graalpy".to_string()));
        let meta = RefMeta::of(&refs);
        assert!(!meta.can_copy);
        assert!(meta.missing.is_empty());
        Ok(())
    }
}
