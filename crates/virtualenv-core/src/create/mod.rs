//! Materialize a new environment for a discovered interpreter.
//!
//! Builtin variants assemble the environment themselves from references
//! to the host installation; the `venv` variant delegates to the host's
//! own `venv` module. Both finish the same way: `pyvenv.cfg`, the VCS
//! ignore file and the startup patch.

mod cpython;
mod graalpy;
mod pypy;
mod refs;
mod rustpython;
mod shim;
mod venv;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use virtualenv_domain::PyEnvCfg;

pub use refs::{Method, Ref, RefMeta, RefMust, RefWhen};
pub(crate) use shim::relative_to;
pub use shim::{PATCH_MODULE, PATCH_PTH};

use crate::app_data::TOOL_VERSION;
use crate::discovery::PyInfo;
use crate::error::VirtualenvError;
use crate::fs::{ensure_dir, first_existing_ancestor, is_dir_writable, safe_delete};

pub const GITIGNORE: &str = ".gitignore";
pub const GITIGNORE_CONTENT: &str = "# created by virtualenv automatically\n*\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter)]
pub enum CreatorKind {
    #[strum(serialize = "cpython3-posix")]
    CPython3Posix,
    #[strum(serialize = "cpython3-mac-framework")]
    CPython3MacFramework,
    #[strum(serialize = "cpython3-win")]
    CPython3Windows,
    #[strum(serialize = "cpython2-posix")]
    CPython2Posix,
    #[strum(serialize = "cpython2-win")]
    CPython2Windows,
    #[strum(serialize = "pypy3-posix")]
    PyPy3Posix,
    #[strum(serialize = "pypy3-win")]
    PyPy3Windows,
    #[strum(serialize = "graalpy-posix")]
    GraalPyPosix,
    #[strum(serialize = "graalpy-win")]
    GraalPyWindows,
    #[strum(serialize = "rustpython-posix")]
    RustPythonPosix,
    #[strum(serialize = "venv")]
    Venv,
}

/// What `--creator` asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreatorChoice {
    /// The first builtin variant that describes the interpreter, else venv.
    #[default]
    Auto,
    /// The first builtin variant that describes the interpreter.
    Builtin,
    Kind(CreatorKind),
}

impl FromStr for CreatorChoice {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "" => Ok(Self::Auto),
            "builtin" => Ok(Self::Builtin),
            other => CreatorKind::from_str(other)
                .map(Self::Kind)
                .map_err(|_| VirtualenvError::user(format!("unknown creator {other}")).into()),
        }
    }
}

/// Names accepted by `--creator`.
pub fn creator_names() -> Vec<String> {
    use strum::IntoEnumIterator;
    std::iter::once("builtin".to_string())
        .chain(CreatorKind::iter().map(|kind| kind.to_string()))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct CreatorOptions {
    pub dest: PathBuf,
    pub clear: bool,
    pub no_vcs_ignore: bool,
    pub system_site_packages: bool,
    /// Force byte copies instead of symlinks.
    pub copies: bool,
    pub prompt: Option<String>,
    pub choice: CreatorChoice,
}

/// Absolute locations inside the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub dest: PathBuf,
    pub bin_dir: PathBuf,
    pub lib_dir: PathBuf,
    pub stdlib: PathBuf,
    pub purelib: PathBuf,
    pub platlib: PathBuf,
    pub include: PathBuf,
    /// `python[.exe]` inside `bin_dir`.
    pub exe: PathBuf,
}

impl Layout {
    /// Derive the layout from the interpreter's install scheme.
    pub fn from_scheme(info: &PyInfo, dest: &Path) -> Result<Self> {
        let bin_dir = dest.join(info.install_path("scripts")?);
        let exe = bin_dir.join(format!("python{}", info.exe_suffix()));
        Ok(Self {
            dest: dest.to_path_buf(),
            lib_dir: dest.join(if info.is_windows() { "Lib" } else { "lib" }),
            stdlib: dest.join(info.install_path("stdlib")?),
            purelib: dest.join(info.install_path("purelib")?),
            platlib: dest.join(info.install_path("platlib")?),
            include: dest.join(info.install_path("include")?),
            bin_dir,
            exe,
        })
    }

    fn dirs(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = Vec::new();
        for dir in [
            &self.bin_dir,
            &self.lib_dir,
            &self.stdlib,
            &self.purelib,
            &self.platlib,
            &self.include,
        ] {
            if !dirs.contains(&dir.as_path()) {
                dirs.push(dir);
            }
        }
        dirs
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in self.dirs() {
            ensure_dir(dir)?;
        }
        Ok(())
    }
}

/// One builtin way of laying out an environment for a family of
/// interpreters.
pub(crate) trait Builtin: Sync {
    fn kind(&self) -> CreatorKind;

    fn can_describe(&self, info: &PyInfo) -> bool;

    fn layout(&self, info: &PyInfo, dest: &Path) -> Result<Layout> {
        Layout::from_scheme(info, dest)
    }

    /// Files pulled from the host; required ones are always listed, optional
    /// ones only when present on disk.
    fn sources(&self, info: &PyInfo, layout: &Layout) -> Vec<Ref>;

    /// Extra `pyvenv.cfg` entries.
    fn configure(&self, _info: &PyInfo, _cfg: &mut PyEnvCfg) {}

    /// Runs after every reference is in place.
    fn finish(&self, _info: &PyInfo, _layout: &Layout, _symlinks: bool) -> Result<()> {
        Ok(())
    }
}

static BUILTINS: &[&dyn Builtin] = &[
    &cpython::CPython3MacFramework,
    &cpython::CPython3Posix,
    &cpython::CPython3Windows,
    &cpython::CPython2Posix,
    &cpython::CPython2Windows,
    &pypy::PyPy3Posix,
    &pypy::PyPy3Windows,
    &graalpy::GraalPyPosix,
    &graalpy::GraalPyWindows,
    &rustpython::RustPythonPosix,
];

fn builtin_for(info: &PyInfo) -> Option<&'static dyn Builtin> {
    BUILTINS.iter().copied().find(|builtin| builtin.can_describe(info))
}

fn builtin_of(kind: CreatorKind) -> Option<&'static dyn Builtin> {
    BUILTINS.iter().copied().find(|builtin| builtin.kind() == kind)
}

/// Creator variants usable with `info`, in preference order.
pub fn available_creators(info: &PyInfo) -> Vec<CreatorKind> {
    let mut kinds: Vec<CreatorKind> = BUILTINS
        .iter()
        .filter(|builtin| builtin.can_describe(info))
        .map(|builtin| builtin.kind())
        .collect();
    if info.has_venv {
        kinds.push(CreatorKind::Venv);
    }
    kinds
}

#[derive(Debug, Clone)]
pub struct Creator {
    kind: CreatorKind,
    interpreter: PyInfo,
    options: CreatorOptions,
    layout: Layout,
    symlinks: bool,
    refs: Vec<Ref>,
}

impl Creator {
    /// Pick the variant for `interpreter` and validate the destination.
    pub fn select(interpreter: &PyInfo, mut options: CreatorOptions) -> Result<Self> {
        options.dest = validate_dest(&options.dest)?;
        let unsupported = |kind: CreatorKind| VirtualenvError::UnsupportedCreator {
            creator: kind.to_string(),
            interpreter: interpreter.to_string(),
        };
        let (kind, builtin) = match options.choice {
            CreatorChoice::Auto => match builtin_for(interpreter) {
                Some(builtin) => (builtin.kind(), Some(builtin)),
                None if interpreter.has_venv => (CreatorKind::Venv, None),
                None => {
                    return Err(VirtualenvError::UnsupportedCreator {
                        creator: "builtin".into(),
                        interpreter: interpreter.to_string(),
                    }
                    .into())
                }
            },
            CreatorChoice::Builtin => {
                let builtin = builtin_for(interpreter).ok_or_else(|| VirtualenvError::UnsupportedCreator {
                    creator: "builtin".into(),
                    interpreter: interpreter.to_string(),
                })?;
                (builtin.kind(), Some(builtin))
            }
            CreatorChoice::Kind(CreatorKind::Venv) => {
                if !interpreter.has_venv {
                    return Err(unsupported(CreatorKind::Venv).into());
                }
                (CreatorKind::Venv, None)
            }
            CreatorChoice::Kind(kind) => match builtin_of(kind) {
                Some(builtin) if builtin.can_describe(interpreter) => (kind, Some(builtin)),
                _ => return Err(unsupported(kind).into()),
            },
        };

        let layout = match builtin.or_else(|| builtin_for(interpreter)) {
            Some(describer) => describer.layout(interpreter, &options.dest)?,
            None => Layout::from_scheme(interpreter, &options.dest)?,
        };
        let mut symlinks = !options.copies;
        let refs = match builtin {
            Some(builtin) => {
                let refs = builtin.sources(interpreter, &layout);
                let meta = RefMeta::of(&refs);
                if !meta.missing.is_empty() {
                    let missing: Vec<String> = meta.missing.iter().map(|p| p.display().to_string()).collect();
                    return Err(VirtualenvError::user(format!(
                        "{kind} creator cannot find {} for {interpreter}",
                        missing.join(", ")
                    ))
                    .into());
                }
                if options.copies && !meta.can_copy {
                    return Err(VirtualenvError::user(format!(
                        "{kind} creator only supports symlinks, drop --copies"
                    ))
                    .into());
                }
                if symlinks && !meta.can_symlink {
                    tracing::debug!(creator = %kind, "symlinks unavailable, copying");
                    symlinks = false;
                }
                refs
            }
            None => Vec::new(),
        };
        tracing::debug!(creator = %kind, dest = %options.dest.display(), symlinks, "selected creator");
        Ok(Self {
            kind,
            interpreter: interpreter.clone(),
            options,
            layout,
            symlinks,
            refs,
        })
    }

    pub fn kind(&self) -> CreatorKind {
        self.kind
    }

    pub fn dest(&self) -> &Path {
        &self.options.dest
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn interpreter(&self) -> &PyInfo {
        &self.interpreter
    }

    pub fn symlinks(&self) -> bool {
        self.symlinks
    }

    /// The environment's interpreter, used by seeders.
    pub fn exe(&self) -> &Path {
        &self.layout.exe
    }

    pub fn run(&self) -> Result<()> {
        let dest = self.dest();
        if self.options.clear && dest.exists() {
            tracing::debug!(path = %dest.display(), "delete");
            safe_delete(dest)?;
        }
        match self.kind {
            CreatorKind::Venv => {
                venv::create(self)?;
                self.layout.ensure_dirs()?;
                venv::merge_pyvenv_cfg(self.pyenv_cfg())?;
            }
            _ => {
                self.layout.ensure_dirs()?;
                for reference in self.refs.iter().filter(|r| r.applies(self.symlinks)) {
                    reference.run(self.symlinks).with_context(|| {
                        format!("failed to link {} into the environment", reference.src().display())
                    })?;
                }
                let mut cfg = self.pyenv_cfg();
                if let Some(builtin) = builtin_of(self.kind) {
                    builtin.configure(&self.interpreter, &mut cfg);
                    builtin.finish(&self.interpreter, &self.layout, self.symlinks)?;
                }
                cfg.write()?;
            }
        }
        if !self.options.no_vcs_ignore {
            write_gitignore(dest)?;
        }
        shim::install_patch(&self.layout)?;
        if self.interpreter.version_info.major == 2 {
            shim::install_site_py(&self.layout)?;
        }
        Ok(())
    }

    /// The keys every variant writes.
    pub fn pyenv_cfg(&self) -> PyEnvCfg {
        let info = &self.interpreter;
        let base = info.base_executable();
        let mut cfg = PyEnvCfg::for_env(self.dest());
        let home = base.parent().unwrap_or(base);
        cfg.set("home", home.display().to_string());
        cfg.set("implementation", info.implementation.clone());
        cfg.set("version", info.version_str());
        cfg.set("virtualenv", TOOL_VERSION);
        cfg.set("base-prefix", info.system_prefix().display().to_string());
        cfg.set("base-exec-prefix", info.system_exec_prefix().display().to_string());
        cfg.set("base-executable", base.display().to_string());
        cfg.set(
            "include-system-site-packages",
            if self.options.system_site_packages { "true" } else { "false" },
        );
        if let Some(prompt) = self.prompt() {
            cfg.set("prompt", prompt);
        }
        cfg
    }

    /// `.` stands for the name of the working directory.
    fn prompt(&self) -> Option<String> {
        let prompt = self.options.prompt.as_deref()?;
        if prompt == "." {
            let cwd = std::env::current_dir().ok()?;
            return cwd.file_name().map(|name| name.to_string_lossy().into_owned());
        }
        Some(prompt.to_string())
    }
}

impl fmt::Display for Creator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(dest={}, clear={}, no_vcs_ignore={}, global={}",
            self.kind,
            self.dest().display(),
            self.options.clear,
            self.options.no_vcs_ignore,
            self.options.system_site_packages
        )?;
        if self.kind != CreatorKind::Venv {
            let method = if self.symlinks { Method::Symlink } else { Method::Copy };
            write!(f, ", method={method}")?;
        }
        f.write_str(")")
    }
}

/// Reject destinations that would break activation or cannot be written,
/// and make the path absolute.
pub fn validate_dest(raw: &Path) -> Result<PathBuf> {
    let separator = if cfg!(windows) { ';' } else { ':' };
    let text = raw.to_string_lossy();
    if text.trim().is_empty() {
        return Err(VirtualenvError::user("destination must not be empty").into());
    }
    if text.contains(separator) {
        return Err(VirtualenvError::user(format!(
            "destination {text:?} must not contain the path separator ({separator}) as this would break the activation scripts"
        ))
        .into());
    }
    let dest = std::path::absolute(raw).with_context(|| format!("failed to resolve {}", raw.display()))?;
    if dest.is_file() {
        return Err(VirtualenvError::user(format!(
            "the destination {} already exists and is a file",
            dest.display()
        ))
        .into());
    }
    let Some(ancestor) = first_existing_ancestor(&dest) else {
        return Err(VirtualenvError::user(format!("no existing parent for {}", dest.display())).into());
    };
    if !ancestor.is_dir() {
        return Err(VirtualenvError::user(format!(
            "the destination {} is not a directory",
            ancestor.display()
        ))
        .into());
    }
    if !is_dir_writable(&ancestor) {
        return Err(VirtualenvError::user(format!(
            "the destination {} is not write-able at {}",
            dest.display(),
            ancestor.display()
        ))
        .into());
    }
    Ok(dest)
}

fn write_gitignore(dest: &Path) -> Result<()> {
    let path = dest.join(GITIGNORE);
    if path.exists() {
        return Ok(());
    }
    fs::write(&path, GITIGNORE_CONTENT).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::fixtures::cpython_posix;
    use tempfile::tempdir;

    fn host(temp: &Path) -> Result<PyInfo> {
        let prefix = temp.join("host");
        let bin = prefix.join("bin");
        fs::create_dir_all(&bin)?;
        fs::write(bin.join("python3.12"), b"#!binary")?;
        Ok(cpython_posix(&prefix))
    }

    fn options(dest: PathBuf) -> CreatorOptions {
        CreatorOptions {
            dest,
            ..CreatorOptions::default()
        }
    }

    #[test]
    fn creator_names_parse_back() {
        for name in creator_names() {
            assert!(name.parse::<CreatorChoice>().is_ok(), "{name}");
        }
        assert_eq!(
            "cpython3-posix".parse::<CreatorChoice>().ok(),
            Some(CreatorChoice::Kind(CreatorKind::CPython3Posix))
        );
        assert!("bogus".parse::<CreatorChoice>().is_err());
    }

    #[test]
    fn destination_rules() -> Result<()> {
        let temp = tempdir()?;
        let file = temp.path().join("file");
        fs::write(&file, b"")?;
        let err = validate_dest(&file).unwrap_err();
        assert!(err.to_string().contains("is a file"));
        let sep = if cfg!(windows) { ";" } else { ":" };
        let err = validate_dest(&temp.path().join(format!("a{sep}b"))).unwrap_err();
        assert!(err.to_string().contains("path separator"));
        let nested = temp.path().join("new").join("env");
        assert_eq!(validate_dest(&nested)?, nested);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn builtin_creates_full_environment() -> Result<()> {
        let temp = tempdir()?;
        let info = host(temp.path())?;
        let dest = temp.path().join("env");
        let creator = Creator::select(
            &info,
            CreatorOptions {
                prompt: Some("demo".into()),
                ..options(dest.clone())
            },
        )?;
        assert_eq!(creator.kind(), CreatorKind::CPython3Posix);
        creator.run()?;

        for name in ["python3.12", "python", "python3"] {
            assert!(dest.join("bin").join(name).exists(), "{name}");
        }
        assert_eq!(creator.exe(), dest.join("bin").join("python"));
        let cfg = PyEnvCfg::from_file(dest.join("pyvenv.cfg"))?;
        assert_eq!(cfg.get("implementation"), Some("CPython"));
        assert_eq!(cfg.get("version"), Some("3.12.4"));
        assert_eq!(cfg.get("include-system-site-packages"), Some("false"));
        assert_eq!(cfg.get("prompt"), Some("demo"));
        let home = info.base_executable().parent().map(|p| p.display().to_string());
        assert_eq!(cfg.get("home").map(String::from), home);
        assert_eq!(fs::read_to_string(dest.join(GITIGNORE))?, GITIGNORE_CONTENT);
        let purelib = dest.join("lib").join("python3.12").join("site-packages");
        assert!(purelib.join(PATCH_PTH).exists());
        assert!(purelib.join(PATCH_MODULE).exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn second_run_is_byte_identical() -> Result<()> {
        let temp = tempdir()?;
        let info = host(temp.path())?;
        let dest = temp.path().join("env");
        Creator::select(&info, options(dest.clone()))?.run()?;
        let first = fs::read(dest.join("pyvenv.cfg"))?;
        Creator::select(&info, options(dest.clone()))?.run()?;
        assert_eq!(fs::read(dest.join("pyvenv.cfg"))?, first);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn clear_removes_previous_content() -> Result<()> {
        let temp = tempdir()?;
        let info = host(temp.path())?;
        let dest = temp.path().join("env");
        fs::create_dir_all(&dest)?;
        fs::write(dest.join("magic"), b"")?;

        Creator::select(&info, options(dest.clone()))?.run()?;
        assert!(dest.join("magic").exists());

        let cleared = CreatorOptions {
            clear: true,
            ..options(dest.clone())
        };
        Creator::select(&info, cleared)?.run()?;
        assert!(!dest.join("magic").exists());
        assert!(dest.join("pyvenv.cfg").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn vcs_ignore_can_be_skipped() -> Result<()> {
        let temp = tempdir()?;
        let info = host(temp.path())?;
        let dest = temp.path().join("env");
        let creator = Creator::select(
            &info,
            CreatorOptions {
                no_vcs_ignore: true,
                copies: true,
                ..options(dest.clone())
            },
        )?;
        assert!(!creator.symlinks());
        creator.run()?;
        assert!(!dest.join(GITIGNORE).exists());
        let exe = dest.join("bin").join("python3.12");
        assert!(!fs::symlink_metadata(exe)?.file_type().is_symlink());
        Ok(())
    }

    #[test]
    fn mismatched_creator_is_rejected() -> Result<()> {
        let temp = tempdir()?;
        let info = host(temp.path())?;
        let err = Creator::select(
            &info,
            CreatorOptions {
                choice: CreatorChoice::Kind(CreatorKind::PyPy3Posix),
                ..options(temp.path().join("env"))
            },
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VirtualenvError>(),
            Some(VirtualenvError::UnsupportedCreator { .. })
        ));
        Ok(())
    }

    #[test]
    fn missing_host_executable_is_reported() -> Result<()> {
        let temp = tempdir()?;
        let info = cpython_posix(&temp.path().join("nowhere"));
        let err = Creator::select(
            &info,
            CreatorOptions {
                choice: CreatorChoice::Builtin,
                ..options(temp.path().join("env"))
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot find"));
        Ok(())
    }

    #[test]
    #[serial_test::serial]
    fn dot_prompt_uses_working_directory_name() -> Result<()> {
        let temp = tempdir()?;
        let info = host(temp.path())?;
        let project = temp.path().join("demo-project");
        fs::create_dir_all(&project)?;
        let creator = Creator::select(
            &info,
            CreatorOptions {
                prompt: Some(".".into()),
                ..options(temp.path().join("env"))
            },
        )?;
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(&project)?;
        let cfg = creator.pyenv_cfg();
        std::env::set_current_dir(previous)?;
        assert_eq!(cfg.get("prompt"), Some("demo-project"));
        Ok(())
    }

    #[test]
    fn available_creators_end_with_venv() {
        let info = cpython_posix(Path::new("/usr"));
        let kinds = available_creators(&info);
        assert_eq!(kinds.first(), Some(&CreatorKind::CPython3Posix));
        assert_eq!(kinds.last(), Some(&CreatorKind::Venv));
    }
}
