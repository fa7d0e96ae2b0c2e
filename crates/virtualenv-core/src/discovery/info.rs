use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use virtualenv_domain::{PythonSpec, VersionInfo};

static CONFIG_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\w+)\}").expect("valid pattern"));

/// Everything the creators need to know about one host interpreter, as
/// reported by the probe script running under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyInfo {
    pub platform: String,
    pub implementation: String,
    pub version_info: VersionInfo,
    pub architecture: u32,
    #[serde(default)]
    pub machine: Option<String>,
    #[serde(default)]
    pub free_threaded: bool,
    pub version: String,
    pub os: String,
    pub prefix: PathBuf,
    #[serde(default)]
    pub base_prefix: Option<PathBuf>,
    #[serde(default)]
    pub real_prefix: Option<PathBuf>,
    #[serde(default)]
    pub base_exec_prefix: Option<PathBuf>,
    pub exec_prefix: PathBuf,
    pub executable: PathBuf,
    pub original_executable: PathBuf,
    #[serde(default)]
    pub system_executable: Option<PathBuf>,
    #[serde(default)]
    pub has_venv: bool,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub file_system_encoding: String,
    #[serde(default)]
    pub stdout_encoding: Option<String>,
    #[serde(default)]
    pub sysconfig_paths: BTreeMap<String, String>,
    #[serde(default)]
    pub sysconfig_vars: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub install_scheme: BTreeMap<String, String>,
    pub system_stdlib: PathBuf,
    #[serde(default)]
    pub system_stdlib_platform: Option<PathBuf>,
    /// Extra launcher binaries to link into the environment, source path to
    /// target names.
    #[serde(default)]
    pub extra_tools: BTreeMap<PathBuf, Vec<String>>,
}

impl PyInfo {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("invalid interpreter description")
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn is_windows(&self) -> bool {
        self.os == "nt"
    }

    pub fn is_macos(&self) -> bool {
        self.platform == "darwin"
    }

    pub fn exe_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".exe"
        } else {
            ""
        }
    }

    pub fn version_str(&self) -> String {
        self.version_info.version_str()
    }

    pub fn version_release_str(&self) -> String {
        self.version_info.release_str()
    }

    /// `python3.12`
    pub fn python_name(&self) -> String {
        format!("python{}", self.version_release_str())
    }

    pub fn is_old_virtualenv(&self) -> bool {
        self.real_prefix.is_some()
    }

    pub fn is_venv(&self) -> bool {
        self.base_prefix.is_some() && self.version_info.major == 3
    }

    pub fn system_prefix(&self) -> &Path {
        self.real_prefix
            .as_deref()
            .or(self.base_prefix.as_deref())
            .unwrap_or(&self.prefix)
    }

    pub fn system_exec_prefix(&self) -> &Path {
        self.real_prefix
            .as_deref()
            .or(self.base_exec_prefix.as_deref())
            .unwrap_or(&self.exec_prefix)
    }

    /// The system interpreter beneath this one, falling back to `executable`.
    pub fn base_executable(&self) -> &Path {
        self.system_executable
            .as_deref()
            .unwrap_or(&self.executable)
    }

    pub fn spec(&self) -> PythonSpec {
        PythonSpec {
            str_spec: String::new(),
            implementation: Some(self.implementation.clone()),
            major: Some(self.version_info.major),
            minor: Some(self.version_info.minor),
            micro: Some(self.version_info.micro),
            architecture: Some(self.architecture),
            machine: self.machine.clone(),
            free_threaded: Some(self.free_threaded),
            path: Some(self.executable.display().to_string()),
            version_specifier: None,
        }
    }

    /// Whether this interpreter meets `request`. A path request matches our
    /// executable exactly, or by file name or stem when it is a bare name.
    pub fn satisfies(&self, request: &PythonSpec) -> bool {
        if let Some(path) = request.path.as_deref() {
            if Path::new(path) == self.executable {
                return true;
            }
            if request.is_abs() {
                return false;
            }
            let exe = &self.original_executable;
            let named = [exe.file_name(), exe.file_stem()]
                .into_iter()
                .flatten()
                .any(|name| name.to_string_lossy() == path);
            if !named {
                return false;
            }
        }
        let mut request = request.clone();
        request.path = None;
        self.spec().satisfies(&request)
    }

    /// Expand the sysconfig template `key`, with `overrides` replacing
    /// config variables.
    pub fn sysconfig_path(&self, key: &str, overrides: &BTreeMap<String, String>) -> Option<String> {
        let pattern = self.sysconfig_paths.get(key)?;
        let expanded = CONFIG_VAR.replace_all(pattern, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            overrides
                .get(name)
                .cloned()
                .or_else(|| self.sysconfig_vars.get(name).cloned().flatten())
                .unwrap_or_default()
        });
        let sep = if self.is_windows() { "\\" } else { "/" };
        Some(expanded.replace('/', sep))
    }

    /// Path of install-scheme `key` relative to an environment root.
    pub fn install_path(&self, key: &str) -> Result<PathBuf> {
        if let Some(rel) = self.install_scheme.get(key) {
            return Ok(PathBuf::from(rel));
        }
        self.fallback_install_path(key)
            .ok_or_else(|| anyhow!("{self} does not describe install path {key}"))
    }

    fn fallback_install_path(&self, key: &str) -> Option<PathBuf> {
        let release = self.version_release_str();
        let path = if self.is_windows() {
            match key {
                "stdlib" | "platstdlib" => PathBuf::from("Lib"),
                "purelib" | "platlib" => PathBuf::from("Lib").join("site-packages"),
                "include" => PathBuf::from("Include"),
                "scripts" => PathBuf::from("Scripts"),
                "data" => PathBuf::new(),
                _ => return None,
            }
        } else {
            let lib = PathBuf::from("lib").join(format!("python{release}"));
            match key {
                "stdlib" | "platstdlib" => lib,
                "purelib" | "platlib" => lib.join("site-packages"),
                "include" => PathBuf::from("include").join(format!("python{release}")),
                "scripts" => PathBuf::from("bin"),
                "data" => PathBuf::new(),
                _ => return None,
            }
        };
        Some(path)
    }

    /// `CPython3.12.4-64`, used in reports.
    pub fn describe(&self) -> String {
        format!(
            "{}{}-{}",
            self.implementation,
            self.version_str(),
            self.architecture
        )
    }

    /// Variables referenced by the stdlib template, with values under our
    /// prefix pointed at the system prefix instead.
    pub fn system_config_vars(&self) -> BTreeMap<String, String> {
        let prefix = self.prefix.display().to_string();
        let system = self.system_prefix().display().to_string();
        self.sysconfig_vars
            .iter()
            .filter_map(|(key, value)| {
                let value = value.as_ref()?;
                let value = if value.starts_with(&prefix) {
                    system.clone()
                } else {
                    value.clone()
                };
                Some((key.clone(), value))
            })
            .collect()
    }

    pub fn system_include(&self) -> PathBuf {
        self.sysconfig_path("include", &self.system_config_vars())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.system_prefix().join("include"))
    }
}

impl fmt::Display for PyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PyInfo(spec={}{}-{}",
            self.implementation, self.version_info, self.architecture
        )?;
        if let Some(system) = &self.system_executable {
            if system != &self.executable {
                write!(f, ", system={}", system.display())?;
            }
        }
        if self.original_executable != self.executable
            && Some(&self.original_executable) != self.system_executable.as_ref()
        {
            write!(f, ", original={}", self.original_executable.display())?;
        }
        write!(f, ", exe={}, platform={})", self.executable.display(), self.platform)
    }
}
