#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// A host interpreter to create environments from, or `None` when the
/// machine has no usable Python.
pub fn find_python() -> Option<PathBuf> {
    let candidates = [
        std::env::var("PYTHON").ok(),
        Some("python3".to_string()),
        Some("python".to_string()),
    ];
    for candidate in candidates.into_iter().flatten() {
        let Ok(path) = which::which(&candidate) else {
            continue;
        };
        let status = Command::new(&path)
            .args(["-c", "import sys; sys.exit(0 if sys.version_info >= (3, 8) else 1)"])
            .status();
        if matches!(status, Ok(code) if code.success()) {
            return Some(path);
        }
    }
    None
}

/// A `virtualenv` command isolated from the user's config and cache.
pub fn virtualenv(temp: &TempDir) -> assert_cmd::Command {
    virtualenv_at(temp.path())
}

pub fn virtualenv_at(root: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("virtualenv");
    cmd.env("VIRTUALENV_CONFIG_FILE", root.join("virtualenv.ini"))
        .env("VIRTUALENV_OVERRIDE_APP_DATA", root.join("app-data"))
        .env("VIRTUALENV_NO_PERIODIC_UPDATE", "1")
        .env_remove("VIRTUALENV_PYTHON")
        .env_remove("VIRTUALENV_LOG")
        .current_dir(root);
    cmd
}

pub fn env_python(dest: &Path) -> PathBuf {
    env_script(dest, "python")
}

pub fn env_script(dest: &Path, name: &str) -> PathBuf {
    if cfg!(windows) {
        dest.join("Scripts").join(format!("{name}.exe"))
    } else {
        dest.join("bin").join(name)
    }
}

/// Run `code` with the environment's interpreter and return its stdout.
pub fn run_in_env(dest: &Path, code: &str) -> Option<String> {
    let output = Command::new(env_python(dest)).args(["-c", code]).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
