use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::bundle::get_embed_wheel;
use super::wheel::Wheel;
use crate::config::EnvSnapshot;
use crate::error::VirtualenvError;
use crate::fs::ensure_dir;
use crate::process::run_command;

/// Turn a version request into a pip requirement string.
pub fn requirement(distribution: &str, version_spec: Option<&str>) -> String {
    match version_spec.map(str::trim).filter(|spec| !spec.is_empty()) {
        None => distribution.to_string(),
        Some(spec) if spec.starts_with(|c: char| c.is_ascii_digit()) => format!("{distribution}=={spec}"),
        Some(spec) => format!("{distribution}{spec}"),
    }
}

/// Variables for running pip non-interactively, with the embedded pip
/// wheel importable when one is installed.
pub fn pip_wheel_env(for_py_version: &str, env: &EnvSnapshot) -> Vec<(String, String)> {
    let mut vars = vec![
        ("PIP_USE_WHEEL".to_string(), "1".to_string()),
        ("PIP_USER".to_string(), "0".to_string()),
        ("PIP_NO_INPUT".to_string(), "1".to_string()),
    ];
    if let Some(pip) = get_embed_wheel("pip", for_py_version, env) {
        vars.push(("PYTHONPATH".to_string(), pip.path().display().to_string()));
    }
    vars
}

/// Fetch a wheel for `distribution` usable on `for_py_version` into
/// `to_folder`, running pip under `interpreter`.
///
/// The download lands in a private temporary folder first and is renamed
/// into place, so `to_folder` never holds a partial file.
pub fn download_wheel(
    distribution: &str,
    version_spec: Option<&str>,
    for_py_version: &str,
    search_dirs: &[PathBuf],
    to_folder: &Path,
    interpreter: &Path,
    env: &EnvSnapshot,
) -> Result<Wheel> {
    ensure_dir(to_folder)?;
    let staging = tempfile::Builder::new()
        .prefix(".download-")
        .tempdir_in(to_folder)
        .with_context(|| format!("failed to create staging folder in {}", to_folder.display()))?;
    let requirement = requirement(distribution, version_spec);
    tracing::debug!(requirement, for_py_version, "download wheel");
    let mut args: Vec<String> = [
        "-m",
        "pip",
        "download",
        "--progress-bar",
        "off",
        "--disable-pip-version-check",
        "--only-binary=:all:",
        "--no-deps",
        "--python-version",
        for_py_version,
        "-d",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();
    args.push(staging.path().display().to_string());
    for dir in search_dirs.iter().filter(|dir| dir.is_dir()) {
        args.push("--find-links".to_string());
        args.push(dir.display().to_string());
    }
    args.push(requirement.clone());

    let output = run_command(interpreter, &args, &pip_wheel_env(for_py_version, env))?;
    if output.code != 0 {
        return Err(VirtualenvError::WheelDownloadFail {
            packages: vec![requirement],
            python: for_py_version.to_string(),
            code: output.code,
            stdout: output.stdout.trim().to_string(),
            stderr: output.stderr.trim().to_string(),
        }
        .into());
    }
    let downloaded = fs::read_dir(staging.path())
        .with_context(|| format!("failed to list {}", staging.path().display()))?
        .flatten()
        .filter_map(|entry| Wheel::from_path(&entry.path()))
        .find(|wheel| wheel.distribution() == distribution)
        .ok_or_else(|| anyhow!("pip reported success but no {distribution} wheel was saved"))?;
    let dest = to_folder.join(downloaded.filename());
    if dest.exists() {
        tracing::debug!(path = %dest.display(), "wheel already present");
    } else {
        fs::rename(downloaded.path(), &dest).with_context(|| {
            format!("failed to move {} to {}", downloaded.path().display(), dest.display())
        })?;
        tracing::info!(path = %dest.display(), "downloaded wheel");
    }
    Wheel::new(dest)
}
