//! Extracted wheels shared between environments.
//!
//! An image is a folder with two parts: `site-packages/` holds the wheel
//! content plus `INSTALLER` and a rewritten `RECORD`, `scripts/` holds
//! console-script launchers. Images are built in a staging folder and
//! renamed into place, so an image that exists is complete.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::app_data::AppData;
use crate::fs::{ensure_dir, make_exe, make_readonly_files, remove_dir_all_writable};
use crate::wheels::Wheel;

pub const INSTALLER: &str = "virtualenv\n";
pub const SITE_DIR: &str = "site-packages";
pub const SCRIPTS_DIR: &str = "scripts";

static VERSIONED_SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)-?\d+(\.\d+)?$").expect("valid regex"));

/// What launchers look like for the environments sharing an image.
#[derive(Debug, Clone)]
pub struct ScriptTarget {
    pub major: u32,
    pub minor: u32,
    pub windows: bool,
    /// `bin_dir` relative to purelib, for `RECORD` entries.
    pub bin_from_purelib: PathBuf,
}

/// The image for `wheel`, built first when missing.
pub fn ensure_image(app_data: &AppData, for_py_version: &str, wheel: &Wheel, target: &ScriptTarget) -> Result<PathBuf> {
    let image = app_data.wheel_image(for_py_version, &wheel.stem());
    let _guard = image.locked()?;
    if is_complete(image.path()) {
        tracing::debug!(path = %image.path().display(), "install from image");
        return Ok(image.path().to_path_buf());
    }
    if image.exists() {
        tracing::debug!(path = %image.path().display(), "discard incomplete image");
        remove_dir_all_writable(image.path())?;
    }
    let parent = image
        .path()
        .parent()
        .ok_or_else(|| anyhow!("image {} has no parent", image.path().display()))?;
    ensure_dir(parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(parent)
        .with_context(|| format!("failed to create staging folder in {}", parent.display()))?;
    tracing::debug!(wheel = %wheel, image = %image.path().display(), "build install image");
    build(staging.path(), wheel, target)?;
    make_readonly_files(staging.path())?;
    fs::rename(staging.path(), image.path()).with_context(|| {
        format!("failed to move {} to {}", staging.path().display(), image.path().display())
    })?;
    Ok(image.path().to_path_buf())
}

fn is_complete(image: &Path) -> bool {
    dist_info_in(&image.join(SITE_DIR)).is_some_and(|dist_info| dist_info.join("INSTALLER").is_file())
}

fn dist_info_in(site: &Path) -> Option<PathBuf> {
    fs::read_dir(site)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| path.is_dir() && path.extension().is_some_and(|ext| ext == "dist-info"))
}

fn build(root: &Path, wheel: &Wheel, target: &ScriptTarget) -> Result<()> {
    let site = root.join(SITE_DIR);
    ensure_dir(&site)?;
    unpack_wheel(wheel.path(), &site)?;
    let dist_info = dist_info_in(&site).ok_or_else(|| anyhow!("{wheel} has no .dist-info folder"))?;
    fs::write(dist_info.join("INSTALLER"), INSTALLER)?;

    let scripts = root.join(SCRIPTS_DIR);
    ensure_dir(&scripts)?;
    let mut launchers = Vec::new();
    for (name, entry) in console_scripts(&dist_info)? {
        launchers.extend(write_launchers(&scripts, &name, &entry, target)?);
    }
    tracing::debug!(count = launchers.len(), "generated console scripts");
    write_record(&site, &dist_info, &launchers, target)
}

/// Extract `wheel` into `dest`, keeping unix modes.
pub fn unpack_wheel(wheel: &Path, dest: &Path) -> Result<()> {
    let file = File::open(wheel).with_context(|| format!("failed to open {}", wheel.display()))?;
    let mut archive = ZipArchive::new(file).with_context(|| format!("{} is not a zip archive", wheel.display()))?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(enclosed) = entry.enclosed_name().map(|path| dest.join(path)) else {
            continue;
        };
        if entry.is_dir() {
            ensure_dir(&enclosed)?;
            continue;
        }
        if let Some(parent) = enclosed.parent() {
            ensure_dir(parent)?;
        }
        let mut outfile = File::create(&enclosed)?;
        io::copy(&mut entry, &mut outfile)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&enclosed, fs::Permissions::from_mode(mode | 0o600))?;
            }
        }
    }
    Ok(())
}

/// `[console_scripts]` entries, with version-suffixed names such as
/// `pip3.12` folded into their base name.
fn console_scripts(dist_info: &Path) -> Result<Vec<(String, String)>> {
    let path = dist_info.join("entry_points.txt");
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut section = String::new();
    let mut scripts: Vec<(String, String)> = Vec::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            section = trimmed.trim_start_matches('[').trim_end_matches(']').trim().to_string();
            continue;
        }
        if section != "console_scripts" {
            continue;
        }
        let Some((name, target)) = trimmed.split_once('=') else {
            continue;
        };
        let name = name.trim();
        let name = VERSIONED_SCRIPT
            .captures(name)
            .and_then(|caps| caps.get(1))
            .map_or(name, |base| base.as_str());
        let target = target.split_whitespace().next().unwrap_or_default().to_string();
        if !scripts.iter().any(|(existing, _)| existing == name) {
            scripts.push((name.to_string(), target));
        }
    }
    Ok(scripts)
}

/// `pip`, `pip3` and `pip3.12` launchers for one entry point. They find
/// the interpreter next to themselves, so one image serves every
/// environment.
fn write_launchers(dir: &Path, name: &str, entry: &str, target: &ScriptTarget) -> Result<Vec<PathBuf>> {
    let (module, attr) = entry
        .split_once(':')
        .ok_or_else(|| anyhow!("entry point {name} = {entry} has no callable"))?;
    let (module, attr) = (module.trim(), attr.trim());
    let head = attr.split('.').next().unwrap_or(attr);
    let names = [
        name.to_string(),
        format!("{name}{}", target.major),
        format!("{name}{}.{}", target.major, target.minor),
    ];
    let mut written = Vec::new();
    for script in names {
        let (file, content) = if target.windows {
            (
                format!("{script}.cmd"),
                format!(
                    "@\"%~dp0python.exe\" -c \"import sys; from {module} import {head}; sys.argv[0] = '{script}'; sys.exit({attr}())\" %*\r\n"
                ),
            )
        } else {
            (
                script,
                format!(
                    "#!/bin/sh\n'''exec' \"$(dirname -- \"$0\")/python\" \"$0\" \"$@\"\n' '''\n# -*- coding: utf-8 -*-\nimport re\nimport sys\nfrom {module} import {head}\nif __name__ == \"__main__\":\n    sys.argv[0] = re.sub(r\"(-script\\.pyw|\\.exe)?$\", \"\", sys.argv[0])\n    sys.exit({attr}())\n"
                ),
            )
        };
        let path = dir.join(file);
        fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
        make_exe(&path)?;
        written.push(path);
    }
    Ok(written)
}

fn record_line(path: &str, data: &[u8]) -> String {
    let hash = URL_SAFE_NO_PAD.encode(Sha256::digest(data));
    format!("{path},sha256={hash},{}", data.len())
}

fn write_record(site: &Path, dist_info: &Path, launchers: &[PathBuf], target: &ScriptTarget) -> Result<()> {
    let record = dist_info.join("RECORD");
    let mut lines = Vec::new();
    for entry in WalkDir::new(site).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", site.display()))?;
        if !entry.file_type().is_file() || entry.path() == record {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(site)
            .map_err(|_| anyhow!("{} escaped {}", entry.path().display(), site.display()))?;
        lines.push(record_line(&slashed(relative), &fs::read(entry.path())?));
    }
    for launcher in launchers {
        let Some(name) = launcher.file_name() else {
            continue;
        };
        let relative = target.bin_from_purelib.join(name);
        lines.push(record_line(&slashed(&relative), &fs::read(launcher)?));
    }
    let record_relative = record
        .strip_prefix(site)
        .map_err(|_| anyhow!("{} escaped {}", record.display(), site.display()))?;
    lines.push(format!("{},,", slashed(record_relative)));
    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(&record, text).with_context(|| format!("failed to write {}", record.display()))
}

fn slashed(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
