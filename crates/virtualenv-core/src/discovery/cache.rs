//! Interpreter descriptions are expensive to obtain, so they are memoized
//! in-process and persisted in the app data store, keyed by executable
//! path and invalidated by its mtime and by the probe script hash.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::info::PyInfo;
use super::probe::{run_probe, PROBE_HASH};
use crate::app_data::AppData;
use crate::fs::fs_is_case_sensitive;

type Memo = IndexMap<PathBuf, Result<PyInfo, String>>;

static MEMO: Lazy<Mutex<Memo>> = Lazy::new(Mutex::default);
static EXE_DISCOVERY: Lazy<Mutex<HashMap<(PathBuf, bool), PyInfo>>> = Lazy::new(Mutex::default);

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    st_mtime: f64,
    path: String,
    hash: String,
    content: PyInfo,
}

/// Describe `exe`; with `resolve_to_host` a virtual environment's
/// interpreter is mapped to the system interpreter beneath it, keeping
/// `executable` pointed at `exe`.
pub fn from_exe(app_data: &AppData, exe: &Path, resolve_to_host: bool) -> Result<PyInfo> {
    let info = cached(app_data, exe)?;
    if resolve_to_host {
        resolve_to_system(app_data, info)
    } else {
        Ok(info)
    }
}

/// Forget in-process results; the persisted cache is left alone.
pub fn clear_memo() {
    if let Ok(mut memo) = MEMO.lock() {
        memo.clear();
    }
    if let Ok(mut found) = EXE_DISCOVERY.lock() {
        found.clear();
    }
}

fn cached(app_data: &AppData, exe: &Path) -> Result<PyInfo> {
    let memo_hit = MEMO
        .lock()
        .map_err(|_| anyhow!("interpreter memo poisoned"))?
        .get(exe)
        .cloned();
    let result = match memo_hit {
        Some(result) => result,
        None => {
            let result = via_file_cache(app_data, exe).map_err(|err| format!("{err:#}"));
            MEMO.lock()
                .map_err(|_| anyhow!("interpreter memo poisoned"))?
                .insert(exe.to_path_buf(), result.clone());
            result
        }
    };
    let mut info = result.map_err(|msg| anyhow!(msg))?;
    info.executable = exe.to_path_buf();
    Ok(info)
}

fn via_file_cache(app_data: &AppData, exe: &Path) -> Result<PyInfo> {
    let path_text = exe.display().to_string();
    let mtime = modified_seconds(exe)?;
    let store = app_data.py_info(exe);
    let _guard = store.locked(false)?;
    if let Some(value) = store.read() {
        match serde_json::from_value::<CacheRecord>(value) {
            Ok(record)
                if record.path == path_text
                    && same_mtime(record.st_mtime, mtime)
                    && record.hash == *PROBE_HASH =>
            {
                tracing::debug!(exe = %exe.display(), "got interpreter info from cache");
                return Ok(record.content);
            }
            _ => {
                tracing::debug!(exe = %exe.display(), "remove stale interpreter info");
                store.remove()?;
            }
        }
    }
    let info = run_probe(exe)?;
    let record = CacheRecord {
        st_mtime: mtime,
        path: path_text,
        hash: PROBE_HASH.clone(),
        content: info.clone(),
    };
    store.write(&serde_json::to_value(&record)?)?;
    Ok(info)
}

// JSON float parsing may be off by one ulp from the value written.
fn same_mtime(stored: f64, current: f64) -> bool {
    (stored - current).abs() < 1e-6
}

fn modified_seconds(path: &Path) -> Result<f64> {
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default())
}

/// Follow a virtual environment back to the interpreter it was made from.
pub fn resolve_to_system(app_data: &AppData, start: PyInfo) -> Result<PyInfo> {
    let start_executable = start.executable.clone();
    let mut prefixes: IndexMap<PathBuf, PyInfo> = IndexMap::new();
    let mut target = start;
    while target.system_executable.is_none() {
        let prefix = target.system_prefix().to_path_buf();
        if prefixes.contains_key(&prefix) {
            for (at, (p, info)) in prefixes.iter().enumerate() {
                tracing::error!("{}: prefix={}, info={}", at + 1, p.display(), info);
            }
            tracing::error!("{}: prefix={}, info={}", prefixes.len() + 1, prefix.display(), target);
            let chain = prefixes
                .keys()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join("|");
            bail!("prefixes are causing a circle {chain}");
        }
        let next = discover_exe(app_data, &target, &prefix, false)?;
        prefixes.insert(prefix, target);
        target = next;
    }
    if let Some(system) = target.system_executable.clone() {
        if target.executable != system {
            target = from_exe(app_data, &system, false)?;
        }
    }
    target.executable = start_executable;
    Ok(target)
}

/// Look for an interpreter like `info` under `prefix`. Without `exact`
/// the closest match wins when none agrees on every trait.
pub fn discover_exe(app_data: &AppData, info: &PyInfo, prefix: &Path, exact: bool) -> Result<PyInfo> {
    let key = (prefix.to_path_buf(), exact);
    if let Some(found) = EXE_DISCOVERY
        .lock()
        .map_err(|_| anyhow!("discovery memo poisoned"))?
        .get(&key)
    {
        tracing::debug!(prefix = %prefix.display(), exe = %found.executable.display(), "discover exe cache hit");
        return Ok(found.clone());
    }
    tracing::debug!(prefix = %prefix.display(), "discover system interpreter for {info}");
    let names = possible_exe_names(info);
    let folders = possible_folders(info, prefix);
    let mut discovered = Vec::new();
    for folder in &folders {
        for name in &names {
            let exe = folder.join(name);
            if !exe.exists() {
                continue;
            }
            let candidate = match from_exe(app_data, &exe, false) {
                Ok(candidate) => candidate,
                Err(err) => {
                    tracing::debug!(exe = %exe.display(), error = %err, "cannot query candidate");
                    continue;
                }
            };
            if let Some(field) = first_difference(&candidate, info) {
                tracing::debug!(exe = %exe.display(), field, "refused interpreter");
                if !exact {
                    discovered.push(candidate);
                }
                continue;
            }
            remember(key, &candidate)?;
            return Ok(candidate);
        }
    }
    if !exact {
        if let Some(best) = select_most_likely(discovered, info) {
            tracing::debug!(exe = %best.executable.display(), "no exact match found, chose most similar");
            remember(key, &best)?;
            return Ok(best);
        }
    }
    let folders = folders
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>();
    bail!(
        "failed to detect {} in {}",
        names.join("|"),
        folders.join(if cfg!(windows) { ";" } else { ":" })
    )
}

fn remember(key: (PathBuf, bool), info: &PyInfo) -> Result<()> {
    EXE_DISCOVERY
        .lock()
        .map_err(|_| anyhow!("discovery memo poisoned"))?
        .insert(key, info.clone());
    Ok(())
}

fn first_difference(candidate: &PyInfo, target: &PyInfo) -> Option<&'static str> {
    if candidate.implementation != target.implementation {
        Some("implementation")
    } else if candidate.architecture != target.architecture {
        Some("architecture")
    } else if candidate.version_info != target.version_info {
        Some("version_info")
    } else {
        None
    }
}

/// Rank by matching traits; earlier traits weigh more than all later ones
/// combined.
fn likeness(candidate: &PyInfo, target: &PyInfo) -> u32 {
    let ours = &candidate.version_info;
    let theirs = &target.version_info;
    let matches = [
        candidate.implementation == target.implementation,
        ours.major == theirs.major,
        ours.minor == theirs.minor,
        candidate.architecture == target.architecture,
        ours.micro == theirs.micro,
        ours.releaselevel == theirs.releaselevel,
        ours.serial == theirs.serial,
    ];
    matches
        .iter()
        .rev()
        .enumerate()
        .map(|(pos, hit)| if *hit { 1 << pos } else { 0 })
        .sum()
}

fn select_most_likely(discovered: Vec<PyInfo>, target: &PyInfo) -> Option<PyInfo> {
    let mut best: Option<(u32, PyInfo)> = None;
    for candidate in discovered {
        let score = likeness(&candidate, target);
        if best.as_ref().map_or(true, |(top, _)| score > *top) {
            best = Some((score, candidate));
        }
    }
    best.map(|(_, info)| info)
}

fn possible_folders(info: &PyInfo, inside: &Path) -> Vec<PathBuf> {
    let mut folders: IndexMap<PathBuf, ()> = IndexMap::new();
    let mut executables: IndexMap<PathBuf, ()> = IndexMap::new();
    for exe in [&info.executable, &info.original_executable] {
        if let Ok(real) = fs::canonicalize(exe) {
            executables.insert(real, ());
        }
        executables.insert(exe.clone(), ());
    }
    for exe in executables.keys() {
        if let Some(base) = exe.parent() {
            if let Ok(relative) = base.strip_prefix(&info.prefix) {
                folders.insert(inside.join(relative), ());
            }
        }
    }
    folders.insert(inside.to_path_buf(), ());
    folders.into_keys().collect()
}

fn possible_exe_names(info: &PyInfo) -> Vec<String> {
    let mut names: IndexMap<String, ()> = IndexMap::new();
    let extensions: &[&str] = if info.is_windows() { &[".exe", ""] } else { &[""] };
    let version = &info.version_info;
    let versions = [
        version.version_str(),
        version.release_str(),
        version.major.to_string(),
        String::new(),
    ];
    for base in possible_bases(info) {
        for ver in &versions {
            for arch in [format!("-{}", info.architecture), String::new()] {
                for ext in extensions {
                    names.insert(format!("{base}{ver}{arch}{ext}"), ());
                }
            }
        }
    }
    names.into_keys().collect()
}

fn possible_bases(info: &PyInfo) -> Vec<String> {
    let mut bases: IndexMap<String, ()> = IndexMap::new();
    let stem = info
        .executable
        .file_stem()
        .map(|s| s.to_string_lossy().trim_end_matches(|c: char| c.is_ascii_digit() || c == '.').to_string())
        .unwrap_or_default();
    if !stem.is_empty() {
        bases.insert(stem, ());
    }
    bases.insert(info.implementation.clone(), ());
    // `python` is shared by several implementations, try it last
    bases.shift_remove("python");
    bases.insert("python".to_string(), ());
    let mut out: IndexMap<String, ()> = IndexMap::new();
    for base in bases.keys() {
        let lower = base.to_lowercase();
        out.insert(lower.clone(), ());
        if fs_is_case_sensitive() {
            if *base != lower {
                out.insert(base.clone(), ());
            }
            let upper = base.to_uppercase();
            if upper != *base {
                out.insert(upper, ());
            }
        }
    }
    out.into_keys().collect()
}
