//! Turn `--python` requests into a concrete [`PyInfo`].

mod cache;
mod info;
mod path_search;
mod probe;
pub mod windows;

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use indexmap::IndexSet;
use virtualenv_domain::PythonSpec;

pub use cache::{clear_memo, discover_exe, from_exe, resolve_to_system};
pub use info::PyInfo;
pub use path_search::{find_candidates, path_dirs, which_in};
pub use probe::{PROBE_HASH, PROBE_SCRIPT};

#[cfg(test)]
pub(crate) use info::fixtures;

use crate::app_data::AppData;
use crate::config::EnvSnapshot;
use crate::error::VirtualenvError;

const DEFAULT_NAMES: [&str; 2] = ["python3", "python"];

/// The interpreter used when no `--python` is given.
pub fn default_interpreter(env: &EnvSnapshot) -> Option<PathBuf> {
    DEFAULT_NAMES.iter().find_map(|name| which_in(name, env))
}

/// Try each request in order and return the first interpreter that
/// satisfies one.
pub fn get_interpreter(app_data: &AppData, requests: &[String], env: &EnvSnapshot) -> Result<PyInfo> {
    let default = default_interpreter(env);
    let requests: Vec<String> = if requests.is_empty() {
        match &default {
            Some(path) => vec![path.display().to_string()],
            None => {
                return Err(VirtualenvError::NoInterpreterFound {
                    specs: DEFAULT_NAMES.iter().map(ToString::to_string).collect(),
                    tried: Vec::new(),
                }
                .into())
            }
        }
    } else {
        requests.to_vec()
    };
    let mut tried: IndexSet<PathBuf> = IndexSet::new();
    for raw in &requests {
        let spec = PythonSpec::from_string_spec(raw);
        tracing::info!("find interpreter for spec {spec}");
        let (spec, candidates) = propose_interpreters(spec, default.as_deref(), env);
        for candidate in candidates {
            tried.insert(candidate.clone());
            match from_exe(app_data, &candidate, true) {
                Ok(info) if info.satisfies(&spec) => {
                    tracing::debug!("accepted {info}");
                    return Ok(info);
                }
                Ok(info) => tracing::debug!("refused {info}"),
                Err(err) => {
                    tracing::info!(exe = %candidate.display(), "failed to query interpreter: {err:#}");
                }
            }
        }
    }
    Err(VirtualenvError::NoInterpreterFound {
        specs: requests,
        tried: tried.into_iter().collect(),
    }
    .into())
}

/// Candidate executables for `spec`, in the order they should be probed.
/// Path requests are normalized to absolute paths in the returned spec.
fn propose_interpreters(
    mut spec: PythonSpec,
    default: Option<&Path>,
    env: &EnvSnapshot,
) -> (PythonSpec, Vec<PathBuf>) {
    let mut candidates: IndexSet<PathBuf> = IndexSet::new();
    if let Some(raw) = spec.path.clone() {
        let resolved = resolve_path_request(&raw, env);
        if let Some(path) = resolved {
            spec.path = Some(path.display().to_string());
            candidates.insert(path);
        }
        return (spec, candidates.into_iter().collect());
    }
    if let Some(default) = default {
        candidates.insert(default.to_path_buf());
    }
    candidates.extend(windows::propose(&spec));
    candidates.extend(find_candidates(&spec, env));
    (spec, candidates.into_iter().collect())
}

fn resolve_path_request(raw: &str, env: &EnvSnapshot) -> Option<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }
    if path.components().count() > 1 {
        let joined = env::current_dir().ok()?.join(path);
        return joined.exists().then_some(joined);
    }
    which_in(raw, env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn absolute_requests_only_propose_that_path() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let exe = temp.path().join("custom-python");
        fs::write(&exe, "")?;
        let spec = PythonSpec::from_string_spec(&exe.display().to_string());
        let (spec, candidates) = propose_interpreters(spec, Some(Path::new("/usr/bin/python3")), &EnvSnapshot::default());
        assert_eq!(candidates, vec![exe.clone()]);
        assert_eq!(spec.path, Some(exe.display().to_string()));

        let missing = PythonSpec::from_string_spec(&temp.path().join("nope").display().to_string());
        let (_, candidates) = propose_interpreters(missing, None, &EnvSnapshot::default());
        assert!(candidates.is_empty());
        Ok(())
    }

    #[test]
    fn version_requests_start_with_default() {
        let spec = PythonSpec::from_string_spec("python3.12");
        let (_, candidates) = propose_interpreters(spec, Some(Path::new("/opt/py/bin/python3")), &EnvSnapshot::default());
        assert_eq!(candidates.first(), Some(&PathBuf::from("/opt/py/bin/python3")));
    }

    #[test]
    fn nothing_found_reports_tried_candidates() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let app_data = AppData::store(temp.path().join("app-data"));
        let env = EnvSnapshot::from_pairs(&[("PATH", "")]);
        let missing = temp.path().join("missing-python").display().to_string();
        let err = get_interpreter(&app_data, &[missing.clone()], &env).unwrap_err();
        match err.downcast_ref::<VirtualenvError>() {
            Some(VirtualenvError::NoInterpreterFound { specs, tried }) => {
                assert_eq!(specs, &vec![missing]);
                assert!(tried.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
        Ok(())
    }
}
