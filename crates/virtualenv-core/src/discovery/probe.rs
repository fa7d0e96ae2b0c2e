use std::path::Path;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use super::info::PyInfo;
use crate::process::run_command_with_input;

/// Runs under the candidate interpreter; fed on stdin.
pub const PROBE_SCRIPT: &str = include_str!("../../resources/py_info.py");

const START_MARKER: &str = "#!virtualenv-probe-start";
const END_MARKER: &str = "#!virtualenv-probe-end";

/// Cached descriptions are only valid for the script that produced them.
pub static PROBE_HASH: Lazy<String> =
    Lazy::new(|| hex::encode(Sha256::digest(PROBE_SCRIPT.as_bytes())));

/// Variables that would make the candidate report someone else's layout.
pub(crate) fn probe_env() -> Vec<(String, String)> {
    vec![
        ("PYTHONPATH".to_string(), String::new()),
        ("__PYVENV_LAUNCHER__".to_string(), String::new()),
    ]
}

/// Run the probe under `exe` and parse what it prints.
pub fn run_probe(exe: &Path) -> Result<PyInfo> {
    let args = vec!["-s".to_string(), "-".to_string()];
    tracing::debug!(exe = %exe.display(), "get interpreter info via probe");
    let output = run_command_with_input(exe, &args, &probe_env(), Some(PROBE_SCRIPT.as_bytes()))?
        .ensure_success(exe, &args)?;
    let payload = extract_payload(&output.stdout).ok_or_else(|| {
        anyhow!(
            "failed to query {}: probe printed no description (stdout: {:?}, stderr: {:?})",
            exe.display(),
            output.stdout,
            output.stderr
        )
    })?;
    let mut info = PyInfo::from_json(payload.as_bytes())?;
    info.executable = exe.to_path_buf();
    Ok(info)
}

fn extract_payload(stdout: &str) -> Option<&str> {
    let start = stdout.find(START_MARKER)? + START_MARKER.len();
    let end = stdout[start..].find(END_MARKER)? + start;
    Some(stdout[start..end].trim())
}
