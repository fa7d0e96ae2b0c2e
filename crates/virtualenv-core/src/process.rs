use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};

use crate::error::VirtualenvError;

/// Variables that are dropped from the child environment when passed with
/// an empty value.
const REMOVABLE_VARS: [&str; 3] = ["PYTHONPATH", "__PYVENV_LAUNCHER__", "PYTHONHOME"];

fn is_removable_env(key: &str) -> bool {
    REMOVABLE_VARS.contains(&key)
}

/// Child output beyond this is dropped and marked as truncated.
const CAPTURE_LIMIT: usize = 8 * 1024 * 1024;
const TRUNCATED: &str = "\n[...truncated...]\n";

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    /// Turn a non-zero exit into [`VirtualenvError::ProcessCallFailed`].
    pub fn ensure_success(self, program: &Path, args: &[String]) -> Result<Self> {
        if self.code == 0 {
            return Ok(self);
        }
        let mut cmd = vec![program.display().to_string()];
        cmd.extend(args.iter().cloned());
        Err(VirtualenvError::ProcessCallFailed {
            code: self.code,
            cmd,
            stdout: self.stdout,
            stderr: self.stderr,
        }
        .into())
    }
}

pub fn run_command(program: &Path, args: &[String], envs: &[(String, String)]) -> Result<RunOutput> {
    run_command_with_input(program, args, envs, None)
}

/// Run `program` to completion with `input` on stdin. A non-zero exit is
/// not an error here; see [`RunOutput::ensure_success`].
pub fn run_command_with_input(
    program: &Path,
    args: &[String],
    envs: &[(String, String)],
    input: Option<&[u8]>,
) -> Result<RunOutput> {
    let mut command = configured_command(program, args, envs);
    command
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    tracing::debug!(program = %program.display(), args = ?args, "run");

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start {}", program.display()))?;
    let missing = |stream: &str| anyhow!("{stream} of {} is not piped", program.display());
    if let Some(input) = input {
        let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let payload = input.to_vec();
        // a full stdout pipe would otherwise block the write
        thread::spawn(move || {
            let _ = stdin.write_all(&payload);
        });
    }
    let stdout = drain(child.stdout.take().ok_or_else(|| missing("stdout"))?);
    let stderr = drain(child.stderr.take().ok_or_else(|| missing("stderr"))?);

    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {}", program.display()))?;
    Ok(RunOutput {
        code: status.code().unwrap_or(-1),
        stdout: collect(stdout, "stdout")?,
        stderr: collect(stderr, "stderr")?,
    })
}

fn configured_command(program: &Path, args: &[String], envs: &[(String, String)]) -> Command {
    let mut command = Command::new(program);
    command.args(args);
    for (key, value) in envs {
        if value.is_empty() && is_removable_env(key) {
            command.env_remove(key);
        } else {
            command.env(key, value);
        }
    }
    command
}

fn drain<R: Read + Send + 'static>(reader: R) -> JoinHandle<io::Result<String>> {
    thread::spawn(move || read_capped(reader, CAPTURE_LIMIT))
}

fn collect(handle: JoinHandle<io::Result<String>>, stream: &str) -> Result<String> {
    handle
        .join()
        .map_err(|_| anyhow!("reader of child {stream} panicked"))?
        .with_context(|| format!("failed to read child {stream}"))
}

/// Read everything, keeping the first `limit` bytes.
fn read_capped<R: Read>(mut reader: R, limit: usize) -> io::Result<String> {
    let mut kept = Vec::new();
    (&mut reader).take(u64::try_from(limit).unwrap_or(u64::MAX)).read_to_end(&mut kept)?;
    let dropped = io::copy(&mut reader, &mut io::sink())?;
    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if dropped > 0 {
        text.push_str(TRUNCATED);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_output_is_cut_and_marked() -> Result<()> {
        let data = vec![b'a'; 32];
        let text = read_capped(&data[..], 10)?;
        assert_eq!(text, format!("{}{TRUNCATED}", "a".repeat(10)));
        assert_eq!(read_capped(&data[..], 64)?, "a".repeat(32));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_feeds_stdin() -> Result<()> {
        let output = run_command_with_input(
            Path::new("/bin/sh"),
            &["-c".to_string(), "cat; echo err >&2; exit 3".to_string()],
            &[],
            Some(&b"hello"[..]),
        )?;
        assert_eq!(output.code, 3);
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr.trim(), "err");
        let err = output
            .ensure_success(Path::new("/bin/sh"), &["-c".to_string()])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VirtualenvError>(),
            Some(VirtualenvError::ProcessCallFailed { code: 3, .. })
        ));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn empty_scrubbed_vars_are_removed() -> Result<()> {
        let output = run_command(
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo \"[${PYTHONPATH-unset}]\"".to_string()],
            &[("PYTHONPATH".to_string(), String::new())],
        )?;
        assert_eq!(output.stdout.trim(), "[unset]");
        Ok(())
    }
}
