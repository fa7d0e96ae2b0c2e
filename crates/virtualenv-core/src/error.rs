use std::path::PathBuf;

use thiserror::Error;

/// Failures callers branch on. They travel inside `anyhow::Error`; recover
/// them with `downcast_ref::<VirtualenvError>()`.
#[derive(Debug, Error)]
pub enum VirtualenvError {
    #[error("{0}")]
    UserInput(String),
    #[error("failed to find interpreter for {}", specs.join(", "))]
    NoInterpreterFound {
        specs: Vec<String>,
        tried: Vec<PathBuf>,
    },
    #[error("failed with code {code}: {}", cmd.join(" "))]
    ProcessCallFailed {
        code: i32,
        cmd: Vec<String>,
        stdout: String,
        stderr: String,
    },
    #[error("app data error: {0}")]
    AppData(String),
    #[error("lock {} is held by another process", path.display())]
    LockTimeout { path: PathBuf },
    #[error("failed to download {} for python {python} (pip exit code {code})", packages.join(" "))]
    WheelDownloadFail {
        packages: Vec<String>,
        python: String,
        code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("{creator} creator does not support {interpreter}")]
    UnsupportedCreator { creator: String, interpreter: String },
    #[error("seed failed due to failing to acquire wheels {}", .0.join(", "))]
    SeedFailed(Vec<String>),
}

impl VirtualenvError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::UserInput(message.into())
    }

    /// Errors caused by the request rather than by the system.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::UserInput(_) | Self::NoInterpreterFound { .. } | Self::UnsupportedCreator { .. }
        )
    }
}
