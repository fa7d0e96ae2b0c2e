use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::VirtualenvError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }

    /// Classify an error chain. Child process output is kept in `details`
    /// so the front-end can replay it.
    pub fn from_error(err: &anyhow::Error, with_traceback: bool) -> Self {
        let typed = err.downcast_ref::<VirtualenvError>();
        let message = match (with_traceback, typed) {
            (true, _) => format!("{err:?}"),
            (false, Some(typed)) => typed.to_string(),
            (false, None) => format!("{err:#}"),
        };
        match typed {
            Some(VirtualenvError::ProcessCallFailed {
                code,
                cmd,
                stdout,
                stderr,
            }) => Self::failure(
                message,
                json!({ "code": code, "cmd": cmd, "stdout": stdout, "stderr": stderr }),
            ),
            Some(VirtualenvError::NoInterpreterFound { tried, .. }) => Self::user_error(
                message,
                json!({ "tried": tried.iter().map(|p| p.display().to_string()).collect::<Vec<_>>() }),
            ),
            Some(typed) if typed.is_user_error() => Self::user_error(message, Value::Null),
            _ => Self::failure(message, Value::Null),
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

impl CommandStatus {
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            CommandStatus::Ok => 0,
            CommandStatus::UserError => 1,
            CommandStatus::Failure => 2,
        }
    }
}
