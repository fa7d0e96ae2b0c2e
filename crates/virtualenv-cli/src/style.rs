use std::env;

use color_eyre::owo_colors::OwoColorize;
use virtualenv_core::CommandStatus;

pub struct Style {
    enabled: bool,
}

impl Style {
    pub fn new(is_tty: bool) -> Self {
        let env_no_color = env::var_os("NO_COLOR").is_some();
        Self {
            enabled: !env_no_color && is_tty,
        }
    }

    pub fn status(&self, status: CommandStatus, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        match status {
            CommandStatus::Ok => text.green().to_string(),
            CommandStatus::UserError => text.yellow().bold().to_string(),
            CommandStatus::Failure => text.red().bold().to_string(),
        }
    }

    pub fn detail(&self, text: &str) -> String {
        if !self.enabled {
            return format!("  {text}");
        }
        format!("  {}", text.dimmed())
    }

    pub fn child_output(&self, label: &str, text: &str) -> String {
        if !self.enabled {
            return format!("{label}:\n{text}");
        }
        format!("{}\n{text}", format!("{label}:").cyan().bold())
    }
}
