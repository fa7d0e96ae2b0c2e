use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};

use super::EnvSnapshot;

pub const CONFIG_FILE_ENV: &str = "VIRTUALENV_CONFIG_FILE";
const SECTION: &str = "virtualenv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IniState {
    Active,
    Missing,
    Failed(String),
}

/// The `[virtualenv]` section of the user INI file. Keys are stored
/// lower-case with underscores, so `extra-search-dir` and
/// `extra_search_dir` name the same option.
#[derive(Debug, Clone)]
pub struct IniConfig {
    path: PathBuf,
    from_env: bool,
    state: IniState,
    values: HashMap<String, String>,
}

impl IniConfig {
    pub fn load(env: &EnvSnapshot) -> Self {
        let (path, from_env) = match env.var(CONFIG_FILE_ENV) {
            Some(path) => (PathBuf::from(path), true),
            None => (default_config_file(), false),
        };
        Self::load_from(path, from_env)
    }

    pub fn load_from(path: PathBuf, from_env: bool) -> Self {
        if !path.is_file() {
            return Self {
                path,
                from_env,
                state: IniState::Missing,
                values: HashMap::new(),
            };
        }
        match read_section(&path) {
            Ok(values) => {
                tracing::debug!(path = %path.display(), keys = values.len(), "loaded config file");
                Self {
                    path,
                    from_env,
                    state: IniState::Active,
                    values,
                }
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to read config file");
                Self {
                    path,
                    from_env,
                    state: IniState::Failed(err.to_string()),
                    values: HashMap::new(),
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &IniState {
        &self.state
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&normalize_key(name)).map(String::as_str)
    }

    /// Help footer describing where options may also come from.
    pub fn epilog(&self) -> String {
        let state = match &self.state {
            IniState::Active => "active",
            IniState::Missing => "missing",
            IniState::Failed(_) => "failed to parse",
        };
        format!(
            "config file {} {} (change{} via env var {})",
            self.path.display(),
            state,
            if self.from_env { "d" } else { "" },
            CONFIG_FILE_ENV
        )
    }
}

fn read_section(path: &Path) -> Result<HashMap<String, String>, config::ConfigError> {
    let config = Config::builder()
        .add_source(File::from(path).format(FileFormat::Ini).required(true))
        .build()?;
    let table = match config.get_table(SECTION) {
        Ok(table) => table,
        Err(config::ConfigError::NotFound(_)) => return Ok(HashMap::new()),
        Err(err) => return Err(err),
    };
    let mut values = HashMap::new();
    for (key, value) in table {
        let value = value.into_string()?;
        values.insert(normalize_key(&key), value);
    }
    Ok(values)
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('-', "_")
}

fn default_config_file() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("virtualenv")
        .join("virtualenv.ini")
}
