//! Option sources other than the command line: `VIRTUALENV_*` environment
//! variables and the `[virtualenv]` section of the INI file.

mod convert;
mod ini;

use std::collections::HashMap;
use std::env;
use std::fmt;

pub use convert::{parse_bool, split_list};
pub use ini::{IniConfig, IniState, CONFIG_FILE_ENV};

pub const ENV_PREFIX: &str = "VIRTUALENV_";

#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn flag_is_enabled(&self, key: &str) -> bool {
        self.var(key).and_then(parse_bool).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Where a layered option value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Env(String),
    File,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Env(key) => write!(f, "env var {key}"),
            ValueSource::File => f.write_str("file"),
        }
    }
}

/// Env vars and INI file consulted, in that order, for option defaults.
#[derive(Debug, Clone)]
pub struct ConfigSources {
    env: EnvSnapshot,
    ini: IniConfig,
}

impl ConfigSources {
    pub fn load(env: EnvSnapshot) -> Self {
        let ini = IniConfig::load(&env);
        Self { env, ini }
    }

    pub fn new(env: EnvSnapshot, ini: IniConfig) -> Self {
        Self { env, ini }
    }

    pub fn env(&self) -> &EnvSnapshot {
        &self.env
    }

    pub fn ini(&self) -> &IniConfig {
        &self.ini
    }

    /// Raw value for the long option `name` (e.g. `extra-search-dir`).
    pub fn raw(&self, name: &str) -> Option<(String, ValueSource)> {
        let key = env_key(name);
        if let Some(value) = self.env.var(&key) {
            return Some((value.to_string(), ValueSource::Env(key)));
        }
        self.ini
            .get(name)
            .map(|value| (value.to_string(), ValueSource::File))
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        let (raw, source) = self.raw(name)?;
        let parsed = parse_bool(&raw);
        if parsed.is_none() {
            tracing::warn!(%source, value = %raw, option = name, "failed to convert as boolean");
        }
        parsed
    }

    pub fn list(&self, name: &str) -> Option<Vec<String>> {
        self.raw(name).map(|(raw, _)| split_list(&raw))
    }

    pub fn value(&self, name: &str) -> Option<String> {
        self.raw(name)
            .map(|(raw, _)| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    }
}

/// `extra-search-dir` becomes `VIRTUALENV_EXTRA_SEARCH_DIR`.
pub fn env_key(name: &str) -> String {
    format!("{ENV_PREFIX}{}", name.replace('-', "_").to_ascii_uppercase())
}
