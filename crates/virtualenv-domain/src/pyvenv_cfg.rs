use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;

pub const PYVENV_CFG: &str = "pyvenv.cfg";

/// The `pyvenv.cfg` at the root of an environment. Keys keep insertion
/// order and are written one `key = value` per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyEnvCfg {
    path: PathBuf,
    content: IndexMap<String, String>,
}

impl PyEnvCfg {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content: IndexMap::new(),
        }
    }

    pub fn for_env(dest: &Path) -> Self {
        Self::new(dest.join(PYVENV_CFG))
    }

    /// Load the file when present, otherwise start empty.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut cfg = Self::new(path.clone());
        if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            cfg.content = parse(&text);
        }
        Ok(cfg)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.content.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.content.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.content.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.content.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.content.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overlay `other` on top of `self`; existing keys keep their position.
    pub fn update(&mut self, other: &IndexMap<String, String>) {
        for (key, value) in other {
            self.content.insert(key.clone(), value.clone());
        }
    }

    pub fn content(&self) -> &IndexMap<String, String> {
        &self.content
    }

    pub fn render(&self) -> String {
        self.content
            .iter()
            .map(|(key, value)| format!("{key} = {value}\n"))
            .collect()
    }

    pub fn write(&self) -> Result<()> {
        tracing::debug!(path = %self.path.display(), "write pyvenv.cfg");
        fs::write(&self.path, self.render())
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

pub fn parse(text: &str) -> IndexMap<String, String> {
    let mut content = IndexMap::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        content.insert(key.to_string(), value.trim().to_string());
    }
    content
}
