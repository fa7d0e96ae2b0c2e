//! Seed wheels shipped next to the binary.

use std::env;
use std::path::PathBuf;

use super::wheel::Wheel;
use crate::config::EnvSnapshot;

pub const BUNDLE_DIR_ENV: &str = "VIRTUALENV_BUNDLE_DIR";

/// Newest Python version the table knows; unknown versions use its row.
pub const MAX: &str = "3.14";

type Row = &'static [(&'static str, &'static str)];

const MODERN: Row = &[
    ("pip", "pip-25.1.1-py3-none-any.whl"),
    ("setuptools", "setuptools-80.9.0-py3-none-any.whl"),
];

pub const BUNDLE_SUPPORT: &[(&str, Row)] = &[
    ("3.14", MODERN),
    ("3.13", MODERN),
    ("3.12", MODERN),
    ("3.11", MODERN),
    ("3.10", MODERN),
    ("3.9", MODERN),
    (
        "3.8",
        &[
            ("pip", "pip-25.0.1-py3-none-any.whl"),
            ("setuptools", "setuptools-75.3.2-py3-none-any.whl"),
            ("wheel", "wheel-0.45.1-py3-none-any.whl"),
        ],
    ),
];

fn row(for_py_version: &str) -> Row {
    BUNDLE_SUPPORT
        .iter()
        .find(|(version, _)| *version == for_py_version)
        .or_else(|| BUNDLE_SUPPORT.iter().find(|(version, _)| *version == MAX))
        .map_or(&[], |(_, row)| *row)
}

/// Distributions the table provides for `for_py_version`.
pub fn bundled_distributions(for_py_version: &str) -> Vec<&'static str> {
    row(for_py_version).iter().map(|(dist, _)| *dist).collect()
}

pub fn bundled_filename(distribution: &str, for_py_version: &str) -> Option<&'static str> {
    row(for_py_version)
        .iter()
        .find(|(dist, _)| *dist == distribution)
        .map(|(_, filename)| *filename)
}

/// `VIRTUALENV_BUNDLE_DIR`, else `share/virtualenv/wheels` beside the
/// installation prefix of the running binary.
pub fn bundle_dir(env: &EnvSnapshot) -> Option<PathBuf> {
    if let Some(dir) = env.var(BUNDLE_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    let exe = env::current_exe().ok()?;
    let prefix = exe.parent()?.parent()?;
    Some(prefix.join("share").join("virtualenv").join("wheels"))
}

/// The embedded wheel for `distribution`, when the table lists one and the
/// file is actually present.
pub fn get_embed_wheel(distribution: &str, for_py_version: &str, env: &EnvSnapshot) -> Option<Wheel> {
    let filename = bundled_filename(distribution, for_py_version)?;
    let path = bundle_dir(env)?.join(filename);
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "embedded wheel is not installed");
        return None;
    }
    Wheel::from_path(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn unknown_versions_fall_back_to_max() {
        assert_eq!(
            bundled_filename("pip", "3.99"),
            bundled_filename("pip", MAX)
        );
        assert_eq!(bundled_filename("wheel", "3.8"), Some("wheel-0.45.1-py3-none-any.whl"));
        assert_eq!(bundled_filename("wheel", "3.12"), None);
        assert_eq!(bundled_distributions("3.12"), vec!["pip", "setuptools"]);
    }

    #[test]
    fn embed_wheel_requires_the_file() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let env = EnvSnapshot::from_pairs(&[(BUNDLE_DIR_ENV, temp.path().to_string_lossy().as_ref())]);
        assert!(get_embed_wheel("pip", "3.12", &env).is_none());
        let filename = bundled_filename("pip", "3.12").unwrap_or_default();
        fs::write(temp.path().join(filename), b"")?;
        let wheel = get_embed_wheel("pip", "3.12", &env).expect("embedded pip");
        assert_eq!(wheel.version(), "25.1.1");
        Ok(())
    }
}
