use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use pep440_rs::{Version as Pep440Version, VersionSpecifiers};
use virtualenv_domain::{requires_python_allows, VersionPart, WheelName};
use zip::ZipArchive;

/// A wheel archive on disk. Two wheels are equal when they carry the same
/// distribution and version.
#[derive(Debug, Clone)]
pub struct Wheel {
    path: PathBuf,
    name: WheelName,
}

impl Wheel {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = WheelName::parse(&filename)?;
        Ok(Self { path, name })
    }

    /// `None` for anything that is not a wheel filename.
    pub fn from_path(path: &Path) -> Option<Self> {
        Self::new(path).ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> String {
        self.name.to_string()
    }

    pub fn stem(&self) -> String {
        self.name.stem()
    }

    pub fn distribution(&self) -> &str {
        &self.name.distribution
    }

    pub fn version(&self) -> &str {
        &self.name.version
    }

    pub fn version_tuple(&self) -> Vec<u64> {
        self.name.version_tuple()
    }

    pub fn version_key(&self) -> Vec<VersionPart> {
        self.name.version_key()
    }

    pub fn dist_info(&self) -> String {
        self.name.dist_info()
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Whether the wheel's `Requires-Python` admits `for_py_version`
    /// (`major.minor`). Wheels that do not declare one are compatible.
    pub fn support_py(&self, for_py_version: &str) -> Result<bool> {
        let Some(python) = parse_release(for_py_version) else {
            return Ok(true);
        };
        let metadata = self.read_metadata()?;
        let requires = metadata
            .lines()
            .find_map(|line| line.strip_prefix("Requires-Python:"))
            .map(str::trim);
        Ok(requires.map_or(true, |requires| requires_python_allows(requires, python)))
    }

    fn read_metadata(&self) -> Result<String> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let member = format!("{}/METADATA", self.dist_info());
        let mut entry = archive
            .by_name(&member)
            .with_context(|| format!("{} has no {member}", self.path.display()))?;
        let mut text = String::new();
        entry.read_to_string(&mut text)?;
        Ok(text)
    }

    /// Check the version against a PEP 440 requirement such as `>=24,<25`.
    /// A bare version is treated as `==`.
    pub fn matches(&self, requirement: &str) -> bool {
        let requirement = requirement.trim();
        if requirement == self.version() {
            return true;
        }
        let Ok(version) = Pep440Version::from_str(self.version()) else {
            return false;
        };
        let requirement = if requirement.starts_with(|c: char| c.is_ascii_digit()) {
            format!("=={requirement}")
        } else {
            requirement.to_string()
        };
        VersionSpecifiers::from_str(&requirement)
            .is_ok_and(|specifiers| specifiers.iter().all(|item| item.contains(&version)))
    }
}

impl PartialEq for Wheel {
    fn eq(&self, other: &Self) -> bool {
        self.name.distribution == other.name.distribution && self.name.version == other.name.version
    }
}

impl Eq for Wheel {}

impl fmt::Display for Wheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Wheels for `distribution` inside `folder`, best first: highest version,
/// restricted to `version` when given and to wheels that support
/// `for_py_version`.
pub fn discover_wheels(
    folder: &Path,
    distribution: &str,
    version: Option<&str>,
    for_py_version: &str,
) -> Vec<Wheel> {
    let Ok(entries) = fs::read_dir(folder) else {
        return Vec::new();
    };
    let mut wheels: Vec<Wheel> = entries
        .flatten()
        .filter_map(|entry| Wheel::from_path(&entry.path()))
        .filter(|wheel| wheel.distribution() == distribution)
        .filter(|wheel| version.map_or(true, |version| wheel.matches(version)))
        .filter(|wheel| match wheel.support_py(for_py_version) {
            Ok(supported) => supported,
            Err(err) => {
                tracing::debug!(wheel = %wheel, "skip unreadable wheel: {err:#}");
                false
            }
        })
        .collect();
    wheels.sort_by(|a, b| b.version_key().cmp(&a.version_key()));
    wheels
}

fn parse_release(for_py_version: &str) -> Option<(u32, u32)> {
    let mut parts = for_py_version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|minor| minor.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::fs::File;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    /// Write a minimal wheel with one module, METADATA and an optional
    /// console script.
    pub fn write_wheel(
        folder: &Path,
        distribution: &str,
        version: &str,
        requires_python: Option<&str>,
        console_script: Option<(&str, &str)>,
    ) -> Result<PathBuf> {
        let path = folder.join(format!("{distribution}-{version}-py3-none-any.whl"));
        let mut writer = ZipWriter::new(File::create(&path)?);
        let options = FileOptions::default();
        writer.start_file(format!("{distribution}/__init__.py"), options)?;
        writer.write_all(format!("__version__ = {version:?}\n").as_bytes())?;
        let dist_info = format!("{distribution}-{version}.dist-info");
        writer.start_file(format!("{dist_info}/METADATA"), options)?;
        let mut metadata = format!("Metadata-Version: 2.1\nName: {distribution}\nVersion: {version}\n");
        if let Some(requires) = requires_python {
            metadata.push_str(&format!("Requires-Python: {requires}\n"));
        }
        writer.write_all(metadata.as_bytes())?;
        writer.start_file(format!("{dist_info}/WHEEL"), options)?;
        writer.write_all(b"Wheel-Version: 1.0\nRoot-Is-Purelib: true\nTag: py3-none-any\n")?;
        if let Some((name, target)) = console_script {
            writer.start_file(format!("{dist_info}/entry_points.txt"), options)?;
            writer.write_all(format!("[console_scripts]\n{name} = {target}\n").as_bytes())?;
        }
        writer.start_file(format!("{dist_info}/RECORD"), options)?;
        writer.write_all(b"")?;
        writer.finish()?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::write_wheel;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn requires_python_is_read_from_metadata() -> Result<()> {
        let temp = tempdir()?;
        let path = write_wheel(temp.path(), "pip", "24.2", Some(">=3.8"), None)?;
        let wheel = Wheel::new(&path)?;
        assert!(wheel.support_py("3.12")?);
        assert!(!wheel.support_py("3.7")?);
        let path = write_wheel(temp.path(), "wheel", "0.44.0", None, None)?;
        assert!(Wheel::new(path)?.support_py("2.7")?);
        Ok(())
    }

    #[test]
    fn version_requirements() -> Result<()> {
        let wheel = Wheel::new("/w/pip-24.2-py3-none-any.whl")?;
        assert!(wheel.matches("24.2"));
        assert!(wheel.matches(">=24,<25"));
        assert!(!wheel.matches("<24"));
        assert!(!wheel.matches("23.1"));
        assert_eq!(wheel, Wheel::new("/elsewhere/pip-24.2-py2.py3-none-any.whl")?);
        Ok(())
    }

    #[test]
    fn discovery_orders_by_version_and_filters() -> Result<()> {
        let temp = tempdir()?;
        write_wheel(temp.path(), "pip", "9.0.1", None, None)?;
        write_wheel(temp.path(), "pip", "10.0", None, None)?;
        write_wheel(temp.path(), "pip", "25.0", Some(">=3.9"), None)?;
        write_wheel(temp.path(), "setuptools", "75.1.0", None, None)?;
        std::fs::write(temp.path().join("pip-broken.txt"), "")?;

        let found = discover_wheels(temp.path(), "pip", None, "3.8");
        let versions: Vec<_> = found.iter().map(Wheel::version).collect();
        assert_eq!(versions, vec!["10.0", "9.0.1"]);
        let found = discover_wheels(temp.path(), "pip", None, "3.12");
        assert_eq!(found[0].version(), "25.0");
        let found = discover_wheels(temp.path(), "pip", Some("9.0.1"), "3.12");
        assert_eq!(found.len(), 1);
        Ok(())
    }
}
