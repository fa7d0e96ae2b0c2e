use std::cmp::Ordering;
use std::fmt;

use anyhow::{bail, Result};

/// Components of a wheel filename:
/// `{distribution}-{version}(-{build})?-{python}-{abi}-{platform}.whl`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WheelName {
    pub distribution: String,
    pub version: String,
    pub build: Option<String>,
    pub python_tag: String,
    pub abi_tag: String,
    pub platform_tag: String,
}

impl WheelName {
    pub fn parse(filename: &str) -> Result<Self> {
        let Some(stem) = filename.strip_suffix(".whl") else {
            bail!("{filename} is not a wheel");
        };
        let parts: Vec<&str> = stem.split('-').collect();
        let (distribution, version, build, python_tag, abi_tag, platform_tag) = match parts[..] {
            [dist, version, py, abi, plat] => (dist, version, None, py, abi, plat),
            [dist, version, build, py, abi, plat] => (dist, version, Some(build), py, abi, plat),
            _ => bail!("invalid wheel filename {filename}"),
        };
        if [distribution, version, python_tag, abi_tag, platform_tag]
            .iter()
            .any(|part| part.is_empty())
        {
            bail!("invalid wheel filename {filename}");
        }
        Ok(Self {
            distribution: distribution.to_string(),
            version: version.to_string(),
            build: build.map(ToString::to_string),
            python_tag: python_tag.to_string(),
            abi_tag: abi_tag.to_string(),
            platform_tag: platform_tag.to_string(),
        })
    }

    pub fn stem(&self) -> String {
        let mut parts = vec![self.distribution.as_str(), self.version.as_str()];
        if let Some(build) = &self.build {
            parts.push(build);
        }
        parts.extend([
            self.python_tag.as_str(),
            self.abi_tag.as_str(),
            self.platform_tag.as_str(),
        ]);
        parts.join("-")
    }

    /// Leading numeric release components, at most three.
    pub fn version_tuple(&self) -> Vec<u64> {
        self.version
            .split('.')
            .take(3)
            .map_while(|part| part.parse::<u64>().ok())
            .collect()
    }

    /// Directory name of the `.dist-info` folder inside the archive.
    pub fn dist_info(&self) -> String {
        format!("{}-{}.dist-info", self.distribution, self.version)
    }

    pub fn version_key(&self) -> Vec<VersionPart> {
        version_key(&self.version)
    }
}

impl fmt::Display for WheelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.whl", self.stem())
    }
}

/// One dot-separated version segment; numeric segments order numerically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPart {
    Number(u64),
    Text(String),
}

impl Ord for VersionPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (VersionPart::Number(a), VersionPart::Number(b)) => a.cmp(b),
            (VersionPart::Text(a), VersionPart::Text(b)) => a.cmp(b),
            (VersionPart::Number(_), VersionPart::Text(_)) => Ordering::Less,
            (VersionPart::Text(_), VersionPart::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for VersionPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn version_key(version: &str) -> Vec<VersionPart> {
    version
        .split('.')
        .map(|part| match part.parse::<u64>() {
            Ok(number) => VersionPart::Number(number),
            Err(_) => VersionPart::Text(part.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders_filenames() -> Result<()> {
        for filename in [
            "pip-24.2-py3-none-any.whl",
            "setuptools-75.1.0-py3-none-any.whl",
            "demo-1.0-1build-cp312-cp312-manylinux_2_17_x86_64.whl",
        ] {
            let wheel = WheelName::parse(filename)?;
            assert_eq!(wheel.to_string(), filename);
        }
        Ok(())
    }

    #[test]
    fn build_tag_is_optional() -> Result<()> {
        let wheel = WheelName::parse("demo-1.0-1build-cp312-cp312-linux_x86_64.whl")?;
        assert_eq!(wheel.build.as_deref(), Some("1build"));
        assert_eq!(wheel.python_tag, "cp312");
        let wheel = WheelName::parse("wheel-0.44.0-py3-none-any.whl")?;
        assert!(wheel.build.is_none());
        assert_eq!(wheel.dist_info(), "wheel-0.44.0.dist-info");
        Ok(())
    }

    #[test]
    fn rejects_non_wheels() {
        assert!(WheelName::parse("pip-24.2.tar.gz").is_err());
        assert!(WheelName::parse("pip-24.2-py3.whl").is_err());
        assert!(WheelName::parse("a-b-c-d-e-f-g.whl").is_err());
    }

    #[test]
    fn version_tuple_stops_at_text() -> Result<()> {
        let wheel = WheelName::parse("pip-24.3.1.4-py3-none-any.whl")?;
        assert_eq!(wheel.version_tuple(), vec![24, 3, 1]);
        let wheel = WheelName::parse("pip-25.0b1-py3-none-any.whl")?;
        assert_eq!(wheel.version_tuple(), vec![25]);
        let wheel = WheelName::parse("pip-25.rc1-py3-none-any.whl")?;
        assert_eq!(wheel.version_tuple(), vec![25]);
        Ok(())
    }

    #[test]
    fn numeric_segments_sort_numerically() {
        let mut versions = vec!["9.0.1", "10.0", "10.0.dev1", "9.10"];
        versions.sort_by_key(|v| version_key(v));
        assert_eq!(versions, vec!["9.0.1", "9.10", "10.0", "10.0.dev1"]);
    }
}
