use std::fmt;

use serde::{Deserialize, Serialize};

/// Interpreter version as reported by `sys.version_info`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    #[serde(default = "default_release_level")]
    pub releaselevel: String,
    #[serde(default)]
    pub serial: u32,
}

fn default_release_level() -> String {
    "final".to_string()
}

impl VersionInfo {
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            releaselevel: default_release_level(),
            serial: 0,
        }
    }

    /// `major.minor.micro`
    pub fn version_str(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.micro)
    }

    /// `major.minor`, the key used for wheel caches and bundle tables.
    pub fn release_str(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.version_str())?;
        if self.releaselevel != "final" {
            write!(f, "-{}-{}", self.releaselevel, self.serial)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_release_and_full_version() {
        let info = VersionInfo::new(3, 12, 4);
        assert_eq!(info.version_str(), "3.12.4");
        assert_eq!(info.release_str(), "3.12");
        assert_eq!(info.to_string(), "3.12.4");
    }

    #[test]
    fn missing_release_level_defaults_to_final() {
        let info: VersionInfo =
            serde_json::from_str(r#"{"major":3,"minor":13,"micro":0}"#).expect("parse");
        assert_eq!(info.releaselevel, "final");
        assert_eq!(info.serial, 0);
    }

    #[test]
    fn prerelease_is_visible_in_display() {
        let mut info = VersionInfo::new(3, 14, 0);
        info.releaselevel = "beta".into();
        info.serial = 2;
        assert_eq!(info.to_string(), "3.14.0-beta-2");
    }
}
