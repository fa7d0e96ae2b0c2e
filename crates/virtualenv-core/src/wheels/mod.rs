//! Seed wheels: where they come from and how they stay fresh.

mod acquire;
pub mod bundle;
mod download;
pub mod periodic;
mod wheel;

use std::fmt;
use std::str::FromStr;

pub use acquire::{get_wheel, AcquireContext};
pub use bundle::{bundled_distributions, get_embed_wheel, BUNDLE_DIR_ENV};
pub use download::{download_wheel, pip_wheel_env, requirement};
pub use periodic::{PeriodicUpdateArgs, UpdateLog, PERIODIC_UPDATE_COMMAND};
pub use wheel::{discover_wheels, Wheel};

#[cfg(test)]
pub(crate) use wheel::fixtures;

/// Which wheel to seed for one distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    /// Only the wheel embedded with the tool.
    Embed,
    /// Embedded, search folders or periodic updates, whichever is newest.
    Bundle,
    /// A version or PEP 440 requirement, e.g. `24.2` or `>=24`.
    Requested(String),
}

impl Version {
    pub fn of_version(&self) -> Option<&str> {
        match self {
            Version::Requested(version) => Some(version),
            Version::Embed | Version::Bundle => None,
        }
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(match raw.trim() {
            "embed" => Version::Embed,
            "bundle" | "latest" | "" => Version::Bundle,
            other => Version::Requested(other.to_string()),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Embed => f.write_str("embed"),
            Version::Bundle => f.write_str("bundle"),
            Version::Requested(version) => f.write_str(version),
        }
    }
}
