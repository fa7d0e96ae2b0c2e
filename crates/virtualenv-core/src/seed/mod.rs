//! Install the initial packaging tools into a created environment.

mod app_data;
mod ensurepip;
pub mod image;
mod pip;

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use indexmap::IndexMap;

use crate::app_data::AppData;
use crate::config::EnvSnapshot;
use crate::create::Creator;
use crate::wheels::{bundled_distributions, Version};

pub const SEED_DISTRIBUTIONS: [&str; 3] = ["pip", "setuptools", "wheel"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum SeederKind {
    #[default]
    AppData,
    Pip,
    Ensurepip,
    None,
}

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub seeder: SeederKind,
    pub no_seed: bool,
    pub download: bool,
    pub extra_search_dir: Vec<PathBuf>,
    /// Requested distributions; a distribution set to `none` is absent.
    pub distributions: IndexMap<String, Version>,
    pub periodic_update: bool,
    pub symlink_app_data: bool,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            seeder: SeederKind::default(),
            no_seed: false,
            download: false,
            extra_search_dir: Vec::new(),
            distributions: SEED_DISTRIBUTIONS
                .iter()
                .map(|dist| ((*dist).to_string(), Version::Bundle))
                .collect(),
            periodic_update: false,
            symlink_app_data: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Seeder {
    options: SeedOptions,
}

impl Seeder {
    pub fn new(options: SeedOptions) -> Self {
        Self { options }
    }

    pub fn kind(&self) -> SeederKind {
        self.options.seeder
    }

    pub fn enabled(&self) -> bool {
        !self.options.no_seed && self.options.seeder != SeederKind::None
    }

    /// Distributions to install for `for_py_version`. Ones the embedded
    /// table does not carry for that version are dropped unless a
    /// specific version was asked for.
    pub fn distributions(&self, for_py_version: &str) -> IndexMap<String, Version> {
        let bundled = bundled_distributions(for_py_version);
        self.options
            .distributions
            .iter()
            .filter(|(dist, version)| {
                let keep = bundled.iter().any(|name| *name == dist.as_str()) || matches!(version, Version::Requested(_));
                if !keep {
                    tracing::debug!(distribution = %dist, for_py_version, "not bundled, skipping");
                }
                keep
            })
            .map(|(dist, version)| (dist.clone(), version.clone()))
            .collect()
    }

    pub fn run(&self, creator: &Creator, app_data: &AppData, env: &EnvSnapshot) -> Result<()> {
        if !self.enabled() {
            tracing::debug!("seeding disabled");
            return Ok(());
        }
        let distributions = self.distributions(&creator.interpreter().version_release_str());
        match self.options.seeder {
            SeederKind::AppData => {
                if distributions.is_empty() {
                    return Ok(());
                }
                app_data::seed(&self.options, &distributions, creator, app_data, env)
            }
            SeederKind::Pip => {
                if distributions.is_empty() {
                    return Ok(());
                }
                pip::seed(&self.options, &distributions, creator, app_data, env)
            }
            SeederKind::Ensurepip => ensurepip::seed(creator),
            SeederKind::None => Ok(()),
        }
    }

    /// One-line summary for the creation report.
    pub fn describe(&self, creator: &Creator, app_data: &AppData) -> String {
        if self.options.seeder == SeederKind::Ensurepip {
            return "Ensurepip()".to_string();
        }
        let name = match self.options.seeder {
            SeederKind::Pip => "PipInvoke",
            _ => "FromAppData",
        };
        let mut out = format!("{name}(");
        if !self.enabled() {
            out.push_str("no_seed=true)");
            return out;
        }
        let _ = write!(out, "download={}", self.options.download);
        for dist in SEED_DISTRIBUTIONS {
            let version = self
                .options
                .distributions
                .get(dist)
                .map_or_else(|| "none".to_string(), ToString::to_string);
            let _ = write!(out, ", {dist}={version}");
        }
        if self.options.seeder == SeederKind::AppData {
            let via = app_data::link_method(&self.options, creator, app_data);
            let _ = write!(out, ", via={via}, app_data_dir={}", app_data.root().display());
        }
        out.push(')');
        out
    }
}
