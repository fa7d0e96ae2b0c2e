use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::builder::PossibleValuesParser;
use clap::{value_parser, ArgAction, Command, CommandFactory, FromArgMatches, Parser};
use indexmap::IndexMap;
use virtualenv_core::{
    creator_names, AppDataOptions, ConfigSources, CreatorChoice, CreatorOptions, SeedOptions, SeederKind,
    SessionOptions, Version, VirtualenvError, SEED_DISTRIBUTIONS,
};

pub const SEEDERS: [&str; 4] = ["app-data", "pip", "ensurepip", "none"];

#[derive(Parser, Debug)]
#[command(
    name = "virtualenv",
    version,
    about = "Create isolated Python environments",
    after_help = "Examples:\n  virtualenv venv\n  virtualenv -p python3.12 --no-setuptools venv\n"
)]
#[allow(clippy::struct_excessive_bools)]
pub struct VirtualenvCli {
    #[arg(value_name = "DEST", value_parser = value_parser!(PathBuf), help = "Directory to create the environment at")]
    pub dest: PathBuf,

    #[arg(short, long, action = ArgAction::Count, help = "Increase verbosity (repeatable)")]
    pub verbose: u8,
    #[arg(short, long, action = ArgAction::Count, help = "Decrease verbosity (repeatable)")]
    pub quiet: u8,
    #[arg(long, help = "On failure also display the full error chain")]
    pub with_traceback: bool,

    #[arg(long = "app-data", value_name = "DIR", value_parser = value_parser!(PathBuf), help = "Folder for the cache shared between runs")]
    pub app_data: Option<PathBuf>,
    #[arg(long, help = "Start with an empty app data folder")]
    pub reset_app_data: bool,
    #[arg(long, help = "Use app data without writing to it")]
    pub read_only_app_data: bool,

    #[arg(
        short,
        long,
        value_name = "SPEC",
        action = ArgAction::Append,
        help = "Interpreter to create the environment for; repeat to try several"
    )]
    pub python: Vec<String>,

    #[arg(long, value_name = "NAME", help = "Creator to use (builtin picks the first builtin that applies)")]
    pub creator: Option<String>,
    #[arg(long, help = "Remove the destination directory first")]
    pub clear: bool,
    #[arg(long, help = "Do not create a VCS ignore file in the destination")]
    pub no_vcs_ignore: bool,
    #[arg(long, help = "Give the environment access to the system site-packages")]
    pub system_site_packages: bool,
    #[arg(long, visible_alias = "always-copy", help = "Copy files instead of symlinking them")]
    pub copies: bool,
    #[arg(long, help = "Symlink files when the platform allows it (default)")]
    pub symlinks: bool,
    #[arg(long, value_name = "NAME", help = "Prompt prefix for the environment ('.' uses the current folder name)")]
    pub prompt: Option<String>,

    #[arg(long, value_name = "NAME", help = "Seed packages with app-data, pip, ensurepip or none")]
    pub seeder: Option<String>,
    #[arg(long, visible_alias = "without-pip", help = "Do not install seed packages")]
    pub no_seed: bool,
    #[arg(long, help = "Allow pip to download the latest seed wheels")]
    pub download: bool,
    #[arg(long, help = "Only use embedded or already downloaded seed wheels (default)")]
    pub no_download: bool,
    #[arg(
        long,
        value_name = "DIR",
        action = ArgAction::Append,
        value_parser = value_parser!(PathBuf),
        help = "Extra folder to look for seed wheels in"
    )]
    pub extra_search_dir: Vec<PathBuf>,
    #[arg(long, value_name = "VERSION", help = "pip version: a version, bundle or embed")]
    pub pip: Option<String>,
    #[arg(long, value_name = "VERSION", help = "setuptools version: a version, bundle, embed or none")]
    pub setuptools: Option<String>,
    #[arg(long, value_name = "VERSION", help = "wheel version: a version, bundle, embed or none")]
    pub wheel: Option<String>,
    #[arg(long, help = "Do not install pip")]
    pub no_pip: bool,
    #[arg(long, help = "Do not install setuptools")]
    pub no_setuptools: bool,
    #[arg(long, help = "Do not install wheel")]
    pub no_wheel: bool,
    #[arg(long, help = "Do not refresh seed wheels in the background")]
    pub no_periodic_update: bool,
    #[arg(long, help = "Symlink wheel images from app data instead of copying them")]
    pub symlink_app_data: bool,

    #[arg(long, value_name = "LIST", help = "Comma separated activators to record")]
    pub activators: Option<String>,
}

impl VirtualenvCli {
    pub fn command_with(sources: &ConfigSources) -> Command {
        let cmd = Self::command()
            .mut_arg("creator", |arg| arg.value_parser(PossibleValuesParser::new(creator_names())))
            .mut_arg("seeder", |arg| arg.value_parser(PossibleValuesParser::new(SEEDERS)));
        let epilog = format!(
            "{}\n{}",
            cmd.get_after_help().map(ToString::to_string).unwrap_or_default(),
            sources.ini().epilog()
        );
        apply_config_defaults(cmd, sources).after_help(epilog)
    }

    pub fn parse_with(sources: &ConfigSources) -> Result<Self, clap::Error> {
        let matches = Self::command_with(sources).try_get_matches()?;
        Self::from_arg_matches(&matches)
    }

    pub fn try_parse_from_with<I, T>(sources: &ConfigSources, args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Self::command_with(sources).try_get_matches_from(args)?;
        Self::from_arg_matches(&matches)
    }

    pub fn session_options(&self) -> Result<SessionOptions> {
        let choice = match &self.creator {
            Some(raw) => CreatorChoice::from_str(raw)?,
            None => CreatorChoice::Auto,
        };
        let seeder = match &self.seeder {
            Some(raw) => SeederKind::from_str(raw)
                .map_err(|_| VirtualenvError::user(format!("unknown seeder {raw}")))?,
            None => SeederKind::default(),
        };
        Ok(SessionOptions {
            python: self.python.clone(),
            app_data: AppDataOptions {
                dir: self.app_data.clone(),
                read_only: self.read_only_app_data,
                reset: self.reset_app_data,
            },
            creator: CreatorOptions {
                dest: self.dest.clone(),
                clear: self.clear,
                no_vcs_ignore: self.no_vcs_ignore,
                system_site_packages: self.system_site_packages,
                copies: self.copies && !self.symlinks,
                prompt: self.prompt.clone(),
                choice,
            },
            seed: SeedOptions {
                seeder,
                no_seed: self.no_seed,
                download: self.download && !self.no_download,
                extra_search_dir: self.extra_search_dir.clone(),
                distributions: self.distributions(),
                periodic_update: !self.no_periodic_update,
                symlink_app_data: self.symlink_app_data,
            },
            activators: self
                .activators
                .as_deref()
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(ToOwned::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    fn distributions(&self) -> IndexMap<String, Version> {
        let mut distributions = IndexMap::new();
        for dist in SEED_DISTRIBUTIONS {
            let (requested, skipped) = match dist {
                "pip" => (self.pip.as_deref(), self.no_pip),
                "setuptools" => (self.setuptools.as_deref(), self.no_setuptools),
                _ => (self.wheel.as_deref(), self.no_wheel),
            };
            let requested = requested.map(str::trim).unwrap_or("bundle");
            if skipped || requested == "none" {
                continue;
            }
            if let Ok(version) = Version::from_str(requested) {
                distributions.insert(dist.to_string(), version);
            }
        }
        distributions
    }
}

/// Install env var and INI values as clap defaults, so the command line
/// still wins over both.
fn apply_config_defaults(mut cmd: Command, sources: &ConfigSources) -> Command {
    let options: Vec<(String, String, ArgAction)> = cmd
        .get_arguments()
        .filter_map(|arg| {
            let long = arg.get_long()?;
            Some((arg.get_id().to_string(), long.to_string(), arg.get_action().clone()))
        })
        .collect();
    for (id, long, action) in options {
        if matches!(long.as_str(), "help" | "version" | "verbose" | "quiet") {
            continue;
        }
        match action {
            ArgAction::SetTrue => {
                if let Some(value) = sources.flag(&long) {
                    let value = if value { "true" } else { "false" };
                    cmd = cmd.mut_arg(id, |arg| arg.default_value(value));
                }
            }
            ArgAction::Append => {
                if let Some(values) = sources.list(&long).filter(|values| !values.is_empty()) {
                    cmd = cmd.mut_arg(id, |arg| arg.default_values(values));
                }
            }
            ArgAction::Set => {
                if let Some(value) = sources.value(&long) {
                    cmd = cmd.mut_arg(id, |arg| arg.default_value(value));
                }
            }
            _ => {}
        }
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtualenv_core::{EnvSnapshot, IniConfig};

    fn sources(pairs: &[(&str, &str)]) -> ConfigSources {
        let env = EnvSnapshot::from_pairs(pairs);
        let ini = IniConfig::load_from(PathBuf::from("/nonexistent/virtualenv.ini"), false);
        ConfigSources::new(env, ini)
    }

    #[test]
    fn env_values_become_defaults() -> Result<()> {
        let sources = sources(&[
            ("VIRTUALENV_CLEAR", "yes"),
            ("VIRTUALENV_PYTHON", "python3.11 python3.12"),
            ("VIRTUALENV_PROMPT", "demo"),
        ]);
        let cli = VirtualenvCli::try_parse_from_with(&sources, ["virtualenv", "venv"])?;
        assert!(cli.clear);
        assert_eq!(cli.python, vec!["python3.11", "python3.12"]);
        assert_eq!(cli.prompt.as_deref(), Some("demo"));
        Ok(())
    }

    #[test]
    fn command_line_wins_over_env() -> Result<()> {
        let sources = sources(&[("VIRTUALENV_PYTHON", "python3.11"), ("VIRTUALENV_PROMPT", "demo")]);
        let cli = VirtualenvCli::try_parse_from_with(
            &sources,
            ["virtualenv", "-p", "pypy3", "--prompt", "other", "venv"],
        )?;
        assert_eq!(cli.python, vec!["pypy3"]);
        assert_eq!(cli.prompt.as_deref(), Some("other"));
        Ok(())
    }

    #[test]
    fn seed_distribution_flags() -> Result<()> {
        let sources = sources(&[]);
        let cli = VirtualenvCli::try_parse_from_with(
            &sources,
            ["virtualenv", "--pip", "embed", "--setuptools", "none", "--no-wheel", "venv"],
        )?;
        let options = cli.session_options()?;
        assert_eq!(options.seed.distributions.len(), 1);
        assert_eq!(options.seed.distributions.get("pip"), Some(&Version::Embed));
        assert!(options.seed.periodic_update);
        Ok(())
    }

    #[test]
    fn unknown_creator_is_rejected_by_the_parser() {
        let sources = sources(&[]);
        let err = VirtualenvCli::try_parse_from_with(&sources, ["virtualenv", "--creator", "conda", "venv"]);
        assert!(err.is_err());
    }

    #[test]
    fn symlinks_flag_cancels_copies_from_env() -> Result<()> {
        let sources = sources(&[("VIRTUALENV_COPIES", "1")]);
        let cli = VirtualenvCli::try_parse_from_with(&sources, ["virtualenv", "venv"])?;
        assert!(cli.session_options()?.creator.copies);
        let cli = VirtualenvCli::try_parse_from_with(&sources, ["virtualenv", "--symlinks", "venv"])?;
        assert!(!cli.session_options()?.creator.copies);
        Ok(())
    }
}
