//! Seed by running pip from the new environment against local wheels.

use std::path::PathBuf;

use anyhow::{Context, Result};
use indexmap::{IndexMap, IndexSet};

use super::app_data::acquire_wheels;
use super::SeedOptions;
use crate::app_data::AppData;
use crate::config::EnvSnapshot;
use crate::create::Creator;
use crate::process::run_command;
use crate::wheels::{pip_wheel_env, Version, Wheel};

pub(super) fn seed(
    options: &SeedOptions,
    distributions: &IndexMap<String, Version>,
    creator: &Creator,
    app_data: &AppData,
    env: &EnvSnapshot,
) -> Result<()> {
    let for_py_version = creator.interpreter().version_release_str();
    let wheels = acquire_wheels(options, distributions, creator, app_data, env, &for_py_version)?;
    let args = install_args(&wheels);
    let mut vars = pip_wheel_env(&for_py_version, env);
    // Run pip out of its own wheel so the bare environment can install it.
    if let Some((_, pip)) = wheels.iter().find(|(dist, _)| dist == "pip") {
        vars.retain(|(key, _)| key != "PYTHONPATH");
        vars.push(("PYTHONPATH".to_string(), pip.path().display().to_string()));
    }
    let exe = creator.exe();
    tracing::debug!(exe = %exe.display(), args = %args.join(" "), "pip install");
    run_command(exe, &args, &vars)?
        .ensure_success(exe, &args)
        .with_context(|| format!("failed seed with pip into {}", creator.dest().display()))?;
    Ok(())
}

fn install_args(wheels: &[(String, Wheel)]) -> Vec<String> {
    let mut args: Vec<String> = [
        "-m",
        "pip",
        "-q",
        "install",
        "--only-binary",
        ":all:",
        "--disable-pip-version-check",
        "--no-index",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();
    let folders: IndexSet<PathBuf> = wheels
        .iter()
        .filter_map(|(_, wheel)| wheel.path().parent().map(ToOwned::to_owned))
        .collect();
    for folder in folders {
        args.push("--find-links".to_string());
        args.push(folder.display().to_string());
    }
    for (dist, wheel) in wheels {
        args.push(format!("{dist}=={}", wheel.version()));
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wheels::fixtures::write_wheel;
    use tempfile::tempdir;

    #[test]
    fn pins_acquired_wheels_and_links_their_folders() -> Result<()> {
        let temp = tempdir()?;
        let pip = write_wheel(temp.path(), "pip", "24.2", None, None)?;
        let setuptools = write_wheel(temp.path(), "setuptools", "75.1.0", None, None)?;
        let wheels = vec![
            ("pip".to_string(), Wheel::new(pip)?),
            ("setuptools".to_string(), Wheel::new(setuptools)?),
        ];
        let args = install_args(&wheels);
        let links: Vec<&String> = args
            .iter()
            .enumerate()
            .filter(|(i, _)| *i > 0 && args[i - 1] == "--find-links")
            .map(|(_, arg)| arg)
            .collect();
        assert_eq!(links, vec![&temp.path().display().to_string()]);
        assert!(args.contains(&"--no-index".to_string()));
        assert_eq!(&args[args.len() - 2..], ["pip==24.2", "setuptools==75.1.0"]);
        Ok(())
    }
}
