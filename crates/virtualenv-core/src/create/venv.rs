//! Delegate creation to the host's `venv` module.

use anyhow::Result;
use virtualenv_domain::PyEnvCfg;

use super::Creator;
use crate::process::run_command;

pub(super) fn create(creator: &Creator) -> Result<()> {
    let python = creator.interpreter().base_executable();
    let mut args: Vec<String> = vec!["-m".into(), "venv".into(), "--without-pip".into()];
    if creator.options.system_site_packages {
        args.push("--system-site-packages".into());
    }
    args.push(if creator.symlinks() { "--symlinks" } else { "--copies" }.into());
    args.push(creator.dest().display().to_string());
    tracing::debug!(python = %python.display(), ?args, "run venv");
    run_command(python, &args, &[])?.ensure_success(python, &args)?;
    Ok(())
}

/// Keep what venv wrote and append our keys it does not know about.
pub(super) fn merge_pyvenv_cfg(ours: PyEnvCfg) -> Result<()> {
    let mut merged = if ours.path().exists() {
        PyEnvCfg::from_file(ours.path().to_path_buf())?
    } else {
        PyEnvCfg::new(ours.path().to_path_buf())
    };
    for (key, value) in ours.iter() {
        if !merged.contains(key) {
            merged.set(key, value);
        }
    }
    merged.write()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn venv_values_win_and_ours_are_appended() -> Result<()> {
        let temp = tempdir()?;
        let path = temp.path().join("pyvenv.cfg");
        fs::write(
            &path,
            "home = /opt/python/bin\ninclude-system-site-packages = false\nversion = 3.12.4\nexecutable = /opt/python/bin/python3.12\n",
        )?;
        let mut ours = PyEnvCfg::new(path.clone());
        ours.set("home", "/usr/bin");
        ours.set("implementation", "CPython");
        ours.set("base-prefix", "/usr");
        merge_pyvenv_cfg(ours)?;

        let merged = PyEnvCfg::from_file(path)?;
        let keys: Vec<&str> = merged.iter().map(|(key, _)| key).collect();
        assert_eq!(
            keys,
            vec![
                "home",
                "include-system-site-packages",
                "version",
                "executable",
                "implementation",
                "base-prefix"
            ]
        );
        assert_eq!(merged.get("home"), Some("/opt/python/bin"));
        Ok(())
    }
}
