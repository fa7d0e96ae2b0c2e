//! Seed by linking extracted wheel images from the app data store.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use rayon::prelude::*;
use walkdir::WalkDir;

use super::image::{ensure_image, ScriptTarget, SCRIPTS_DIR, SITE_DIR};
use super::SeedOptions;
use crate::app_data::AppData;
use crate::config::EnvSnapshot;
use crate::create::{relative_to, Creator};
use crate::error::VirtualenvError;
use crate::fs::{copy, ensure_dir, fs_supports_symlink, hardlink, safe_delete, symlink};
use crate::wheels::{get_wheel, AcquireContext, Version, Wheel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub(super) enum LinkMethod {
    #[strum(serialize = "symlink")]
    Symlink,
    /// Hardlink each file, copying where hardlinks are refused.
    #[strum(serialize = "copy")]
    Hardlink,
}

pub(super) fn seed(
    options: &SeedOptions,
    distributions: &IndexMap<String, Version>,
    creator: &Creator,
    app_data: &AppData,
    env: &EnvSnapshot,
) -> Result<()> {
    let for_py_version = creator.interpreter().version_release_str();
    let wheels = acquire_wheels(options, distributions, creator, app_data, env, &for_py_version)?;

    let layout = creator.layout();
    let target = ScriptTarget {
        major: creator.interpreter().version_info.major,
        minor: creator.interpreter().version_info.minor,
        windows: creator.interpreter().is_windows(),
        bin_from_purelib: relative_to(&layout.bin_dir, &layout.purelib),
    };
    let method = link_method(options, creator, app_data);
    wheels
        .par_iter()
        .map(|(distribution, wheel)| {
            tracing::debug!(distribution = %distribution, wheel = %wheel, ?method, "install");
            let image = ensure_image(app_data, &for_py_version, wheel, &target)?;
            link_image(&image, &layout.purelib, &layout.bin_dir, method)
                .with_context(|| format!("failed to install {distribution} into {}", creator.dest().display()))
        })
        .collect::<Result<Vec<()>>>()?;
    Ok(())
}

/// Symlinks into a transient store would dangle once the seed finishes.
pub(super) fn link_method(options: &SeedOptions, creator: &Creator, app_data: &AppData) -> LinkMethod {
    let posix = !creator.interpreter().is_windows();
    let wanted = options.symlink_app_data || creator.symlinks();
    if posix && wanted && !app_data.is_transient() && fs_supports_symlink() {
        LinkMethod::Symlink
    } else {
        LinkMethod::Hardlink
    }
}

/// Resolve every distribution to a wheel, one worker per distribution.
/// A missing wheel falls back to a download even when downloads are off.
pub(super) fn acquire_wheels(
    options: &SeedOptions,
    distributions: &IndexMap<String, Version>,
    creator: &Creator,
    app_data: &AppData,
    env: &EnvSnapshot,
    for_py_version: &str,
) -> Result<Vec<(String, Wheel)>> {
    let mut search_dirs: Vec<PathBuf> = options
        .extra_search_dir
        .iter()
        .filter(|dir| dir.is_dir())
        .cloned()
        .collect();
    search_dirs.extend(app_data.house_candidates(for_py_version));
    let base = AcquireContext {
        app_data,
        search_dirs: &search_dirs,
        download: options.download,
        periodic_update: options.periodic_update,
        interpreter: creator.interpreter().base_executable(),
        env,
    };
    let attempts: &[bool] = if options.download { &[true] } else { &[false, true] };

    let results: Vec<(String, Result<Option<Wheel>>)> = distributions
        .par_iter()
        .map(|(distribution, version)| {
            let mut outcome = Ok(None);
            for &download in attempts {
                let ctx = AcquireContext { download, ..base };
                outcome = get_wheel(&ctx, distribution, version, for_py_version);
                if matches!(outcome, Ok(Some(_))) {
                    break;
                }
            }
            (distribution.clone(), outcome)
        })
        .collect();

    let mut wheels = Vec::new();
    let mut failed = Vec::new();
    for (distribution, outcome) in results {
        match outcome {
            Ok(Some(wheel)) => wheels.push((distribution, wheel)),
            Ok(None) => {
                tracing::error!(distribution = %distribution, "no wheel found");
                failed.push(distribution);
            }
            Err(err) => {
                match err.downcast_ref::<VirtualenvError>() {
                    Some(VirtualenvError::WheelDownloadFail { code, stdout, stderr, .. }) => {
                        tracing::error!(distribution = %distribution, code, "failed to download\n{stdout}{stderr}");
                    }
                    _ => tracing::error!(distribution = %distribution, error = %format!("{err:#}"), "failed to acquire wheel"),
                }
                failed.push(distribution);
            }
        }
    }
    if !failed.is_empty() {
        return Err(VirtualenvError::SeedFailed(failed).into());
    }
    Ok(wheels)
}

fn link_image(image: &Path, purelib: &Path, bin_dir: &Path, method: LinkMethod) -> Result<()> {
    link_children(&image.join(SITE_DIR), purelib, method)?;
    let scripts = image.join(SCRIPTS_DIR);
    if scripts.is_dir() {
        link_children(&scripts, bin_dir, method)?;
    }
    Ok(())
}

fn link_children(from: &Path, into: &Path, method: LinkMethod) -> Result<()> {
    ensure_dir(into)?;
    let entries = fs::read_dir(from).with_context(|| format!("failed to list {}", from.display()))?;
    for entry in entries.flatten() {
        let src = entry.path();
        let dest = into.join(entry.file_name());
        safe_delete(&dest)?;
        match method {
            LinkMethod::Symlink => symlink(&src, &dest)?,
            LinkMethod::Hardlink => hardlink_tree(&src, &dest)?,
        }
    }
    Ok(())
}

fn hardlink_tree(src: &Path, dest: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).with_context(|| format!("failed to stat {}", src.display()))?;
    if !meta.is_dir() {
        return hardlink_or_copy(src, dest);
    }
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| anyhow!("{} escaped {}", entry.path().display(), src.display()))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else {
            hardlink_or_copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn hardlink_or_copy(src: &Path, dest: &Path) -> Result<()> {
    if hardlink(src, dest).is_err() {
        copy(src, dest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::image::INSTALLER;
    use crate::wheels::fixtures::write_wheel;
    use tempfile::tempdir;

    fn image(temp: &Path) -> Result<PathBuf> {
        let site = temp.join("image").join(SITE_DIR);
        fs::create_dir_all(site.join("demo"))?;
        fs::write(site.join("demo").join("__init__.py"), b"")?;
        fs::create_dir_all(site.join("demo-1.0.dist-info"))?;
        fs::write(site.join("demo-1.0.dist-info").join("INSTALLER"), INSTALLER)?;
        let scripts = temp.join("image").join(SCRIPTS_DIR);
        fs::create_dir_all(&scripts)?;
        fs::write(scripts.join("demo"), b"#!/bin/sh\n")?;
        Ok(temp.join("image"))
    }

    #[test]
    fn hardlinked_install_replaces_existing() -> Result<()> {
        let temp = tempdir()?;
        let image = image(temp.path())?;
        let purelib = temp.path().join("env").join("site");
        let bin = temp.path().join("env").join("bin");
        fs::create_dir_all(purelib.join("demo"))?;
        fs::write(purelib.join("demo").join("stale.py"), b"")?;

        link_image(&image, &purelib, &bin, LinkMethod::Hardlink)?;
        assert!(purelib.join("demo").join("__init__.py").is_file());
        assert!(!purelib.join("demo").join("stale.py").exists());
        assert!(!fs::symlink_metadata(purelib.join("demo"))?.file_type().is_symlink());
        assert_eq!(
            fs::read_to_string(purelib.join("demo-1.0.dist-info").join("INSTALLER"))?,
            INSTALLER
        );
        assert!(bin.join("demo").is_file());
        Ok(())
    }

    #[test]
    fn top_level_files_are_linked_as_files() -> Result<()> {
        let temp = tempdir()?;
        let image = image(temp.path())?;
        fs::write(image.join(SITE_DIR).join("distutils-precedence.pth"), b"import os\n")?;
        let purelib = temp.path().join("site");
        let bin = temp.path().join("bin");
        link_image(&image, &purelib, &bin, LinkMethod::Hardlink)?;
        link_image(&image, &purelib, &bin, LinkMethod::Hardlink)?;
        assert_eq!(fs::read(purelib.join("distutils-precedence.pth"))?, b"import os\n");
        assert_eq!(fs::read(bin.join("demo"))?, b"#!/bin/sh\n");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn transient_store_never_symlinks() -> Result<()> {
        let temp = tempdir()?;
        let prefix = temp.path().join("host");
        fs::create_dir_all(prefix.join("bin"))?;
        fs::write(prefix.join("bin").join("python3.12"), b"")?;
        let info = crate::discovery::fixtures::cpython_posix(&prefix);
        let creator = Creator::select(
            &info,
            crate::create::CreatorOptions {
                dest: temp.path().join("env"),
                ..Default::default()
            },
        )?;
        let options = SeedOptions {
            symlink_app_data: true,
            ..SeedOptions::default()
        };
        let store = AppData::store(temp.path().join("app"));
        if fs_supports_symlink() {
            assert_eq!(link_method(&options, &creator, &store), LinkMethod::Symlink);
        }
        let disabled = AppData::disabled()?;
        assert!(disabled.is_transient());
        assert_eq!(link_method(&options, &creator, &disabled), LinkMethod::Hardlink);
        let read_only = AppData::read_only(temp.path().join("app"))?;
        assert_eq!(link_method(&options, &creator, &read_only), LinkMethod::Hardlink);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_install_points_into_image() -> Result<()> {
        let temp = tempdir()?;
        let image = image(temp.path())?;
        let purelib = temp.path().join("site");
        let bin = temp.path().join("bin");
        link_image(&image, &purelib, &bin, LinkMethod::Symlink)?;
        assert_eq!(fs::read_link(purelib.join("demo"))?, image.join(SITE_DIR).join("demo"));
        assert_eq!(fs::read_link(bin.join("demo"))?, image.join(SCRIPTS_DIR).join("demo"));
        Ok(())
    }

    #[test]
    fn unresolvable_distributions_fail_the_seed() -> Result<()> {
        let temp = tempdir()?;
        let wheels = temp.path().join("wheels");
        fs::create_dir_all(&wheels)?;
        write_wheel(&wheels, "pip", "24.2", None, None)?;
        let app_data = AppData::store(temp.path().join("app"));
        let env = EnvSnapshot::from_pairs(&[("VIRTUALENV_BUNDLE_DIR", "/nonexistent")]);
        let prefix = temp.path().join("host");
        fs::create_dir_all(prefix.join("bin"))?;
        fs::write(prefix.join("bin").join("python3.12"), b"")?;
        let info = crate::discovery::fixtures::cpython_posix(&prefix);
        let creator = Creator::select(
            &info,
            crate::create::CreatorOptions {
                dest: temp.path().join("env"),
                ..Default::default()
            },
        )?;
        let options = SeedOptions {
            extra_search_dir: vec![wheels],
            ..SeedOptions::default()
        };
        let mut distributions = IndexMap::new();
        distributions.insert("pip".to_string(), Version::Bundle);
        let found = acquire_wheels(&options, &distributions, &creator, &app_data, &env, "3.12")?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.version(), "24.2");

        distributions.insert("setuptools".to_string(), Version::Embed);
        let err = acquire_wheels(&options, &distributions, &creator, &app_data, &env, "3.12").unwrap_err();
        match err.downcast_ref::<VirtualenvError>() {
            Some(VirtualenvError::SeedFailed(names)) => assert_eq!(names, &vec!["setuptools".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }
}
