use std::path::{Path, PathBuf};

use anyhow::Result;

use super::bundle::get_embed_wheel;
use super::download::download_wheel;
use super::periodic::periodic_update;
use super::wheel::{discover_wheels, Wheel};
use super::Version;
use crate::app_data::AppData;
use crate::config::EnvSnapshot;
use crate::fs::{ensure_dir, write_atomic};

/// Everything wheel acquisition needs besides the wheel being asked for.
#[derive(Debug, Clone, Copy)]
pub struct AcquireContext<'a> {
    pub app_data: &'a AppData,
    /// Extra search directories followed by the app data house.
    pub search_dirs: &'a [PathBuf],
    pub download: bool,
    pub periodic_update: bool,
    /// Interpreter that runs pip for downloads.
    pub interpreter: &'a Path,
    pub env: &'a EnvSnapshot,
}

/// Find a wheel for `distribution`: embedded bundle, then search folders,
/// then a download when allowed.
pub fn get_wheel(
    ctx: &AcquireContext<'_>,
    distribution: &str,
    version: &Version,
    for_py_version: &str,
) -> Result<Option<Wheel>> {
    let mut wheel = None;
    if !ctx.download || *version != Version::Bundle {
        wheel = from_bundle(ctx, distribution, version, for_py_version)?;
    }
    if ctx.download && wheel.is_none() && *version != Version::Embed {
        let house = ctx.app_data.house(for_py_version);
        wheel = Some(download_wheel(
            distribution,
            version.of_version(),
            for_py_version,
            ctx.search_dirs,
            &house,
            ctx.interpreter,
            ctx.env,
        )?);
    }
    Ok(wheel)
}

fn from_bundle(
    ctx: &AcquireContext<'_>,
    distribution: &str,
    version: &Version,
    for_py_version: &str,
) -> Result<Option<Wheel>> {
    let of_version = version.of_version();
    let mut wheel = load_embed_wheel(ctx.app_data, distribution, for_py_version, of_version, ctx.env)?;
    if *version == Version::Embed {
        return Ok(wheel);
    }
    if *version == Version::Bundle && ctx.app_data.can_update() {
        wheel = periodic_update(
            distribution,
            for_py_version,
            wheel,
            ctx.app_data,
            ctx.periodic_update,
            ctx.interpreter,
        )?;
    }
    if let Some(found) = from_dir(distribution, of_version, for_py_version, ctx.search_dirs) {
        wheel = match wheel {
            Some(current) if current.version_key() >= found.version_key() => Some(current),
            _ => Some(found),
        };
    }
    Ok(wheel)
}

/// Copy the embedded wheel into the house so later steps work on an app
/// data path.
fn load_embed_wheel(
    app_data: &AppData,
    distribution: &str,
    for_py_version: &str,
    version: Option<&str>,
    env: &EnvSnapshot,
) -> Result<Option<Wheel>> {
    let Some(embedded) = get_embed_wheel(distribution, for_py_version, env) else {
        return Ok(None);
    };
    if version.is_some_and(|version| !embedded.matches(version)) {
        return Ok(None);
    }
    let house = app_data.house(for_py_version);
    let dest = house.join(embedded.filename());
    if !dest.exists() {
        tracing::debug!(wheel = %embedded, "get bundled wheel");
        ensure_dir(&house)?;
        let bytes = std::fs::read(embedded.path())?;
        write_atomic(&dest, &bytes)?;
    }
    Ok(Some(Wheel::new(dest)?))
}

fn from_dir(distribution: &str, version: Option<&str>, for_py_version: &str, folders: &[PathBuf]) -> Option<Wheel> {
    folders.iter().find_map(|folder| {
        let found = discover_wheels(folder, distribution, version, for_py_version)
            .into_iter()
            .next();
        if let Some(wheel) = &found {
            tracing::debug!(wheel = %wheel, "found wheel in search folder");
        }
        found
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wheels::bundle::{bundled_filename, BUNDLE_DIR_ENV};
    use crate::wheels::fixtures::write_wheel;
    use tempfile::tempdir;

    fn context<'a>(
        app_data: &'a AppData,
        search_dirs: &'a [PathBuf],
        env: &'a EnvSnapshot,
    ) -> AcquireContext<'a> {
        AcquireContext {
            app_data,
            search_dirs,
            download: false,
            periodic_update: false,
            interpreter: Path::new("python3"),
            env,
        }
    }

    #[test]
    fn embedded_wheel_is_copied_into_house() -> Result<()> {
        let temp = tempdir()?;
        let bundle = temp.path().join("bundle");
        std::fs::create_dir_all(&bundle)?;
        let filename = bundled_filename("pip", "3.12").unwrap_or_default();
        let version = filename.split('-').nth(1).unwrap_or_default();
        write_wheel(&bundle, "pip", version, None, None)?;
        let env = EnvSnapshot::from_pairs(&[(BUNDLE_DIR_ENV, bundle.to_string_lossy().as_ref())]);
        let app_data = AppData::store(temp.path().join("app"));

        let wheel = get_wheel(&context(&app_data, &[], &env), "pip", &Version::Embed, "3.12")?
            .expect("embedded wheel");
        assert_eq!(wheel.path(), app_data.house("3.12").join(filename));
        assert!(wheel.exists());
        Ok(())
    }

    #[test]
    fn newer_search_dir_wheel_beats_bundle() -> Result<()> {
        let temp = tempdir()?;
        let extra = temp.path().join("extra");
        std::fs::create_dir_all(&extra)?;
        write_wheel(&extra, "pip", "99.0", None, None)?;
        let env = EnvSnapshot::from_pairs(&[(BUNDLE_DIR_ENV, "/nonexistent")]);
        let app_data = AppData::store(temp.path().join("app"));
        let dirs = vec![extra.clone()];
        let ctx = context(&app_data, &dirs, &env);

        let wheel = get_wheel(&ctx, "pip", &Version::Bundle, "3.12")?.expect("found");
        assert_eq!(wheel.version(), "99.0");
        assert!(get_wheel(&ctx, "pip", &Version::Embed, "3.12")?.is_none());
        assert!(get_wheel(&ctx, "pip", &Version::Requested("1.0".into()), "3.12")?.is_none());
        Ok(())
    }
}
