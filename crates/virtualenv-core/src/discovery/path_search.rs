use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use indexmap::IndexSet;
use virtualenv_domain::PythonSpec;

use crate::config::EnvSnapshot;

/// Directories listed in `PATH`, deduplicated, in order.
pub fn path_dirs(env: &EnvSnapshot) -> Vec<PathBuf> {
    let Some(raw) = env.var("PATH") else {
        return Vec::new();
    };
    let mut dirs = IndexSet::new();
    for dir in env::split_paths(&OsString::from(raw)) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let dir = fs::canonicalize(&dir).unwrap_or(dir);
        dirs.insert(dir);
    }
    dirs.into_iter().collect()
}

/// Executables in `PATH` whose file name fits `spec`, in PATH order; within
/// one directory the names are sorted so the choice is reproducible.
pub fn find_candidates(spec: &PythonSpec, env: &EnvSnapshot) -> Vec<PathBuf> {
    let pattern = spec.generate_re(cfg!(windows));
    let mut found = Vec::new();
    for dir in path_dirs(env) {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        let mut names: Vec<(String, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                pattern.is_match(&name).then(|| (name, entry.path()))
            })
            .collect();
        names.sort();
        for (_, path) in names {
            if is_executable(&path) {
                tracing::trace!(path = %path.display(), "path candidate");
                found.push(path);
            }
        }
    }
    found
}

/// Resolve a bare program name through `PATH`.
pub fn which_in(name: &str, env: &EnvSnapshot) -> Option<PathBuf> {
    let path = env.var("PATH")?;
    let cwd = env::current_dir().ok()?;
    which::which_in(name, Some(path), cwd).ok()
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch_exe(path: &std::path::Path) -> anyhow::Result<()> {
        fs::write(path, "")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn matches_versioned_names_in_path_order() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let first = temp.path().join("first");
        let second = temp.path().join("second");
        fs::create_dir_all(&first)?;
        fs::create_dir_all(&second)?;
        touch_exe(&first.join("python3.11"))?;
        touch_exe(&second.join("python3.12"))?;
        touch_exe(&second.join("python3.12-config"))?;
        fs::write(second.join("python3"), "")?;
        let path = env::join_paths([&first, &second])?;
        let env = EnvSnapshot::from_pairs(&[("PATH", path.to_string_lossy().as_ref())]);

        let spec = PythonSpec::from_string_spec("python3");
        let found = find_candidates(&spec, &env);
        let first = fs::canonicalize(&first)?;
        let second = fs::canonicalize(&second)?;
        assert_eq!(found, vec![first.join("python3.11"), second.join("python3.12")]);

        let spec = PythonSpec::from_string_spec("python3.12");
        assert_eq!(find_candidates(&spec, &env), vec![second.join("python3.12")]);
        Ok(())
    }

    #[test]
    fn missing_path_yields_nothing() {
        let spec = PythonSpec::from_string_spec("python3");
        assert!(find_candidates(&spec, &EnvSnapshot::default()).is_empty());
        assert!(path_dirs(&EnvSnapshot::default()).is_empty());
    }
}
