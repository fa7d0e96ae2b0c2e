use std::path::PathBuf;

use crate::config::EnvSnapshot;

pub const OVERRIDE_ENV: &str = "VIRTUALENV_OVERRIDE_APP_DATA";

/// Where the app data root comes from; `path` is `None` when the override
/// variable is set but empty, which disables the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDataLocation {
    pub path: Option<PathBuf>,
    pub source: &'static str,
}

pub fn resolve_default(env: &EnvSnapshot) -> AppDataLocation {
    if let Some(value) = env.var(OVERRIDE_ENV) {
        let path = (!value.trim().is_empty()).then(|| PathBuf::from(value));
        return AppDataLocation {
            path,
            source: OVERRIDE_ENV,
        };
    }
    let (base, source) = user_data_base(env);
    AppDataLocation {
        path: base.map(|base| base.join("virtualenv")),
        source,
    }
}

#[cfg(target_os = "windows")]
fn user_data_base(env: &EnvSnapshot) -> (Option<PathBuf>, &'static str) {
    if let Some(local) = env.var("LOCALAPPDATA").filter(|v| !v.is_empty()) {
        return (Some(PathBuf::from(local).join("pypa")), "LOCALAPPDATA");
    }
    (
        dirs_next::data_local_dir().map(|dir| dir.join("pypa")),
        "user data dir",
    )
}

#[cfg(target_os = "macos")]
fn user_data_base(_env: &EnvSnapshot) -> (Option<PathBuf>, &'static str) {
    (
        dirs_next::home_dir().map(|home| home.join("Library").join("Application Support")),
        "~/Library/Application Support",
    )
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn user_data_base(env: &EnvSnapshot) -> (Option<PathBuf>, &'static str) {
    if let Some(xdg) = env.var("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return (Some(PathBuf::from(xdg)), "XDG_DATA_HOME");
    }
    (
        dirs_next::home_dir().map(|home| home.join(".local").join("share")),
        "~/.local/share",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_takes_precedence() {
        let env = EnvSnapshot::from_pairs(&[(OVERRIDE_ENV, "/srv/cache"), ("XDG_DATA_HOME", "/x")]);
        let location = resolve_default(&env);
        assert_eq!(location.path, Some(PathBuf::from("/srv/cache")));
        assert_eq!(location.source, OVERRIDE_ENV);
    }

    #[test]
    fn empty_override_disables() {
        let env = EnvSnapshot::from_pairs(&[(OVERRIDE_ENV, "")]);
        assert_eq!(resolve_default(&env).path, None);
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    #[test]
    fn xdg_data_home_is_used() {
        let env = EnvSnapshot::from_pairs(&[("XDG_DATA_HOME", "/data")]);
        let location = resolve_default(&env);
        assert_eq!(location.path, Some(PathBuf::from("/data/virtualenv")));
        assert_eq!(location.source, "XDG_DATA_HOME");
    }
}
