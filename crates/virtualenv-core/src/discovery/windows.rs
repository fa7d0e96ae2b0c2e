//! PEP 514 registrations: `Software\Python\<company>\<tag>` under
//! `HKEY_CURRENT_USER` then `HKEY_LOCAL_MACHINE` (both registry views).

use std::cmp::Reverse;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use virtualenv_domain::PythonSpec;

static TAG_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<major>\d+)(?:\.(?P<minor>\d+))?(?P<threaded>t)?(?:-(?P<arch>32|64))?")
        .expect("valid pattern")
});

/// One interpreter registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub company: String,
    pub tag: String,
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub architecture: Option<u32>,
    pub free_threaded: bool,
    pub exe: PathBuf,
}

impl RegistryEntry {
    /// Well known distributors of CPython map to `CPython`; otherwise the
    /// company name stands for the implementation.
    pub fn implementation(&self) -> &str {
        match self.company.as_str() {
            "PythonCore" | "ContinuumAnalytics" => "CPython",
            other => other,
        }
    }

    pub fn spec(&self) -> PythonSpec {
        PythonSpec {
            str_spec: self.tag.clone(),
            implementation: Some(self.implementation().to_string()),
            major: self.major,
            minor: self.minor,
            micro: None,
            architecture: self.architecture,
            machine: None,
            free_threaded: Some(self.free_threaded),
            path: None,
            version_specifier: None,
        }
    }
}

/// Version, threading and bitness from a tag such as `3.13t-32`, with
/// `SysVersion`/`SysArchitecture` values taking precedence when present.
pub fn parse_registration(
    company: &str,
    tag: &str,
    sys_version: Option<&str>,
    sys_architecture: Option<&str>,
    exe: PathBuf,
) -> RegistryEntry {
    let from_tag = TAG_VERSION.captures(tag);
    let (mut major, mut minor) = from_tag
        .as_ref()
        .map(|caps| {
            (
                caps.name("major").and_then(|m| m.as_str().parse().ok()),
                caps.name("minor").and_then(|m| m.as_str().parse().ok()),
            )
        })
        .unwrap_or((None, None));
    if let Some(caps) = sys_version.and_then(|v| TAG_VERSION.captures(v)) {
        major = caps.name("major").and_then(|m| m.as_str().parse().ok());
        minor = caps.name("minor").and_then(|m| m.as_str().parse().ok());
    }
    let mut architecture = from_tag
        .as_ref()
        .and_then(|caps| caps.name("arch"))
        .and_then(|m| m.as_str().parse().ok());
    if let Some(arch) = sys_architecture {
        architecture = match arch {
            "64bit" => Some(64),
            "32bit" => Some(32),
            _ => architecture,
        };
    }
    let free_threaded = from_tag
        .as_ref()
        .is_some_and(|caps| caps.name("threaded").is_some());
    RegistryEntry {
        company: company.to_string(),
        tag: tag.to_string(),
        major,
        minor,
        architecture,
        free_threaded,
        exe,
    }
}

/// Highest versions first; `PythonCore` wins ties.
pub fn sort_entries(entries: &mut [RegistryEntry]) {
    entries.sort_by_key(|entry| {
        Reverse((
            entry.major.map_or(-1, i64::from),
            entry.minor.map_or(-1, i64::from),
            entry.architecture.map_or(-1, i64::from),
            i64::from(entry.company == "PythonCore"),
        ))
    });
}

/// Registered executables whose metadata does not rule them out for `spec`.
/// Only CPython registrations are pre-filtered; others are always probed.
pub fn propose(spec: &PythonSpec) -> Vec<PathBuf> {
    let mut entries = discover_pythons();
    sort_entries(&mut entries);
    filter_entries(entries, spec)
}

fn filter_entries(entries: Vec<RegistryEntry>, spec: &PythonSpec) -> Vec<PathBuf> {
    entries
        .into_iter()
        .filter(|entry| entry.implementation() != "CPython" || entry.spec().satisfies(spec))
        .map(|entry| entry.exe)
        .collect()
}

#[cfg(not(windows))]
pub fn discover_pythons() -> Vec<RegistryEntry> {
    Vec::new()
}

#[cfg(windows)]
pub fn discover_pythons() -> Vec<RegistryEntry> {
    registry::discover()
}

#[cfg(windows)]
mod registry {
    use std::path::PathBuf;
    use std::ptr;

    use windows_sys::Win32::Foundation::{ERROR_SUCCESS, MAX_PATH};
    use windows_sys::Win32::System::Registry::{
        RegCloseKey, RegEnumKeyExW, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_CURRENT_USER,
        HKEY_LOCAL_MACHINE, KEY_READ, KEY_WOW64_32KEY, KEY_WOW64_64KEY, REG_SZ,
    };

    use super::{parse_registration, RegistryEntry};

    struct Key(HKEY);

    impl Drop for Key {
        fn drop(&mut self) {
            unsafe {
                RegCloseKey(self.0);
            }
        }
    }

    fn wide(text: &str) -> Vec<u16> {
        text.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn open(parent: HKEY, path: &str, flags: u32) -> Option<Key> {
        let name = wide(path);
        let mut handle: HKEY = ptr::null_mut();
        let status = unsafe { RegOpenKeyExW(parent, name.as_ptr(), 0, KEY_READ | flags, &mut handle) };
        (status == ERROR_SUCCESS).then_some(Key(handle))
    }

    fn subkeys(key: &Key) -> Vec<String> {
        let mut names = Vec::new();
        let mut index = 0;
        loop {
            let mut buffer = [0u16; MAX_PATH as usize];
            let mut len = buffer.len() as u32;
            let status = unsafe {
                RegEnumKeyExW(
                    key.0,
                    index,
                    buffer.as_mut_ptr(),
                    &mut len,
                    ptr::null(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            };
            if status != ERROR_SUCCESS {
                break;
            }
            names.push(String::from_utf16_lossy(&buffer[..len as usize]));
            index += 1;
        }
        names
    }

    fn string_value(key: &Key, name: Option<&str>) -> Option<String> {
        let name = name.map(wide);
        let name_ptr = name.as_ref().map_or(ptr::null(), |n| n.as_ptr());
        let mut kind = 0u32;
        let mut size = 0u32;
        let status = unsafe {
            RegQueryValueExW(key.0, name_ptr, ptr::null(), &mut kind, ptr::null_mut(), &mut size)
        };
        if status != ERROR_SUCCESS || kind != REG_SZ || size == 0 {
            return None;
        }
        let mut buffer = vec![0u16; (size as usize).div_ceil(2)];
        let status = unsafe {
            RegQueryValueExW(
                key.0,
                name_ptr,
                ptr::null(),
                &mut kind,
                buffer.as_mut_ptr().cast(),
                &mut size,
            )
        };
        if status != ERROR_SUCCESS {
            return None;
        }
        let text = String::from_utf16_lossy(&buffer);
        let text = text.trim_end_matches('\0').to_string();
        (!text.is_empty()).then_some(text)
    }

    pub(super) fn discover() -> Vec<RegistryEntry> {
        let mut found = Vec::new();
        let roots = [
            (HKEY_CURRENT_USER, 0),
            (HKEY_LOCAL_MACHINE, KEY_WOW64_64KEY),
            (HKEY_LOCAL_MACHINE, KEY_WOW64_32KEY),
        ];
        for (hive, flags) in roots {
            let Some(python) = open(hive, "Software\\Python", flags) else {
                continue;
            };
            for company in subkeys(&python) {
                if company == "PyLauncher" {
                    continue;
                }
                let Some(company_key) = open(python.0, &company, flags) else {
                    continue;
                };
                for tag in subkeys(&company_key) {
                    let Some(tag_key) = open(company_key.0, &tag, flags) else {
                        continue;
                    };
                    if let Some(entry) = load_tag(&company, &tag, &tag_key, flags) {
                        if !found.contains(&entry) {
                            found.push(entry);
                        }
                    }
                }
            }
        }
        found
    }

    fn load_tag(company: &str, tag: &str, key: &Key, flags: u32) -> Option<RegistryEntry> {
        let install = open(key.0, "InstallPath", flags)?;
        let exe = string_value(&install, Some("ExecutablePath"))
            .map(PathBuf::from)
            .or_else(|| string_value(&install, None).map(|dir| PathBuf::from(dir).join("python.exe")))?;
        if !exe.exists() {
            tracing::debug!(exe = %exe.display(), company, tag, "registered interpreter is missing");
            return None;
        }
        let version = string_value(key, Some("SysVersion"));
        let arch = string_value(key, Some("SysArchitecture"));
        Some(parse_registration(company, tag, version.as_deref(), arch.as_deref(), exe))
    }
}
