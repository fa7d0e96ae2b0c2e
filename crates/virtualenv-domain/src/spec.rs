//! Parsed interpreter requests (`python3.12`, `pypy3-64`, `>=3.11`, `/usr/bin/python3`).

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use pep440_rs::{Version, VersionSpecifiers};
use regex::Regex;

static PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<impl>[a-zA-Z]+)?(?P<version>[0-9.]+)?(?P<threaded>t)?(?:-(?P<arch>32|64))?(?:-(?P<machine>[a-zA-Z0-9_]+))?$",
    )
    .expect("valid spec pattern")
});

static SPECIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<impl>[A-Za-z]+)\s*)?(?P<spec>(?:===|==|~=|!=|<=|>=|<|>).+)$")
        .expect("valid specifier pattern")
});

/// A request for an interpreter. Every `None` field means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PythonSpec {
    pub str_spec: String,
    pub implementation: Option<String>,
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub micro: Option<u32>,
    pub architecture: Option<u32>,
    pub machine: Option<String>,
    pub free_threaded: Option<bool>,
    pub path: Option<String>,
    pub version_specifier: Option<String>,
}

impl PythonSpec {
    /// Parse a user supplied string. Anything that is not a recognizable
    /// version request is treated as a path (absolute or PATH-relative).
    pub fn from_string_spec(raw: &str) -> Self {
        let raw = raw.trim();
        let mut spec = PythonSpec {
            str_spec: raw.to_string(),
            ..PythonSpec::default()
        };
        if Path::new(raw).is_absolute() {
            spec.path = Some(raw.to_string());
            return spec;
        }
        if let Some(parsed) = Self::parse_version_form(raw) {
            return parsed;
        }
        if let Some(caps) = SPECIFIER_PATTERN.captures(raw) {
            let specifier = caps["spec"].trim();
            if VersionSpecifiers::from_str(specifier).is_ok() {
                spec.implementation = caps
                    .name("impl")
                    .map(|m| m.as_str())
                    .filter(|name| !is_generic_python(name))
                    .map(ToString::to_string);
                spec.version_specifier = Some(specifier.to_string());
                return spec;
            }
        }
        spec.path = Some(raw.to_string());
        spec
    }

    fn parse_version_form(raw: &str) -> Option<Self> {
        let caps = PATTERN.captures(raw)?;
        let mut spec = PythonSpec {
            str_spec: raw.to_string(),
            ..PythonSpec::default()
        };
        if let Some(version) = caps.name("version").map(|m| m.as_str()) {
            let parts = parse_version_parts(version)?;
            spec.major = parts.first().copied();
            spec.minor = parts.get(1).copied();
            spec.micro = parts.get(2).copied();
            spec.free_threaded = Some(caps.name("threaded").is_some());
        } else if caps.name("threaded").is_some() || caps.name("machine").is_some() {
            // without a version these are plain names such as `my-python`
            return None;
        }
        spec.implementation = caps
            .name("impl")
            .map(|m| m.as_str())
            .filter(|name| !is_generic_python(name))
            .map(ToString::to_string);
        spec.architecture = caps
            .name("arch")
            .and_then(|m| m.as_str().parse::<u32>().ok());
        spec.machine = caps.name("machine").map(|m| normalize_machine(m.as_str()));
        Some(spec)
    }

    pub fn is_abs(&self) -> bool {
        self.path
            .as_deref()
            .is_some_and(|path| Path::new(path).is_absolute())
    }

    /// Filename pattern used when scanning a PATH directory for candidates.
    pub fn generate_re(&self, windows: bool) -> Regex {
        let component = |value: Option<u32>| value.map_or_else(|| r"\d+".to_string(), |v| v.to_string());
        let version = format!(
            r"{}(\.{}(\.{})?)?",
            component(self.major),
            component(self.minor),
            component(self.micro)
        );
        let implementation = match self.implementation.as_deref() {
            None => "python".to_string(),
            Some(name) if is_generic_python(name) => "python".to_string(),
            Some(name) => format!("python|{}", regex::escape(name)),
        };
        let threaded = match self.free_threaded {
            Some(true) => "t",
            Some(false) => "",
            None => "t?",
        };
        let arch = self
            .architecture
            .map_or_else(|| "(-(32|64))?".to_string(), |bits| format!("(-{bits})?"));
        let version_conditional = if windows || self.major.is_none() { "?" } else { "" };
        let suffix = if windows { r"\.exe" } else { "" };
        let pattern = format!(
            r"(?i)^(?P<impl>{implementation})(?P<v>{version}{threaded}){version_conditional}{arch}{suffix}$"
        );
        Regex::new(&pattern).expect("generated pattern is valid")
    }

    /// True when `self` (usually describing a concrete interpreter) meets
    /// every constraint set in `request`.
    pub fn satisfies(&self, request: &PythonSpec) -> bool {
        if request.is_abs() && self.is_abs() && self.path != request.path {
            return false;
        }
        if let Some(wanted) = request.implementation.as_deref() {
            if !is_generic_python(wanted) {
                match self.implementation.as_deref() {
                    Some(ours) if ours.eq_ignore_ascii_case(wanted) => {}
                    Some(_) => return false,
                    None => {}
                }
            }
        }
        if request.architecture.is_some() && request.architecture != self.architecture {
            return false;
        }
        if let (Some(wanted), Some(ours)) = (request.machine.as_deref(), self.machine.as_deref()) {
            if normalize_machine(wanted) != normalize_machine(ours) {
                return false;
            }
        }
        if request.free_threaded.is_some()
            && self.free_threaded.is_some()
            && request.free_threaded != self.free_threaded
        {
            return false;
        }
        if !self.check_version_specifier(request) {
            return false;
        }
        let ours = [self.major, self.minor, self.micro];
        let wanted = [request.major, request.minor, request.micro];
        for (our, req) in ours.iter().zip(wanted.iter()) {
            if let (Some(our), Some(req)) = (our, req) {
                if our != req {
                    return false;
                }
            }
        }
        true
    }

    fn check_version_specifier(&self, request: &PythonSpec) -> bool {
        let Some(raw) = request.version_specifier.as_deref() else {
            return true;
        };
        let Ok(specifiers) = VersionSpecifiers::from_str(raw) else {
            return false;
        };
        let components: Vec<u32> = [self.major, self.minor, self.micro]
            .iter()
            .map_while(|part| *part)
            .collect();
        if components.is_empty() {
            return true;
        }
        let rendered = components
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        let Ok(version) = Version::from_str(&rendered) else {
            return false;
        };
        for item in specifiers.iter() {
            // a bound more precise than what we know cannot be decided, skip it
            if item.version().release().len() > components.len() {
                continue;
            }
            if !item.contains(&version) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for PythonSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::new();
        if let Some(value) = &self.implementation {
            fields.push(format!("implementation={value}"));
        }
        for (name, value) in [("major", self.major), ("minor", self.minor), ("micro", self.micro)] {
            if let Some(value) = value {
                fields.push(format!("{name}={value}"));
            }
        }
        if let Some(value) = self.architecture {
            fields.push(format!("architecture={value}"));
        }
        if let Some(value) = &self.machine {
            fields.push(format!("machine={value}"));
        }
        if let Some(value) = self.free_threaded {
            fields.push(format!("free_threaded={value}"));
        }
        if let Some(value) = &self.version_specifier {
            fields.push(format!("version_specifier={value}"));
        }
        if let Some(value) = &self.path {
            fields.push(format!("path={value}"));
        }
        write!(f, "PythonSpec({})", fields.join(", "))
    }
}

fn is_generic_python(name: &str) -> bool {
    name.eq_ignore_ascii_case("python") || name.eq_ignore_ascii_case("py")
}

fn parse_version_parts(version: &str) -> Option<Vec<u32>> {
    if version.contains('.') {
        let parts = version
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()?;
        if parts.is_empty() || parts.len() > 3 {
            return None;
        }
        Some(parts)
    } else if version.len() > 1 {
        // `312` is shorthand for 3.12
        let (major, minor) = version.split_at(1);
        Some(vec![major.parse().ok()?, minor.parse().ok()?])
    } else {
        Some(vec![version.parse().ok()?])
    }
}

/// Canonical ISA names, so `amd64` and `x86_64` compare equal.
pub fn normalize_machine(machine: &str) -> String {
    let lowered = machine.to_ascii_lowercase();
    match lowered.as_str() {
        "amd64" => "x86_64".to_string(),
        "aarch64" => "arm64".to_string(),
        _ => lowered,
    }
}
