//! Files a builtin creator pulls from the host interpreter into the new
//! environment, and how each one may be materialized.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::fs::{copy, ensure_dir, fs_is_case_sensitive, fs_supports_symlink, hardlink, make_exe, safe_delete, symlink};

/// Which method a reference insists on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefMust {
    Any,
    Copy,
    Symlink,
}

/// Which creation mode a reference takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefWhen {
    Any,
    Copy,
    Symlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Method {
    Symlink,
    Copy,
}

#[derive(Debug, Clone)]
enum Target {
    Paths(Vec<PathBuf>),
    Exe { bin_dir: PathBuf, names: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct Ref {
    src: PathBuf,
    target: Target,
    must: RefMust,
    when: RefWhen,
}

impl Ref {
    pub fn path(src: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self::path_to_many(src, vec![dest.into()])
    }

    pub fn path_to_many(src: impl Into<PathBuf>, dests: Vec<PathBuf>) -> Self {
        Self {
            src: src.into(),
            target: Target::Paths(dests),
            must: RefMust::Any,
            when: RefWhen::Any,
        }
    }

    /// An executable placed in `bin_dir` under the first name, with the
    /// remaining names as aliases of it.
    pub fn exe<I, S>(src: impl Into<PathBuf>, bin_dir: impl Into<PathBuf>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = dedupe_names(names.into_iter().map(Into::into), fs_is_case_sensitive());
        Self {
            src: src.into(),
            target: Target::Exe {
                bin_dir: bin_dir.into(),
                names,
            },
            must: RefMust::Any,
            when: RefWhen::Any,
        }
    }

    #[must_use]
    pub fn must(mut self, must: RefMust) -> Self {
        self.must = must;
        self
    }

    #[must_use]
    pub fn when(mut self, when: RefWhen) -> Self {
        self.when = when;
        self
    }

    pub fn src(&self) -> &Path {
        &self.src
    }

    pub fn requirement(&self) -> RefMust {
        self.must
    }

    pub fn exists(&self) -> bool {
        self.src.exists()
    }

    /// Names this reference creates inside `bin_dir`; empty for plain paths.
    pub fn exe_names(&self) -> &[String] {
        match &self.target {
            Target::Exe { names, .. } => names,
            Target::Paths(_) => &[],
        }
    }

    /// Where each name lands.
    pub fn destinations(&self) -> Vec<PathBuf> {
        match &self.target {
            Target::Paths(dests) => dests.clone(),
            Target::Exe { bin_dir, names } => names.iter().map(|name| bin_dir.join(name)).collect(),
        }
    }

    fn can_read(&self) -> bool {
        if self.src.is_dir() {
            fs::read_dir(&self.src).is_ok()
        } else {
            fs::File::open(&self.src).is_ok()
        }
    }

    pub fn can_copy(&self) -> bool {
        self.must != RefMust::Symlink && self.can_read()
    }

    pub fn can_symlink(&self) -> bool {
        self.must != RefMust::Copy && fs_supports_symlink() && self.can_read()
    }

    pub fn applies(&self, symlinks: bool) -> bool {
        match self.when {
            RefWhen::Any => true,
            RefWhen::Copy => !symlinks,
            RefWhen::Symlink => symlinks,
        }
    }

    pub fn method(&self, symlinks: bool) -> Method {
        match self.must {
            RefMust::Symlink => Method::Symlink,
            RefMust::Copy => Method::Copy,
            RefMust::Any if symlinks && self.can_symlink() => Method::Symlink,
            RefMust::Any => Method::Copy,
        }
    }

    pub fn run(&self, symlinks: bool) -> Result<()> {
        let method = self.method(symlinks);
        match &self.target {
            Target::Paths(dests) => {
                for dest in dests {
                    place(method, &self.src, dest)?;
                }
                Ok(())
            }
            Target::Exe { bin_dir, names } => {
                let Some((base, aliases)) = names.split_first() else {
                    return Ok(());
                };
                let primary = bin_dir.join(base);
                place(method, &self.src, &primary)?;
                if method == Method::Copy {
                    make_exe(&primary)?;
                }
                for alias in aliases {
                    let link = bin_dir.join(alias);
                    safe_delete(&link)?;
                    match method {
                        Method::Symlink => symlink(Path::new(base), &link)?,
                        Method::Copy => {
                            if hardlink(&primary, &link).is_err() {
                                copy(&primary, &link)?;
                            }
                            make_exe(&link)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn place(method: Method, src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    safe_delete(dest)?;
    match method {
        Method::Symlink => symlink(src, dest),
        Method::Copy => copy(src, dest),
    }
}

/// Keep the first spelling of every name; on case-insensitive filesystems
/// `Python` and `python` are the same file.
fn dedupe_names(names: impl Iterator<Item = String>, case_sensitive: bool) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .filter(|name| !name.is_empty())
        .filter(|name| {
            let key = if case_sensitive {
                name.clone()
            } else {
                name.to_lowercase()
            };
            seen.insert(key)
        })
        .collect()
}

/// What a set of references allows for a given interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefMeta {
    pub can_copy: bool,
    pub can_symlink: bool,
    pub missing: Vec<PathBuf>,
}

impl RefMeta {
    pub fn of(refs: &[Ref]) -> Self {
        let mut meta = Self {
            can_copy: true,
            can_symlink: true,
            missing: Vec::new(),
        };
        for reference in refs {
            if !reference.exists() {
                meta.missing.push(reference.src.clone());
                continue;
            }
            meta.can_copy &= reference.can_copy();
            meta.can_symlink &= reference.can_symlink();
        }
        meta
    }

    pub fn usable(&self) -> bool {
        self.missing.is_empty() && (self.can_copy || self.can_symlink)
    }
}
