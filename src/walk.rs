//! Path selection under the watch root.
//!
//! [`PathFilter`] decides which files the vault tracks (include/exclude
//! globs matched against root-relative paths) and walks the tree for full
//! scans.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::{default_excludes, Config};

pub struct PathFilter {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
    /// Files the vault writes itself (the database and its WAL/SHM files).
    own_files: Vec<String>,
}

impl PathFilter {
    pub fn from_config(config: &Config) -> Result<Self> {
        let root = absolutize(&config.watch.root)?;
        if !root.is_dir() {
            bail!("watch root does not exist: {}", root.display());
        }
        // Watch events carry canonical paths.
        let root = std::fs::canonicalize(&root)?;

        let mut excludes = default_excludes();
        excludes.extend(config.watch.exclude_globs.clone());

        let db_path = absolutize(&config.db.path)?;
        let db_path = match (db_path.parent(), db_path.file_name()) {
            (Some(parent), Some(name)) => std::fs::canonicalize(parent)
                .map(|p| p.join(name))
                .unwrap_or_else(|_| db_path.clone()),
            _ => db_path.clone(),
        };
        Ok(Self {
            root,
            include: build_globset(&config.watch.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.watch.follow_symlinks,
            own_files: vec![db_path.to_string_lossy().into_owned()],
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root-relative form of `path`, or `None` if it lies outside the root.
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }

    /// Whether a file at `path` should be tracked.
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(relative) = self.relative(path) else {
            return false;
        };
        let full = path.to_string_lossy();
        if self.own_files.iter().any(|own| full.starts_with(own.as_str())) {
            return false;
        }
        let rel_str = relative.to_string_lossy();
        !self.exclude.is_match(rel_str.as_ref()) && self.include.is_match(rel_str.as_ref())
    }

    /// Every accepted file under the root, sorted.
    pub fn walk(&self) -> Vec<PathBuf> {
        self.walk_from(&self.root)
    }

    /// Every accepted file under `dir`, sorted. Unreadable entries are
    /// logged and skipped.
    pub fn walk_from(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(self.follow_symlinks) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable path during scan");
                    continue;
                }
            };
            if entry.file_type().is_file() && self.accepts(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        files
    }
}

/// Make `path` absolute and lexically normalized without touching the
/// filesystem (the file may already be gone).
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// Seconds since the epoch, or 0 for times before it or unavailable.
pub fn unix_secs(time: std::io::Result<SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
