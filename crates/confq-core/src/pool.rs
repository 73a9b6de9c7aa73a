//! Node pool
//!
//! Per-load bookkeeping for the inheritance resolver: a cache of resolved
//! documents keyed by `(base_dir, filename)`, a visited set of absolute
//! paths for cycle detection, a stack of transient `$local` directories,
//! and the search-path logic that locates referenced files.

use std::collections::{HashMap, HashSet};
use std::path::{Path as FsPath, PathBuf};

use log::{debug, trace};

use crate::engine::Module;
use crate::error::{Error, Result};
use crate::inherit;
use crate::value::Value;

/// Environment variable: colon-separated search directories consulted after
/// the input's directory and any transient `$local` directory
pub const ENV_SEARCH_PATH: &str = "JF_PATH";
/// Environment variable: base directory for session directories
pub const ENV_SESSION_DIR_BASE: &str = "JF_SESSION_DIR_BASE";

/// A resolved document plus the modules discovered while resolving it
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub obj: Value,
    pub modules: Vec<Module>,
}

impl NodeEntry {
    pub fn new(obj: Value, modules: Vec<Module>) -> Self {
        Self { obj, modules }
    }

    /// An empty document with no modules (optional reference fallback)
    pub fn empty() -> Self {
        Self {
            obj: Value::empty_mapping(),
            modules: vec![],
        }
    }
}

/// Search directories from `JF_PATH`, empty entries filtered out
pub fn search_paths_from_env() -> Vec<String> {
    std::env::var(ENV_SEARCH_PATH)
        .unwrap_or_default()
        .split(':')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// The per-load scratch directory in which `$local` documents materialize.
///
/// Removed recursively when dropped, on every exit path.
#[derive(Debug)]
pub struct SessionDir {
    dir: tempfile::TempDir,
}

impl SessionDir {
    /// Create a session directory under `base`, `JF_SESSION_DIR_BASE`, or
    /// the OS temp root, in that order of preference.
    pub fn create(base: Option<&FsPath>) -> Result<SessionDir> {
        let base = base
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(ENV_SESSION_DIR_BASE).map(PathBuf::from))
            .unwrap_or_else(std::env::temp_dir);
        let dir = tempfile::Builder::new()
            .prefix("confq-session-")
            .tempdir_in(&base)
            .map_err(|e| {
                Error::io(format!(
                    "failed to create session directory under {}: {}",
                    base.display(),
                    e
                ))
            })?;
        debug!("created session directory {}", dir.path().display());
        Ok(SessionDir { dir })
    }

    pub fn path(&self) -> &FsPath {
        self.dir.path()
    }
}

/// Cache, visitation, and search-directory state for one top-level load
pub struct NodePool {
    base_dir: String,
    session_dir: PathBuf,
    local_dirs: Vec<PathBuf>,
    external_dirs: Vec<String>,
    cache: HashMap<(String, String), NodeEntry>,
    visited: HashSet<String>,
}

impl NodePool {
    pub fn new(
        base_dir: impl Into<String>,
        session_dir: impl Into<PathBuf>,
        external_dirs: Vec<String>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            session_dir: session_dir.into(),
            local_dirs: Vec::new(),
            external_dirs,
            cache: HashMap::new(),
            visited: HashSet::new(),
        }
    }

    pub fn session_dir(&self) -> &FsPath {
        &self.session_dir
    }

    /// Fetch a document through the cache, resolving it on first access
    pub fn read(&mut self, base_dir: &str, filename: &str) -> Result<NodeEntry> {
        let key = (base_dir.to_string(), filename.to_string());
        if let Some(entry) = self.cache.get(&key) {
            trace!("cache hit for {:?}", key);
            return Ok(entry.clone());
        }
        debug!("resolving {} (base dir: '{}')", filename, base_dir);
        let entry = inherit::resolve_file(self, base_dir, filename)?;
        self.cache.insert(key, entry.clone());
        Ok(entry)
    }

    /// Locate `filename`, trying `base_dir` (when non-empty), the transient
    /// `$local` directories in push order, then the external search
    /// directories. Returns the file's absolute path and its directory.
    pub fn resolve_path(&self, filename: &str, base_dir: &str) -> Result<(PathBuf, String)> {
        if FsPath::new(filename).is_absolute() {
            let abs = PathBuf::from(filename);
            let dir = abs
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            return Ok((abs, dir));
        }

        let mut candidates: Vec<PathBuf> = Vec::new();
        if !base_dir.is_empty() {
            candidates.push(PathBuf::from(base_dir));
        }
        candidates.extend(self.local_dirs.iter().cloned());
        candidates.extend(self.external_dirs.iter().map(PathBuf::from));

        for dir in candidates {
            let full = dir.join(filename);
            if full.is_file() {
                let abs = full.canonicalize().unwrap_or(full);
                let dir = abs
                    .parent()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default();
                trace!("resolved {} -> {}", filename, abs.display());
                return Ok((abs, dir));
            }
        }

        Err(Error::missing_file(filename))
    }

    /// Whether an absolute path was already resolved on this load
    pub fn is_visited(&self, abs_path: &str) -> bool {
        self.visited.contains(abs_path)
    }

    pub fn mark_visited(&mut self, abs_path: &str) {
        self.visited.insert(abs_path.to_string());
    }

    /// Push a transient `$local` directory; None is a no-op
    pub fn enter(&mut self, dir: Option<PathBuf>) {
        if let Some(dir) = dir {
            trace!("entering local directory {}", dir.display());
            self.local_dirs.push(dir);
        }
    }

    /// Pop a transient `$local` directory; None is a no-op.
    ///
    /// Panics if `dir` is not on top of the stack: that is a bookkeeping bug,
    /// not a document error.
    pub fn leave(&mut self, dir: Option<&FsPath>) {
        if let Some(dir) = dir {
            match self.local_dirs.last() {
                Some(top) if top.as_path() == dir => {
                    self.local_dirs.pop();
                }
                other => panic!(
                    "left local directory {} but the stack top is {:?}",
                    dir.display(),
                    other
                ),
            }
        }
    }

    /// The current search order: base dir, locals oldest-first, externals;
    /// empty entries filtered out.
    pub fn search_paths(&self) -> Vec<String> {
        let mut paths = Vec::with_capacity(1 + self.local_dirs.len() + self.external_dirs.len());
        paths.push(self.base_dir.clone());
        paths.extend(
            self.local_dirs
                .iter()
                .map(|p| p.to_string_lossy().to_string()),
        );
        paths.extend(self.external_dirs.iter().cloned());
        paths.into_iter().filter(|p| !p.is_empty()).collect()
    }
}
