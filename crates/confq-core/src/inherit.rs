//! Inheritance resolver
//!
//! Resolves `$extends` and `$includes` markers by fetching parent documents
//! through the node pool and deep-merging them into the host, materializes
//! `$local` sub-documents as files inside the session directory, and
//! recurses into markers nested below the top level.

use std::collections::HashSet;
use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::loader;
use crate::path::{self, Path, Segment};
use crate::pool::{NodeEntry, NodePool};
use crate::value::Value;

/// Marker key listing parents the host overrides
pub const EXTENDS_KEY: &str = "$extends";
/// Marker key listing parents that override the host
pub const INCLUDES_KEY: &str = "$includes";
/// Marker key holding documents to materialize as local files
pub const LOCAL_KEY: &str = "$local";

/// The two inheritance flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InheritKind {
    Extends,
    Includes,
}

impl InheritKind {
    fn marker(&self) -> &'static str {
        match self {
            InheritKind::Extends => EXTENDS_KEY,
            InheritKind::Includes => INCLUDES_KEY,
        }
    }

    /// `$extends` lists most-specific parents first, so the list is
    /// reversed before the left-to-right merge; `$includes` merges as
    /// written.
    fn reverses_parent_order(&self) -> bool {
        matches!(self, InheritKind::Extends)
    }
}

/// Resolve one file: load it, apply inheritance at every level, and
/// materialize its `$local` documents.
///
/// A trailing `?` on `filename` marks the reference optional; a missing
/// optional file resolves to an empty document.
pub(crate) fn resolve_file(
    pool: &mut NodePool,
    base_dir: &str,
    filename: &str,
) -> Result<NodeEntry> {
    let (name, optional) = match filename.strip_suffix('?') {
        Some(name) => (name, true),
        None => (filename, false),
    };

    let (abs, file_dir) = match pool.resolve_path(name, base_dir) {
        Ok(found) => found,
        Err(e) if optional && matches!(e.kind, crate::error::ErrorKind::MissingFile { .. }) => {
            trace!("optional reference {} not found, using empty document", name);
            return Ok(NodeEntry::empty());
        }
        Err(e) => return Err(e),
    };

    let abs_str = abs.to_string_lossy().to_string();
    if pool.is_visited(&abs_str) {
        return Err(Error::cycle(abs_str));
    }
    pool.mark_visited(&abs_str);
    debug!("loading {}", abs_str);

    let (mut obj, module) = loader::load(&abs)?;
    let mut modules = Vec::new();
    modules.extend(module);

    obj = resolve_both(pool, &file_dir, obj, &mut modules)?;

    let local_dir = materialize_local(&mut obj, pool.session_dir())?;
    pool.enter(local_dir.clone());

    // Markers nested below the top level, outermost first
    let marker_paths = path::collect_paths(&obj, |p| {
        matches!(p.last(), Some(Segment::Key(k)) if k == EXTENDS_KEY || k == INCLUDES_KEY)
    });
    let mut seen: HashSet<Path> = HashSet::new();
    for marker_path in marker_paths {
        let host_path = marker_path
            .parent(1)
            .ok_or_else(|| Error::internal("marker path has no parent"))?;
        if !seen.insert(host_path.clone()) {
            continue;
        }
        let Some(sub) = host_path.lookup(&obj) else {
            continue;
        };
        if !sub.is_mapping() {
            continue;
        }
        let resolved = resolve_both(pool, &file_dir, sub.clone(), &mut modules)?;
        host_path.put(&mut obj, resolved)?;
    }

    pool.leave(local_dir.as_deref());
    Ok(NodeEntry::new(obj, modules))
}

/// Apply `$extends` then `$includes` to one object
fn resolve_both(
    pool: &mut NodePool,
    base_dir: &str,
    obj: Value,
    modules: &mut Vec<crate::engine::Module>,
) -> Result<Value> {
    let obj = resolve_inherits(pool, base_dir, obj, InheritKind::Extends, modules)?;
    resolve_inherits(pool, base_dir, obj, InheritKind::Includes, modules)
}

/// Apply one marker: fetch the listed parents, fold them left-to-right,
/// and merge host and parents according to the marker's precedence.
fn resolve_inherits(
    pool: &mut NodePool,
    base_dir: &str,
    mut obj: Value,
    kind: InheritKind,
    modules: &mut Vec<crate::engine::Module>,
) -> Result<Value> {
    let field = match obj.as_mapping_mut() {
        Some(m) => m.shift_remove(kind.marker()),
        None => None,
    };
    let Some(field) = field else {
        return Ok(obj);
    };

    let mut parents = parse_inherits_field(&field, kind)?;
    if kind.reverses_parent_order() {
        parents.reverse();
    }

    let mut merged: Option<Value> = None;
    for parent in &parents {
        let entry = pool.read(base_dir, parent)?;
        modules.extend(entry.modules);
        merged = Some(match merged {
            None => entry.obj,
            Some(acc) => acc.merged(&entry.obj),
        });
    }
    let Some(merged_parents) = merged else {
        return Ok(obj);
    };

    Ok(match kind {
        InheritKind::Extends => merged_parents.merged(&obj),
        InheritKind::Includes => obj.merged(&merged_parents),
    })
}

/// The marker field must be an array of strings
fn parse_inherits_field(field: &Value, kind: InheritKind) -> Result<Vec<String>> {
    let Some(items) = field.as_sequence() else {
        return Err(Error::shape(format!(
            "{} must be an array of strings, got {}",
            kind.marker(),
            field.type_name()
        )));
    };
    items
        .iter()
        .map(|item| {
            item.as_str().map(String::from).ok_or_else(|| {
                Error::shape(format!(
                    "{} array must contain only strings, got {}",
                    kind.marker(),
                    item.type_name()
                ))
            })
        })
        .collect()
}

static LOCAL_DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Materialize `$local` into files under a fresh directory inside the
/// session directory, removing the key from the host.
///
/// Returns the new directory, or None when there is nothing to materialize.
fn materialize_local(obj: &mut Value, session_dir: &FsPath) -> Result<Option<PathBuf>> {
    let local = match obj.as_mapping_mut() {
        Some(m) => m.shift_remove(LOCAL_KEY),
        None => None,
    };
    let local = match local {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };
    let Some(entries) = local.as_mapping() else {
        return Err(Error::shape(format!(
            "{} must be an object, got {}",
            LOCAL_KEY,
            local.type_name()
        )));
    };

    let dir = session_dir.join(format!(
        "localnodes-{}",
        LOCAL_DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir)?;
    debug!("materializing {} local documents in {}", entries.len(), dir.display());

    for (name, value) in entries {
        let rel = sanitize_relative_path(name)
            .map_err(|e| e.with_path(format!("{}.{}", LOCAL_KEY, name)))?;
        let target = dir.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = match value {
            Value::String(s) => s.clone(),
            other => {
                let mut pretty = serde_json::to_string_pretty(other)
                    .map_err(|e| Error::internal(e.to_string()))?;
                pretty.push('\n');
                pretty
            }
        };
        std::fs::write(&target, data)?;
    }

    Ok(Some(dir))
}

/// Validate a `$local` key as a safe relative path
fn sanitize_relative_path(name: &str) -> Result<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::shape("empty filename"));
    }
    if name.contains('\0') {
        return Err(Error::shape("NUL byte in filename"));
    }

    let mut out = PathBuf::new();
    for component in FsPath::new(name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::shape(format!(
                    "path traversal is not allowed: {}",
                    name
                )))
            }
            Component::RootDir => {
                return Err(Error::shape(format!(
                    "absolute paths are not allowed: {}",
                    name
                )))
            }
            Component::Prefix(_) => {
                return Err(Error::shape(format!(
                    "volume paths are not allowed: {}",
                    name
                )))
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(Error::shape(format!("invalid filename: {}", name)));
    }
    Ok(out)
}
