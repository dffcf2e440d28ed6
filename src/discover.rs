//! Recursive discovery of candidate files.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use rustc_hash::{FxHashMap, FxHashSet};
use walkdir::WalkDir;

use crate::{
    error::{Error, IoContext as _, Result},
    model::{Candidate, TypeFilter},
};

/// Lists every regular file under `roots` that passes `filter`.
///
/// All roots are checked up front, so a missing root fails the whole call
/// instead of silently shrinking the pool. Symlinks are followed; a link back
/// to one of its own ancestors is skipped. A file reachable more than once,
/// through overlapping roots or links, is listed once under the first path
/// it was found by.
pub fn enumerate(roots: &[impl AsRef<Path>], filter: Option<&TypeFilter>) -> Result<Vec<Candidate>> {
    for root in roots {
        let root = root.as_ref();
        match fs::metadata(root) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::PathNotFound(root.to_path_buf()));
            }
            Err(err) => return Err(err).at(root),
        }
    }

    let mut candidates = Vec::new();
    let mut seen = FxHashSet::default();
    let mut dropped = 0usize;
    let mut repeated = 0usize;

    for root in roots {
        let root = root.as_ref();
        let _span = tracing::info_span!("reading folder", ?root).entered();

        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if let Some(ancestor) = err.loop_ancestor() {
                        tracing::warn!(path = ?err.path(), ?ancestor, "skipping symlink loop");
                    } else {
                        tracing::warn!(%err, "skipping unreadable entry");
                    }
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                tracing::trace!(dir = ?entry.path(), "entering directory");
                continue;
            }

            if !entry.file_type().is_file() {
                tracing::trace!(path = ?entry.path(), "not a regular file");
                continue;
            }

            let identity = fs::canonicalize(entry.path()).unwrap_or_else(|err| {
                tracing::debug!(path = ?entry.path(), %err, "could not canonicalize");
                entry.path().to_path_buf()
            });
            if !seen.insert(identity) {
                tracing::trace!(file = ?entry.path(), "already listed");
                repeated += 1;
                continue;
            }

            let kind = match filter {
                Some(filter) => match filter.classify(entry.path()) {
                    Some(kind) => Some(kind),
                    None => {
                        tracing::trace!(file = ?entry.path(), "filtered out");
                        dropped += 1;
                        continue;
                    }
                },
                None => None,
            };

            tracing::trace!(file = ?entry.path(), ?kind);
            candidates.push(Candidate {
                path: entry.into_path(),
                kind,
            });
        }
    }

    warn_about_duplicate_names(&candidates);
    tracing::info!(found = candidates.len(), dropped, repeated, "discovered candidates");

    Ok(candidates)
}

/// Files sharing a name get renamed on copy, which is worth knowing about.
fn warn_about_duplicate_names(candidates: &[Candidate]) {
    let mut seen: FxHashMap<&std::ffi::OsStr, &PathBuf> = FxHashMap::default();
    for candidate in candidates {
        let Some(name) = candidate.path.file_name() else {
            continue;
        };

        if let Some(first) = seen.get(name) {
            tracing::warn!(
                ?name,
                path = ?candidate.path,
                first = ?first,
                "file name already seen"
            );
        } else {
            seen.insert(name, &candidate.path);
        }
    }
}
