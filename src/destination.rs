//! Preparing the destination folder and copying picked files into it.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Error, IoContext as _, Result};

/// What to do with a destination folder that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Move the existing files into a new temporary folder.
    #[default]
    MoveAside,
    /// Delete the existing files.
    Delete,
    /// Keep the existing files and add the new ones next to them.
    Append,
}

impl ConflictPolicy {
    pub fn to_str(self) -> &'static str {
        match self {
            Self::MoveAside => "move-aside",
            Self::Delete => "delete",
            Self::Append => "append",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// How [`prepare`] left the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    Created,
    Cleared { removed: usize },
    MovedAside { backup: PathBuf, moved: usize },
    Appending,
}

/// Makes sure `destination` is a directory ready to receive files.
///
/// An existing destination is never merged into silently: `policy` decides
/// whether its files are moved aside, deleted, or explicitly appended to.
pub fn prepare(destination: &Path, policy: ConflictPolicy) -> Result<Prepared> {
    let _span = tracing::info_span!("preparing destination", ?destination, %policy).entered();

    let prepared = match fs::metadata(destination) {
        Ok(meta) if !meta.is_dir() => {
            return Err(Error::DestinationConflict(destination.to_path_buf()));
        }
        Ok(_) => {
            tracing::info!("destination already exists");
            match policy {
                ConflictPolicy::Delete => Prepared::Cleared {
                    removed: clear(destination)?,
                },
                ConflictPolicy::MoveAside => {
                    let backup = tempfile::Builder::new()
                        .prefix("pick-files-")
                        .tempdir()
                        .at(std::env::temp_dir())?
                        .keep();
                    let moved = move_files(destination, &backup)?;
                    Prepared::MovedAside { backup, moved }
                }
                ConflictPolicy::Append => Prepared::Appending,
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(destination).at(destination)?;
            Prepared::Created
        }
        Err(err) => return Err(err).at(destination),
    };

    make_permissive(destination)?;
    tracing::debug!(?prepared);

    Ok(prepared)
}

#[cfg(unix)]
fn make_permissive(destination: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    fs::set_permissions(destination, fs::Permissions::from_mode(0o777)).at(destination)
}

#[cfg(not(unix))]
fn make_permissive(_destination: &Path) -> Result<()> {
    Ok(())
}

fn files_below(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(io::Error::from).at(dir)?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Removes every file below `dir`, leaving the directories in place.
fn clear(dir: &Path) -> Result<usize> {
    let files = files_below(dir)?;
    for file in &files {
        tracing::debug!(?file, "removing");
        fs::remove_file(file).at(file)?;
    }

    tracing::info!(count = files.len(), "deleted existing files");
    Ok(files.len())
}

/// Moves every file below `from` into `to`, keeping their relative layout.
fn move_files(from: &Path, to: &Path) -> Result<usize> {
    let files = files_below(from)?;
    for file in &files {
        let relative = file.strip_prefix(from).unwrap_or(file);
        let target = to.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }

        tracing::debug!(?file, ?target, "moving aside");
        if fs::rename(file, &target).is_err() {
            // Probably crossing filesystems.
            fs::copy(file, &target).at(file)?;
            fs::remove_file(file).at(file)?;
        }
    }

    tracing::info!(count = files.len(), backup = ?to, "moved existing files aside");
    Ok(files.len())
}

/// Copies `source` into `destination` under its own file name. If that name
/// is taken, `stem-1.ext`, `stem-2.ext`, ... are tried in turn.
pub fn copy_into(destination: &Path, source: &Path) -> Result<PathBuf> {
    let name = source.file_name().ok_or_else(|| Error::Io {
        path: source.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
    })?;

    let mut reader = fs::File::open(source).at(source)?;

    for counter in 0..=usize::MAX {
        let target = match counter {
            0 => destination.join(name),
            n => destination.join(numbered(Path::new(name), n)),
        };

        let mut writer = match fs::File::options()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(?target, "file name collision");
                continue;
            }
            Err(err) => return Err(err).at(&target),
        };

        let bytes = match io::copy(&mut reader, &mut writer) {
            Ok(bytes) => bytes,
            Err(err) => {
                drop(writer);
                if let Err(remove_err) = fs::remove_file(&target) {
                    tracing::warn!(?target, %remove_err, "could not remove partial copy");
                }
                return Err(err).at(source);
            }
        };

        tracing::debug!(?source, ?target, bytes, "copied");
        return Ok(target);
    }

    Err(Error::Io {
        path: destination.join(name),
        source: io::Error::new(io::ErrorKind::AlreadyExists, "no free file name left"),
    })
}

/// `photo.jpg` with `n = 2` becomes `photo-2.jpg`.
fn numbered(name: &Path, n: usize) -> String {
    let stem = name.file_stem().unwrap_or(name.as_os_str()).to_string_lossy();
    match name.extension() {
        Some(ext) => format!("{stem}-{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{n}"),
    }
}
