//! File-backed store of the last time each file was picked.

use std::{
    fs,
    io::{ErrorKind, Write as _},
    path::{Path, PathBuf},
};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Error, IoContext as _, Result};

pub const DEFAULT_DB_PATH: &str = "file-timestamps-db.json";

const SCHEMA: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRecord {
    pub filename: String,
    pub timestamp: String,
}

/// On-disk layout of the backing file.
#[derive(Debug, Serialize, Deserialize)]
struct Document {
    schema: u32,
    records: Vec<TimestampRecord>,
}

#[derive(Debug, Default)]
struct Records {
    records: Vec<TimestampRecord>,
    // Position of each filename in `records`.
    index: FxHashMap<String, usize>,
}

impl Records {
    fn from_vec(records: Vec<TimestampRecord>) -> Self {
        let mut this = Self::default();
        for record in records {
            // Later duplicates win, so a hand-edited file still upholds one record per filename.
            this.upsert(record.filename, record.timestamp);
        }
        this
    }

    /// Returns the timestamp that was replaced, if any.
    fn upsert(&mut self, filename: String, timestamp: String) -> Option<String> {
        match self.index.get(&filename) {
            Some(&i) => Some(std::mem::replace(&mut self.records[i].timestamp, timestamp)),
            None => {
                self.index.insert(filename.clone(), self.records.len());
                self.records.push(TimestampRecord {
                    filename,
                    timestamp,
                });
                None
            }
        }
    }

    /// Undoes the last [`upsert`](Self::upsert) of `filename`.
    fn revert(&mut self, filename: &str, previous: Option<String>) {
        match (previous, self.index.get(filename)) {
            (Some(timestamp), Some(&i)) => self.records[i].timestamp = timestamp,
            (None, Some(_)) => {
                self.index.remove(filename);
                self.records.pop();
            }
            (_, None) => {}
        }
    }
}

/// Maps filenames to the last time they were picked.
///
/// The store is bound to its backing file on construction but touches the
/// filesystem only once [`initialize`](Self::initialize) is called. Every
/// [`store`](Self::store) rewrites the backing file before returning.
#[derive(Debug)]
pub struct TimestampStore {
    path: PathBuf,
    records: Option<Records>,
}

impl TimestampStore {
    pub fn new(path: Option<impl AsRef<Path>>) -> Self {
        let path = match path {
            Some(path) => path.as_ref().to_path_buf(),
            None => PathBuf::from(DEFAULT_DB_PATH),
        };

        Self {
            path,
            records: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the backing file, creating it when missing. Calling this on an
    /// already initialized store does nothing.
    pub fn initialize(&mut self) -> Result<()> {
        if self.records.is_some() {
            tracing::debug!(path = ?self.path, "timestamp store already initialized");
            return Ok(());
        }

        let _span = tracing::info_span!("initialize store", path = ?self.path).entered();

        let records = match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => {
                tracing::debug!("backing file is empty");
                Records::default()
            }
            Ok(content) => {
                let document: Document =
                    serde_json::from_str(&content).map_err(|source| Error::MalformedStore {
                        path: self.path.clone(),
                        source,
                    })?;

                if document.schema > SCHEMA {
                    return Err(Error::UnsupportedSchema {
                        path: self.path.clone(),
                        found: document.schema,
                        supported: SCHEMA,
                    });
                }

                tracing::debug!(count = document.records.len(), "read records");
                Records::from_vec(document.records)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::info!("no timestamp store found, creating a new one");
                let records = Records::default();
                persist(&self.path, &records.records)?;
                records
            }
            Err(err) => return Err(err).at(&self.path),
        };

        self.records = Some(records);
        Ok(())
    }

    /// Inserts or replaces the timestamp recorded for `filename`.
    ///
    /// If the backing file can't be written, the store is left as it was.
    pub fn store(&mut self, filename: &str, timestamp: &str) -> Result<()> {
        let records = self.records.as_mut().ok_or(Error::StoreNotInitialized)?;
        tracing::debug!(filename, timestamp, "storing timestamp");

        let previous = records.upsert(filename.to_owned(), timestamp.to_owned());
        persist(&self.path, &records.records).inspect_err(|err| {
            tracing::warn!(filename, %err, "could not write timestamp store, dropping update");
            records.revert(filename, previous);
        })
    }

    /// Replaces the backing file with an empty store.
    pub fn reset(&mut self) -> Result<()> {
        tracing::info!(path = ?self.path, "resetting timestamp store");

        let records = Records::default();
        persist(&self.path, &records.records)?;
        self.records = Some(records);
        Ok(())
    }

    pub fn lookup(&self, filename: &str) -> Result<Option<&TimestampRecord>> {
        let records = self.records.as_ref().ok_or(Error::StoreNotInitialized)?;
        Ok(records.index.get(filename).map(|&i| &records.records[i]))
    }

    pub fn dump_all(&self) -> Result<&[TimestampRecord]> {
        let records = self.records.as_ref().ok_or(Error::StoreNotInitialized)?;
        Ok(&records.records)
    }
}

/// Writes the whole collection next to `path` and renames it into place.
fn persist(path: &Path, records: &[TimestampRecord]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let document = Document {
        schema: SCHEMA,
        records: records.to_vec(),
    };
    let encoded = serde_json::to_vec_pretty(&document).map_err(|source| Error::MalformedStore {
        path: path.to_path_buf(),
        source,
    })?;

    let mut file = NamedTempFile::new_in(dir).at(dir)?;
    file.write_all(&encoded).at(file.path())?;
    file.as_file().sync_all().at(file.path())?;
    file.persist(path).map_err(|err| err.error).at(path)?;

    tracing::trace!(count = records.len(), "wrote timestamp store");
    Ok(())
}
