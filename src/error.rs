use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("path does not exist: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("timestamp store used before it was initialized")]
    StoreNotInitialized,

    #[error("destination {} already exists and is not a directory", .0.display())]
    DestinationConflict(PathBuf),

    #[error("malformed timestamp store at {}: {source}", .path.display())]
    MalformedStore {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("timestamp store at {} has schema {found}, expected at most {supported}", .path.display())]
    UnsupportedSchema {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Attaches the offending path to an [`io::Error`].
pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
