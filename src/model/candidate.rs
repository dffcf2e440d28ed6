use std::{
    fmt,
    path::{Path, PathBuf},
};

/// A file eligible for selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    /// The suffix or MIME type that let this file through the [`TypeFilter`].
    /// `None` when discovery ran unfiltered.
    pub kind: Option<String>,
}

impl Candidate {
    /// Key under which this file's timestamp is stored.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Allow-list restricting which files count as candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeFilter {
    /// Lowercased suffixes, each starting with `.`.
    Suffixes(Vec<String>),
    /// Lowercased MIME types such as `image/jpeg`.
    MimeTypes(Vec<String>),
}

impl TypeFilter {
    /// Suffixes are matched case-insensitively. A missing leading `.` is added,
    /// so `jpg` and `.jpg` are the same filter.
    pub fn suffixes<S: AsRef<str>>(suffixes: impl IntoIterator<Item = S>) -> Self {
        let suffixes = suffixes
            .into_iter()
            .map(|s| {
                let s = s.as_ref().trim().to_lowercase();
                if s.starts_with('.') { s } else { format!(".{s}") }
            })
            .collect();

        Self::Suffixes(suffixes)
    }

    pub fn mime_types<S: AsRef<str>>(mime_types: impl IntoIterator<Item = S>) -> Self {
        Self::MimeTypes(
            mime_types
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .collect(),
        )
    }

    /// Returns the allow-list entry `path` matches, if any.
    pub fn classify(&self, path: &Path) -> Option<String> {
        match self {
            Self::Suffixes(suffixes) => {
                let name = path.file_name()?.to_string_lossy().to_lowercase();
                suffixes
                    .iter()
                    // A file named exactly `.jpg` has no suffix, it's a hidden file.
                    .find(|suffix| name.len() > suffix.len() && name.ends_with(suffix.as_str()))
                    .cloned()
            }
            Self::MimeTypes(allowed) => {
                let mime = guess_mime(path)?;
                allowed.iter().find(|m| **m == mime).cloned()
            }
        }
    }
}

/// Guesses the MIME type from the extension, falling back to the file's magic bytes.
fn guess_mime(path: &Path) -> Option<String> {
    if let Some(mime) = mime_guess::from_path(path).first_raw() {
        return Some(mime.to_lowercase());
    }

    match infer::get_from_path(path) {
        Ok(Some(kind)) => Some(kind.mime_type().to_lowercase()),
        Ok(None) => None,
        Err(err) => {
            tracing::debug!(?path, %err, "could not sniff file type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_are_normalized() {
        assert_eq!(
            TypeFilter::suffixes(["jpg", ".GIF", " .Png "]),
            TypeFilter::Suffixes(vec![".jpg".into(), ".gif".into(), ".png".into()])
        );
    }

    #[test]
    fn suffix_match_ignores_case() {
        let filter = TypeFilter::suffixes([".jpg"]);
        assert_eq!(filter.classify(Path::new("dir/A.JPG")).as_deref(), Some(".jpg"));
        assert_eq!(filter.classify(Path::new("dir/a.jpg")).as_deref(), Some(".jpg"));
        assert_eq!(filter.classify(Path::new("dir/a.jpeg")), None);
        assert_eq!(filter.classify(Path::new("dir/.jpg")), None);
    }

    #[test]
    fn compound_suffixes() {
        let filter = TypeFilter::suffixes([".tar.gz"]);
        assert!(filter.classify(Path::new("backup.TAR.GZ")).is_some());
        assert!(filter.classify(Path::new("backup.gz")).is_none());
    }

    #[test]
    fn mime_from_extension() {
        let filter = TypeFilter::mime_types(["image/jpeg", "Image/GIF"]);
        assert_eq!(
            filter.classify(Path::new("missing/a.jpg")).as_deref(),
            Some("image/jpeg")
        );
        assert_eq!(
            filter.classify(Path::new("missing/a.gif")).as_deref(),
            Some("image/gif")
        );
        assert_eq!(filter.classify(Path::new("missing/a.txt")), None);
        // No extension and nothing to sniff.
        assert_eq!(filter.classify(Path::new("missing/README")), None);
    }

    #[test]
    fn mime_from_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("no_extension");
        std::fs::write(&path, b"GIF89a\x01\x00\x01\x00").unwrap();

        let filter = TypeFilter::mime_types(["image/gif"]);
        assert_eq!(filter.classify(&path).as_deref(), Some("image/gif"));
    }
}
