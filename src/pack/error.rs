//! Error types for archive packing.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while writing a CBZ container.
///
/// Every I/O-backed variant carries the path it was working on and the
/// underlying cause.
#[derive(Debug, Error)]
pub enum PackError {
    /// The file collection was empty.
    #[error("nothing to pack")]
    NothingToPack,

    /// The chapter grouping was empty.
    #[error("no chapters to pack")]
    NoChapters,

    /// The destination already exists and was left untouched.
    #[error("{} already exists", path.display())]
    AlreadyExists {
        /// The existing destination.
        path: PathBuf,
    },

    /// The destination directory could not be created.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The destination file could not be created.
    #[error("failed to create file {}: {source}", path.display())]
    CreateFile {
        /// File that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A zip entry could not be started.
    #[error("failed to create entry {entry} in {}: {source}", path.display())]
    CreateEntry {
        /// Container being written.
        path: PathBuf,
        /// Entry name, e.g. `001.jpg`.
        entry: String,
        /// Underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// Page data could not be written into an entry.
    #[error("failed to write data for {entry} in {}: {source}", path.display())]
    Write {
        /// Container being written.
        path: PathBuf,
        /// Entry name, e.g. `001.jpg`.
        entry: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The zip central directory could not be written.
    #[error("failed to finish archive {}: {source}", path.display())]
    Finish {
        /// Container being written.
        path: PathBuf,
        /// Underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// One group of a multi-container write failed.
    #[error("failed to archive chapter {key}: {source}")]
    Group {
        /// Key of the failing group.
        key: String,
        /// What went wrong for that group.
        #[source]
        source: Box<PackError>,
    },
}

impl PackError {
    /// Returns true if the destination already existed.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::Group { source, .. } => source.is_already_exists(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_identifiable() {
        assert_eq!(PackError::NothingToPack.to_string(), "nothing to pack");

        let exists = PackError::AlreadyExists {
            path: PathBuf::from("/tmp/out.cbz"),
        };
        assert!(exists.to_string().ends_with("already exists"));
        assert!(exists.is_already_exists());
    }

    #[test]
    fn test_group_error_names_key_and_keeps_cause() {
        let error = PackError::Group {
            key: "12".to_string(),
            source: Box::new(PackError::AlreadyExists {
                path: PathBuf::from("x.cbz"),
            }),
        };
        assert!(error.to_string().contains("chapter 12"));
        assert!(error.is_already_exists());
    }
}
