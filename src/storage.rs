//! Server-side file storage.
//!
//! Provides a flat directory of uploaded files with:
//! - Filename validation (single path component, never a directory)
//! - Sorted listing of stored files
//! - Creation of the directory on first use
//!
//! Concurrent operations on the same filename are not ordered; a download
//! racing an upload may observe a partially written file.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Reasons a filename is refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    /// Empty string or NUL bytes
    Empty,
    /// Contains a separator or is `.`/`..`
    NotSingleComponent(String),
    /// Names an existing directory
    IsDirectory(String),
}

impl std::fmt::Display for FilenameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilenameError::Empty => write!(f, "Invalid filename: empty"),
            FilenameError::NotSingleComponent(name) | FilenameError::IsDirectory(name) => {
                write!(f, "Invalid filename {}.", name)
            }
        }
    }
}

impl std::error::Error for FilenameError {}

/// Check that `name` is exactly one normal path component.
pub fn check_component(name: &str) -> Result<(), FilenameError> {
    if name.is_empty() || name.contains('\0') {
        return Err(FilenameError::Empty);
    }
    let single = !name.contains(['/', '\\'])
        && Path::new(name).file_name() == Some(OsStr::new(name));
    if !single {
        return Err(FilenameError::NotSingleComponent(name.to_string()));
    }
    Ok(())
}

/// Resolve `name` inside `dir`, refusing separators and directories.
///
/// Blocking; suitable for local command validation.
pub fn validate_filename(dir: &Path, name: &str) -> Result<PathBuf, FilenameError> {
    check_component(name)?;
    let path = dir.join(name);
    if path.is_dir() {
        return Err(FilenameError::IsDirectory(name.to_string()));
    }
    Ok(path)
}

/// Flat directory holding uploaded files
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the storage directory, creating it if absent
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Arc<Self>> {
        let root = root.into();
        if !root.exists() {
            info!(directory = %root.display(), "Creating storage directory");
            std::fs::create_dir_all(&root)?;
        } else if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        info!(directory = %root.display(), "Initializing storage");
        Ok(Arc::new(Self { root }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for `name` inside storage, or why it is refused
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, FilenameError> {
        check_component(name)?;
        let path = self.root.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Err(FilenameError::IsDirectory(name.to_string())),
            _ => Ok(path),
        }
    }

    /// Names of stored regular files, sorted
    pub async fn list(&self) -> io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_component() {
        assert!(check_component("report.txt").is_ok());
        assert!(check_component(".hidden").is_ok());

        assert_eq!(check_component(""), Err(FilenameError::Empty));
        for bad in ["a/b", "/etc/passwd", "dir/", "..", ".", "a\\b", "../x"] {
            assert!(
                matches!(check_component(bad), Err(FilenameError::NotSingleComponent(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        assert_eq!(
            validate_filename(dir.path(), "sub"),
            Err(FilenameError::IsDirectory("sub".to_string()))
        );
        assert_eq!(
            validate_filename(dir.path(), "file.bin").unwrap(),
            dir.path().join("file.bin")
        );
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("SERVERFILES");

        let store = FileStore::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(store.root(), root);

        // Reopening an existing directory is fine
        FileStore::open(&root).unwrap();
    }

    #[test]
    fn test_open_rejects_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        std::fs::write(&path, b"x").unwrap();
        assert!(FileStore::open(&path).is_err());
    }

    #[tokio::test]
    async fn test_list_sorted_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(store.list().await.unwrap().is_empty());

        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_resolve() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.resolve("x").await.unwrap(), dir.path().join("x"));
        assert!(store.resolve("nested").await.is_err());
        assert!(store.resolve("../x").await.is_err());
    }
}
