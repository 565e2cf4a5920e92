//! Render cache storage
//!
//! Artifacts and the manifest are flat files under one cache root. The
//! filesystem store replaces files whole (write to a temporary sibling, then
//! rename), so a concurrent reader sees either the old or the new content.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::manifest::MANIFEST_FILE;

#[derive(Debug, Error)]
#[error("I/O error at {path}: {source}")]
pub struct StorageError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl StorageError {
    pub fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self { path: path.into(), source }
    }
}

/// Flat key/value storage for artifact files, keyed by file name.
pub trait ArtifactStore {
    fn exists(&self, file: &str) -> bool;

    /// Contents of `file`, or `None` if it does not exist.
    fn read(&self, file: &str) -> Result<Option<String>, StorageError>;

    fn write(&mut self, file: &str, contents: &str) -> Result<(), StorageError>;

    /// Remove every file. Returns the number of artifacts removed, not
    /// counting the manifest.
    fn clear(&mut self) -> Result<usize, StorageError>;

    /// Names of stored files, sorted.
    fn files(&self) -> Result<Vec<String>, StorageError>;
}

/// Store rooted at a cache directory, created on first write.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    /// Delete `files`, tolerating ones another process already removed.
    /// Returns how many artifacts this call deleted.
    fn remove_files(&self, files: &[String]) -> Result<usize, StorageError> {
        let mut removed = 0;
        for file in files {
            let path = self.path(file);
            match fs::remove_file(&path) {
                Ok(()) if file != MANIFEST_FILE => removed += 1,
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::new(&path, e)),
            }
        }
        Ok(removed)
    }
}

impl ArtifactStore for FsStore {
    fn exists(&self, file: &str) -> bool {
        self.path(file).is_file()
    }

    fn read(&self, file: &str) -> Result<Option<String>, StorageError> {
        let path = self.path(file);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::new(path, e)),
        }
    }

    fn write(&mut self, file: &str, contents: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).map_err(|e| StorageError::new(&self.root, e))?;
        let path = self.path(file);
        let tmp = self.path(&format!(".{}.{}.tmp", file, std::process::id()));
        fs::write(&tmp, contents).map_err(|e| StorageError::new(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StorageError::new(&path, e)
        })
    }

    fn clear(&mut self) -> Result<usize, StorageError> {
        let files = self.files()?;
        self.remove_files(&files)
    }

    fn files(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::new(&self.root, e)),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::new(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") && !name.starts_with('.') && entry.path().is_file() {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Store kept in memory; used by tests and short-lived tools.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&mut self, file: &str) -> Option<String> {
        self.files.remove(file)
    }
}

impl ArtifactStore for MemoryStore {
    fn exists(&self, file: &str) -> bool {
        self.files.contains_key(file)
    }

    fn read(&self, file: &str) -> Result<Option<String>, StorageError> {
        Ok(self.files.get(file).cloned())
    }

    fn write(&mut self, file: &str, contents: &str) -> Result<(), StorageError> {
        self.files.insert(file.to_string(), contents.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<usize, StorageError> {
        let removed = self.files.keys().filter(|f| f.as_str() != MANIFEST_FILE).count();
        self.files.clear();
        Ok(removed)
    }

    fn files(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.files.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_store_clear_skips_files_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::new(dir.path());
        store.write("a.json", "{}").unwrap();
        store.write("b.json", "{}").unwrap();
        store.write(MANIFEST_FILE, "{}").unwrap();

        let listed = store.files().unwrap();
        fs::remove_file(dir.path().join("a.json")).unwrap();
        assert_eq!(store.remove_files(&listed).unwrap(), 1);
        assert!(store.files().unwrap().is_empty());
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn test_fs_store_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::new(dir.path().join("cache"));
        assert!(!store.exists("a.json"));
        assert_eq!(store.read("a.json").unwrap(), None);

        store.write("a.json", "{}").unwrap();
        assert!(store.exists("a.json"));
        assert_eq!(store.read("a.json").unwrap().as_deref(), Some("{}"));

        store.write("a.json", "[]").unwrap();
        assert_eq!(store.read("a.json").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_fs_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::new(dir.path());
        store.write("b.json", "1").unwrap();
        store.write("a.json", "2").unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert_eq!(store.files().unwrap(), vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_fs_store_clear_excludes_manifest_from_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::new(dir.path());
        store.write("a.json", "1").unwrap();
        store.write("static_b.json", "2").unwrap();
        store.write(MANIFEST_FILE, "{}").unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.files().unwrap().is_empty());
    }

    #[test]
    fn test_fs_store_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsStore::new(dir.path().join("never-created"));
        assert!(store.files().unwrap().is_empty());
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::new();
        store.write("x.json", "x").unwrap();
        store.write(MANIFEST_FILE, "{}").unwrap();
        assert!(store.exists("x.json"));
        assert_eq!(store.remove("x.json").as_deref(), Some("x"));
        assert!(!store.exists("x.json"));
        assert_eq!(store.clear().unwrap(), 0);
    }
}
