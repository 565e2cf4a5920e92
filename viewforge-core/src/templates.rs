//! Template sources
//!
//! Views are addressed by logical name: the path below the views root with
//! `/` separators and no extension (`partials/nav`). `partials.nav` is
//! accepted as an alias.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::store::StorageError;

/// Where template source text comes from.
pub trait TemplateSource {
    /// Source of `name`, or `None` if no such view exists.
    fn read(&self, name: &str) -> Result<Option<String>, StorageError>;

    /// Every view name, sorted.
    fn names(&self) -> Result<Vec<String>, StorageError>;
}

/// Canonical form of a view name, or `None` if it could escape the root.
pub fn normalize_name(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() || name.starts_with('/') || name.contains('\\') {
        return None;
    }
    let slashed = if name.contains('/') { name.to_string() } else { name.replace('.', "/") };
    let parts: Vec<&str> = slashed.split('/').collect();
    if parts.iter().any(|p| p.is_empty() || *p == "." || *p == "..") {
        return None;
    }
    Some(parts.join("/"))
}

/// Templates read from disk on demand.
#[derive(Debug, Clone)]
pub struct ViewsDir {
    root: PathBuf,
    extension: String,
}

impl ViewsDir {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        let name = normalize_name(name)?;
        Some(self.root.join(format!("{}.{}", name, self.extension)))
    }
}

impl TemplateSource for ViewsDir {
    fn read(&self, name: &str) -> Result<Option<String>, StorageError> {
        let Some(path) = self.path_of(name) else {
            return Ok(None);
        };
        match fs::read_to_string(&path) {
            Ok(source) => Ok(Some(source)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::new(path, e)),
        }
    }

    /// Symbolic links are not followed, so a link back up the tree cannot
    /// produce names that do not exist as files.
    fn names(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        if !self.root.is_dir() {
            return Ok(names);
        }
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                StorageError::new(path, io::Error::from(e))
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != self.extension.as_str()) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let stem = relative.with_extension("");
            let segments: Option<Vec<&str>> = stem.components().map(|c| c.as_os_str().to_str()).collect();
            if let Some(segments) = segments {
                names.push(segments.join("/"));
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Template registry - in-memory sources keyed by view name
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, String>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every template under `dir` into memory.
    pub fn load_from_dir(dir: &Path, extension: &str) -> Result<Self, StorageError> {
        let views = ViewsDir::new(dir, extension);
        let mut registry = Self::new();
        for name in views.names()? {
            if let Some(source) = views.read(&name)? {
                registry.templates.insert(name, source);
            }
        }
        Ok(registry)
    }

    /// Add or replace a view. Names that cannot be normalized are ignored.
    pub fn register(&mut self, name: &str, source: impl Into<String>) {
        if let Some(name) = normalize_name(name) {
            self.templates.insert(name, source.into());
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = normalize_name(name)?;
        self.templates.get(&name).map(String::as_str)
    }

    pub fn list(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }
}

impl TemplateSource for TemplateRegistry {
    fn read(&self, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get(name).map(str::to_string))
    }

    fn names(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.templates.keys().cloned().collect())
    }
}
