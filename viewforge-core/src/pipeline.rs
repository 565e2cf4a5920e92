//! View Cache - Single Entry Point
//!
//! Every render goes through [`ViewCache`]: source lookup, content-hash keyed
//! compilation, the static tier and the manifest rebuild all happen here.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compiler::{compile_source, CompileError};
use crate::config::{CacheMode, ViewConfig};
use crate::hashing::{canonical_json, content_hash};
use crate::helpers::{StaticHelpers, ViewHelpers};
use crate::inline::{inline_views, InlineError};
use crate::ir::{compiled_file_name, parse_artifact, static_file_name, Artifact};
use crate::manifest::Manifest;
use crate::render::{Context, IncludeResolver, RenderError, Renderer};
use crate::store::{ArtifactStore, FsStore, StorageError};
use crate::templates::{normalize_name, TemplateSource, ViewsDir};

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Compilation error: {0}")]
    Compile(#[from] CompileError),

    #[error("Failed to render view `{view}`: {source}")]
    Render {
        view: String,
        #[source]
        source: RenderError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Inlining error: {0}")]
    Inline(#[from] InlineError),

    #[error("Static artifact for view `{0}` is still missing after rebuilding the cache")]
    ArtifactMissing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A compiled view as stored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub name: String,
    pub hash: String,
    pub file: String,
    pub artifact: Artifact,
}

pub struct ViewCache {
    sources: Box<dyn TemplateSource>,
    store: Box<dyn ArtifactStore>,
    helpers: Rc<dyn ViewHelpers>,
    mode: CacheMode,
    manifest: Option<Manifest>,
    compilations: u64,
}

impl ViewCache {
    pub fn new(sources: impl TemplateSource + 'static, store: impl ArtifactStore + 'static) -> Self {
        Self {
            sources: Box::new(sources),
            store: Box::new(store),
            helpers: Rc::new(StaticHelpers::default()),
            mode: CacheMode::default(),
            manifest: None,
            compilations: 0,
        }
    }

    /// Views, cache directory, mode and helpers as configured.
    pub fn from_config(config: &ViewConfig) -> Self {
        Self::new(
            ViewsDir::new(&config.views_root, &config.extension),
            FsStore::new(&config.cache_root),
        )
        .with_mode(config.mode)
        .with_helpers(StaticHelpers::from_config(config))
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_helpers(mut self, helpers: impl ViewHelpers + 'static) -> Self {
        self.set_helpers(helpers);
        self
    }

    /// Replace the helpers, e.g. with per-request old input and messages.
    pub fn set_helpers(&mut self, helpers: impl ViewHelpers + 'static) {
        self.helpers = Rc::new(helpers);
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Number of template compilations this cache has performed.
    pub fn compilations(&self) -> u64 {
        self.compilations
    }

    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    /// The current manifest, loaded from the store on first use.
    pub fn manifest(&mut self) -> Option<&Manifest> {
        if self.manifest.is_none() {
            self.manifest = Manifest::load(self.store.as_ref());
        }
        self.manifest.as_ref()
    }

    pub fn view_names(&self) -> Result<Vec<String>, ViewError> {
        Ok(self.sources.names()?)
    }

    pub fn source(&self, name: &str) -> Result<String, ViewError> {
        let key = normalize_name(name).ok_or_else(|| ViewError::TemplateNotFound(name.to_string()))?;
        self.sources.read(&key)?.ok_or(ViewError::TemplateNotFound(key))
    }

    /// Compile `name`, reusing the stored artifact when its source is unchanged.
    pub fn compile(&mut self, name: &str) -> Result<ArtifactHandle, ViewError> {
        let key = normalize_name(name).ok_or_else(|| ViewError::TemplateNotFound(name.to_string()))?;
        let source = self.source(&key)?;
        let hash = content_hash(&source);
        let file = compiled_file_name(&hash);

        if let Some(json) = self.store.read(&file)? {
            match parse_artifact(&json) {
                Ok(artifact) => {
                    debug!(view = %key, hash = %hash, "compiled artifact cache hit");
                    return Ok(ArtifactHandle { name: key, hash, file, artifact });
                }
                Err(e) => warn!(file = %file, error = %e, "discarding unreadable compiled artifact"),
            }
        }

        let artifact = compile_source(&key, &source)?;
        self.compilations += 1;
        self.store.write(&file, &canonical_json(&artifact)?)?;
        info!(view = %key, hash = %hash, "compiled view");
        Ok(ArtifactHandle { name: key, hash, file, artifact })
    }

    /// Render `name` with `params` as its only variables.
    pub fn render(&mut self, name: &str, params: Map<String, Value>) -> Result<String, ViewError> {
        let artifact = self.resolve(name)?;
        let helpers = Rc::clone(&self.helpers);
        let mut renderer = Renderer::new(helpers.as_ref(), self);
        renderer
            .render(&artifact, Context::from_params(params))
            .map_err(|source| ViewError::Render { view: name.to_string(), source })
    }

    /// Delete every stored artifact and the manifest.
    pub fn clear(&mut self) -> Result<usize, ViewError> {
        let removed = self.store.clear()?;
        self.manifest = None;
        info!(removed, "cleared view cache");
        Ok(removed)
    }

    /// Compile every view, inline literal includes, and write the static
    /// artifacts and a fresh manifest.
    pub fn create_caches(&mut self) -> Result<Manifest, ViewError> {
        let started = Instant::now();
        let mut manifest = Manifest::new(Utc::now());
        let mut compiled = BTreeMap::new();

        for name in self.sources.names()? {
            if normalize_name(&name).as_deref() != Some(name.as_str()) {
                warn!(view = %name, "skipping view whose name cannot be addressed");
                continue;
            }
            let handle = self.compile(&name)?;
            manifest.list.insert(name.clone(), handle.file);
            compiled.insert(name, handle.artifact);
        }

        for (name, artifact) in inline_views(&compiled)? {
            let file = static_file_name(&artifact.hash);
            if !self.store.exists(&file) {
                self.store.write(&file, &canonical_json(&artifact)?)?;
            }
            manifest.static_list.insert(name, file);
        }

        manifest.exec_time = started.elapsed().as_secs_f64();
        manifest.save(self.store.as_mut())?;
        info!(views = manifest.list.len(), exec_time = manifest.exec_time, "built view cache");
        self.manifest = Some(manifest.clone());
        Ok(manifest)
    }

    fn resolve(&mut self, name: &str) -> Result<Artifact, ViewError> {
        match self.mode {
            CacheMode::Compiled => Ok(self.compile(name)?.artifact),
            CacheMode::Static => self.resolve_static(name),
        }
    }

    fn resolve_static(&mut self, name: &str) -> Result<Artifact, ViewError> {
        let key = normalize_name(name).ok_or_else(|| ViewError::TemplateNotFound(name.to_string()))?;
        if let Some(artifact) = self.lookup_static(&key)? {
            return Ok(artifact);
        }
        if self.sources.read(&key)?.is_none() {
            return Err(ViewError::TemplateNotFound(key));
        }

        info!(view = %key, "static artifact missing, rebuilding view cache");
        self.clear()?;
        self.create_caches()?;

        match self.lookup_static(&key)? {
            Some(artifact) => Ok(artifact),
            None if self.sources.read(&key)?.is_none() => Err(ViewError::TemplateNotFound(key)),
            None => Err(ViewError::ArtifactMissing(key)),
        }
    }

    fn lookup_static(&mut self, key: &str) -> Result<Option<Artifact>, ViewError> {
        let Some(file) = self.manifest().and_then(|m| m.static_list.get(key)).cloned() else {
            return Ok(None);
        };
        let Some(json) = self.store.read(&file)? else {
            return Ok(None);
        };
        match parse_artifact(&json) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(e) => {
                warn!(file = %file, error = %e, "discarding unreadable static artifact");
                Ok(None)
            }
        }
    }
}

impl IncludeResolver for ViewCache {
    fn resolve_include(&mut self, name: &str) -> Result<Artifact, ViewError> {
        self.resolve(name)
    }
}
