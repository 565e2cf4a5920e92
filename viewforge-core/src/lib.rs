//! ViewForge Core - View Template Compiler and Render Cache
//!
//! # Ground Rules
//! 1. Content Hash Is Identity
//! 2. Artifacts Are Written Once
//! 3. Parentheses Always Balance
//! 4. Escaped Unless Asked Otherwise
//! 5. The Manifest Is Rebuilt, Never Patched

pub mod hashing;
pub mod expr;
pub mod lexer;
pub mod compiler;
pub mod ir;
pub mod value;
pub mod helpers;
pub mod render;
pub mod templates;
pub mod store;
pub mod manifest;
pub mod inline;
pub mod config;
pub mod validation;
pub mod pipeline;

pub use compiler::{compile_source, CompileError};
pub use config::{CacheMode, ConfigError, ViewConfig};
pub use hashing::{canonical_json, content_hash};
pub use helpers::{escape_html, StaticHelpers, ViewHelpers};
pub use ir::{Artifact, Node};
pub use lexer::extract_balanced;
pub use manifest::Manifest;
pub use pipeline::{ArtifactHandle, ViewCache, ViewError};
pub use render::{Context, IncludeResolver, RenderError, Renderer};
pub use store::{ArtifactStore, FsStore, MemoryStore, StorageError};
pub use templates::{TemplateRegistry, TemplateSource, ViewsDir};
pub use validation::{LintReport, LintViolation, Linter, ViolationSeverity};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
