//! ViewForge CLI - build and inspect the view cache
//!
//! Commands: build, clear, render, check, list
//! Outputs JSON to stdout, logs to stderr (`RUST_LOG`)
//! Returns 2 on template failures, 1 on usage or configuration errors

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use viewforge_core::{CacheMode, Linter, ViewCache, ViewConfig, ViewError};

#[derive(Parser)]
#[command(name = "viewforge-cli")]
#[command(about = "ViewForge CLI - View Template Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Views directory (overrides config)
    #[arg(long)]
    views: Option<PathBuf>,

    /// Cache directory (overrides config)
    #[arg(long)]
    cache: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every view, inline includes and write the manifest
    Build,

    /// Delete all cached artifacts and the manifest
    Clear,

    /// Render a view
    Render {
        /// View name, e.g. `partials/nav`
        name: String,

        /// JSON object of view parameters
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Render from the static (inlined) tier
        #[arg(long = "static")]
        use_static: bool,
    },

    /// Lint every view
    Check,

    /// List views and their cached artifacts
    List,
}

fn emit(value: Value) {
    println!("{:#}", value);
}

fn failure(e: &ViewError) -> ExitCode {
    emit(json!({ "success": false, "error": e.to_string() }));
    match e {
        ViewError::Storage(_) | ViewError::Serialization(_) => ExitCode::FAILURE,
        _ => ExitCode::from(2),
    }
}

fn load_config(cli: &Cli) -> Result<ViewConfig, viewforge_core::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => ViewConfig::load_from(path)?,
        None => ViewConfig::default(),
    };
    if let Some(views) = &cli.views {
        config.views_root = views.clone();
    }
    if let Some(cache) = &cli.cache {
        config.cache_root = cache.clone();
    }
    Ok(config)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            emit(json!({ "success": false, "error": e.to_string() }));
            return ExitCode::FAILURE;
        }
    };

    let mut cache = ViewCache::from_config(&config);

    match cli.command {
        Commands::Build => match cache.create_caches() {
            Ok(manifest) => {
                emit(json!({ "success": true, "manifest": manifest }));
                ExitCode::SUCCESS
            }
            Err(e) => failure(&e),
        },

        Commands::Clear => match cache.clear() {
            Ok(removed) => {
                emit(json!({ "success": true, "removed": removed }));
                ExitCode::SUCCESS
            }
            Err(e) => failure(&e),
        },

        Commands::Render { name, params, use_static } => {
            let params: Map<String, Value> = match serde_json::from_str(&params) {
                Ok(p) => p,
                Err(e) => {
                    emit(json!({ "success": false, "error": format!("Invalid params: {}", e) }));
                    return ExitCode::FAILURE;
                }
            };
            if use_static {
                cache = cache.with_mode(CacheMode::Static);
            }
            match cache.render(&name, params) {
                Ok(output) => {
                    emit(json!({ "success": true, "view": name, "output": output }));
                    ExitCode::SUCCESS
                }
                Err(e) => failure(&e),
            }
        }

        Commands::Check => {
            let names = match cache.view_names() {
                Ok(n) => n,
                Err(e) => return failure(&e),
            };
            let known: BTreeSet<String> = names.iter().cloned().collect();
            let linter = Linter::new();
            let mut reports = vec![];
            for name in &names {
                match cache.source(name) {
                    Ok(source) => reports.push(linter.lint(name, &source, &known)),
                    Err(e) => return failure(&e),
                }
            }
            let valid = reports.iter().all(|r| r.valid);
            emit(json!({ "valid": valid, "reports": reports }));
            if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }

        Commands::List => {
            let names = match cache.view_names() {
                Ok(n) => n,
                Err(e) => return failure(&e),
            };
            let manifest = cache.manifest().cloned();
            let views: Vec<_> = names
                .iter()
                .map(|name| {
                    json!({
                        "name": name,
                        "compiled": manifest.as_ref().and_then(|m| m.list.get(name)),
                        "static": manifest.as_ref().and_then(|m| m.static_list.get(name)),
                    })
                })
                .collect();
            emit(json!({
                "views": views,
                "created_at": manifest.as_ref().map(|m| m.created_at),
            }));
            ExitCode::SUCCESS
        }
    }
}
