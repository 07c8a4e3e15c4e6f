//! `[paths]` section configuration.
//!
//! Project layout paths, all relative to the project root (the directory
//! holding `lumo.toml`). Normalized to absolute paths during config load.
//!
//! # Example
//!
//! ```toml
//! [paths]
//! templates = "app/templates"       # Component sources
//! controllers = "app/controllers"   # Controller data files
//! static = "app/static"             # Static assets
//! output = "dist"                   # Build output (runtime bundles, worker)
//! routes = "app/routes.toml"        # Route table
//! ```

use crate::config::types::{ConfigDiagnostics, FieldPath};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project layout paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Component template tree (`{owner}/{action}.svelte`).
    pub templates: PathBuf,

    /// Controller data files (`{owner}.json`).
    pub controllers: PathBuf,

    /// Static files served as-is.
    #[serde(rename = "static")]
    pub static_dir: PathBuf,

    /// Build output directory (runtime bundles, compiler worker).
    pub output: PathBuf,

    /// Route table file.
    pub routes: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            templates: PathBuf::from("app/templates"),
            controllers: PathBuf::from("app/controllers"),
            static_dir: PathBuf::from("app/static"),
            output: PathBuf::from("dist"),
            routes: PathBuf::from("app/routes.toml"),
        }
    }
}

impl PathsConfig {
    /// Validate raw paths before normalization. All must be relative so
    /// they stay inside the project.
    pub fn validate_paths(&self, diag: &mut ConfigDiagnostics) {
        let entries = [
            (FieldPath::new("paths.templates"), &self.templates),
            (FieldPath::new("paths.controllers"), &self.controllers),
            (FieldPath::new("paths.static"), &self.static_dir),
            (FieldPath::new("paths.output"), &self.output),
            (FieldPath::new("paths.routes"), &self.routes),
        ];
        for (field, path) in entries {
            if path.is_absolute() {
                diag.error_with_hint(
                    field,
                    format!("'{}' must be relative to the project root", path.display()),
                    "remove the leading '/'",
                );
            }
        }
    }

    /// Resolve all paths against the project root.
    pub fn normalize(&mut self, root: &Path) {
        self.templates = crate::utils::path::normalize_path(&root.join(&self.templates));
        self.controllers = crate::utils::path::normalize_path(&root.join(&self.controllers));
        self.static_dir = crate::utils::path::normalize_path(&root.join(&self.static_dir));
        self.output = crate::utils::path::normalize_path(&root.join(&self.output));
        self.routes = crate::utils::path::normalize_path(&root.join(&self.routes));
    }

    /// Server-side runtime bundle location.
    pub fn server_runtime(&self) -> PathBuf {
        self.output.join("runtime/server.js")
    }

    /// Browser-side runtime bundle location.
    pub fn client_runtime(&self) -> PathBuf {
        self.output.join("runtime/client.js")
    }

    /// Materialized compiler worker location.
    pub fn compile_worker(&self) -> PathBuf {
        self.output.join(".lumo/compile-worker.mjs")
    }
}
