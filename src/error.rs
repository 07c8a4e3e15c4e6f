//! Failure taxonomy for the rendering pipeline.
//!
//! Every failure a request can hit is one variant of [`RenderFailure`]. The
//! orchestrator converts fatal variants into rendered HTML error documents;
//! nothing in the pipeline answers a request with a blank body.

use std::path::PathBuf;
use thiserror::Error;

/// A failure somewhere along route → resolve → compile → execute → assemble.
#[derive(Debug, Error)]
pub enum RenderFailure {
    /// The matched route points at a template file that does not exist.
    #[error("No template found for {owner}/{action} at {path}")]
    TemplateNotFound {
        owner: String,
        action: String,
        path: PathBuf,
    },

    /// A component import statement could not be resolved to a readable file.
    #[error("Failed to resolve import '{specifier}' from {importer}")]
    ImportResolution {
        specifier: String,
        importer: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Component imports form a cycle (a file imports itself transitively).
    #[error("Cyclic component import: {chain}")]
    CyclicImport { chain: String },

    /// The external compiler rejected the source, or its worker died mid-request.
    #[error("Compilation failed for {name}: {message}")]
    Compilation {
        name: String,
        message: String,
        stack: Option<String>,
    },

    /// The compiled server artifact threw while executing in the engine.
    #[error("Rendering failed for {name}: {message}")]
    Rendering {
        name: String,
        message: String,
        stack: Option<String>,
    },

    /// Guest execution exceeded the wall-clock budget and was terminated.
    #[error("Rendering timed out after {ms}ms for {name}")]
    Timeout { name: String, ms: u64 },

    /// A controller existed but could not be read or parsed.
    ///
    /// Non-fatal: the orchestrator logs it and renders with empty props.
    #[error("Controller for '{owner}' failed: {message}")]
    Controller { owner: String, message: String },

    /// `app/routes.toml` is malformed. Fatal at startup.
    #[error("Invalid route configuration in {path}: {message}")]
    RouteConfig { path: PathBuf, message: String },

    /// A request under `/assets/` named something no registry holds.
    #[error("Asset not found: {path}")]
    AssetMissing { path: String },
}

impl RenderFailure {
    /// HTTP status code for the error document.
    pub fn status(&self) -> u16 {
        match self {
            Self::TemplateNotFound { .. } | Self::AssetMissing { .. } => 404,
            _ => 500,
        }
    }

    /// Short heading for the error document.
    pub fn title(&self) -> &'static str {
        match self {
            Self::TemplateNotFound { .. } | Self::AssetMissing { .. } => "Not Found",
            Self::ImportResolution { .. } | Self::CyclicImport { .. } => {
                "Import Resolution Failed"
            }
            Self::Compilation { .. } => "Compilation Failed",
            Self::Rendering { .. } | Self::Timeout { .. } => "Rendering Failed",
            Self::Controller { .. } => "Controller Failed",
            Self::RouteConfig { .. } => "Invalid Route Configuration",
        }
    }

    /// Stack trace carried by the failure, when the toolchain or engine
    /// produced one.
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Compilation { stack, .. } | Self::Rendering { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}
