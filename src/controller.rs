//! Controller data loading.
//!
//! A controller supplies render data for one owner: `context()` becomes
//! the component props, `doc()` the document metadata. The contract is a
//! closed trait; owners without a controller get a no-op implementation,
//! so the pipeline never branches on "controller present".
//!
//! The shipped backend reads `app/controllers/{owner}.json`:
//!
//! ```json
//! {
//!     "context": { "title": "Welcome" },
//!     "doc": {
//!         "title": "Home",
//!         "head": {
//!             "meta": [{ "name": "description", "content": "..." }],
//!             "script": { "analyticsID": "G-XXXX", "custom": ["..."] }
//!         }
//!     }
//! }
//! ```
//!
//! Outside dev mode parsed controllers are cached per owner; in dev mode
//! the file is reread on every request so edits show up immediately.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::debug;
use crate::error::RenderFailure;

/// Props handed to the component, a JSON object.
pub type PropMap = serde_json::Map<String, serde_json::Value>;

/// One `<meta>` tag as attribute/value pairs, in declaration order.
pub type MetaTag = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Document metadata
// ============================================================================

/// Document metadata a controller attaches to its pages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMeta {
    /// `<title>` text; the app name is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub head: HeadMeta,
}

/// Structured `<head>` content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadMeta {
    /// `<meta>` tags.
    #[serde(default)]
    pub meta: Vec<MetaTag>,

    #[serde(default)]
    pub script: ScriptMeta,
}

/// Script-related head entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptMeta {
    /// Google Analytics measurement id; emits the gtag bootstrap block.
    #[serde(
        rename = "analyticsID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub analytics_id: Option<String>,

    /// Hotjar site id; emits the hotjar loader block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotjar: Option<String>,

    /// Inline script lines, sanitized before they reach the document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom: Vec<String>,
}

// ============================================================================
// Contract
// ============================================================================

/// Render data for one owner.
pub trait Controller: std::fmt::Debug + Send + Sync {
    /// Component props. Invoked fresh for every request.
    fn context(&self) -> PropMap;

    /// Document metadata, when the controller declares any.
    fn doc(&self) -> Option<DocMeta>;
}

/// Stand-in for owners without a controller file.
#[derive(Debug)]
struct NoopController;

/// The no-op controller, also substituted when a controller fails to
/// load and the render degrades to empty data.
pub fn noop() -> Arc<dyn Controller> {
    Arc::new(NoopController)
}

impl Controller for NoopController {
    fn context(&self) -> PropMap {
        PropMap::new()
    }

    fn doc(&self) -> Option<DocMeta> {
        None
    }
}

/// Controller backed by a static JSON document.
#[derive(Debug)]
struct JsonController {
    context: PropMap,
    doc: Option<DocMeta>,
}

impl Controller for JsonController {
    fn context(&self) -> PropMap {
        self.context.clone()
    }

    fn doc(&self) -> Option<DocMeta> {
        self.doc.clone()
    }
}

/// On-disk shape of `{owner}.json`. Both keys are optional.
#[derive(Debug, Default, Deserialize)]
struct ControllerFile {
    #[serde(default)]
    context: PropMap,
    #[serde(default)]
    doc: Option<DocMeta>,
}

// ============================================================================
// Registry
// ============================================================================

/// Loads controllers from the project's controllers directory.
pub struct ControllerRegistry {
    controllers_dir: PathBuf,
    cache: DashMap<String, Arc<dyn Controller>>,
    dev: bool,
}

impl ControllerRegistry {
    pub fn new(controllers_dir: PathBuf, dev: bool) -> Self {
        Self {
            controllers_dir,
            cache: DashMap::new(),
            dev,
        }
    }

    /// Load the controller for an owner.
    ///
    /// A missing file is not an error. A file that exists but cannot be
    /// read or parsed is reported; the orchestrator logs it and renders
    /// with empty data.
    pub fn load(&self, owner: &str) -> Result<Arc<dyn Controller>, RenderFailure> {
        if !self.dev
            && let Some(hit) = self.cache.get(owner)
        {
            return Ok(hit.clone());
        }

        let path = self.controllers_dir.join(format!("{owner}.json"));
        if !path.exists() {
            debug!("render"; "no controller for '{owner}'");
            return Ok(Arc::new(NoopController));
        }

        let content = std::fs::read_to_string(&path).map_err(|err| RenderFailure::Controller {
            owner: owner.to_owned(),
            message: format!("failed to read {}: {err}", path.display()),
        })?;
        let file: ControllerFile =
            serde_json::from_str(&content).map_err(|err| RenderFailure::Controller {
                owner: owner.to_owned(),
                message: format!("invalid JSON in {}: {err}", path.display()),
            })?;

        let controller: Arc<dyn Controller> = Arc::new(JsonController {
            context: file.context,
            doc: file.doc,
        });
        if !self.dev {
            self.cache
                .insert(owner.to_owned(), controller.clone());
        }
        Ok(controller)
    }

    /// Forget every cached controller. Used when watch mode sees a
    /// controller file change outside dev mode.
    pub fn clear(&self) {
        self.cache.clear();
    }
}

// ============================================================================
// tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(files: &[(&str, &str)], dev: bool) -> (tempfile::TempDir, ControllerRegistry) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let registry = ControllerRegistry::new(dir.path().to_path_buf(), dev);
        (dir, registry)
    }

    #[test]
    fn test_missing_controller_is_noop() {
        let (_dir, registry) = registry_with(&[], true);
        let controller = registry.load("home").unwrap();
        assert!(controller.context().is_empty());
        assert!(controller.doc().is_none());
    }

    #[test]
    fn test_json_controller_context_and_doc() {
        let content = r#"{
            "context": { "title": "T", "count": 3 },
            "doc": {
                "title": "Home",
                "head": {
                    "meta": [{ "name": "description", "content": "d" }],
                    "script": { "analyticsID": "G-1", "custom": ["console.log(1);"] }
                }
            }
        }"#;
        let (_dir, registry) = registry_with(&[("home.json", content)], true);
        let controller = registry.load("home").unwrap();

        let props = controller.context();
        assert_eq!(props.get("title").and_then(|v| v.as_str()), Some("T"));
        assert_eq!(props.get("count").and_then(|v| v.as_i64()), Some(3));

        let doc = controller.doc().unwrap();
        assert_eq!(doc.title.as_deref(), Some("Home"));
        assert_eq!(doc.head.meta.len(), 1);
        assert_eq!(doc.head.script.analytics_id.as_deref(), Some("G-1"));
        assert_eq!(doc.head.script.custom, vec!["console.log(1);"]);
    }

    #[test]
    fn test_context_only_file() {
        let (_dir, registry) = registry_with(&[("posts.json", r#"{"context":{"n":1}}"#)], true);
        let controller = registry.load("posts").unwrap();
        assert_eq!(controller.context().len(), 1);
        assert!(controller.doc().is_none());
    }

    #[test]
    fn test_malformed_controller_reports_owner() {
        let (_dir, registry) = registry_with(&[("home.json", "{ not json")], true);
        let err = registry.load("home").unwrap_err();
        assert!(matches!(err, RenderFailure::Controller { .. }));
        assert!(err.to_string().contains("home"));
    }

    #[test]
    fn test_dev_mode_rereads_per_request() {
        let (dir, registry) = registry_with(&[("home.json", r#"{"context":{"v":"old"}}"#)], true);
        let first = registry.load("home").unwrap();
        assert_eq!(
            first.context().get("v").and_then(|v| v.as_str()),
            Some("old")
        );

        std::fs::write(
            dir.path().join("home.json"),
            r#"{"context":{"v":"new"}}"#,
        )
        .unwrap();
        let second = registry.load("home").unwrap();
        assert_eq!(
            second.context().get("v").and_then(|v| v.as_str()),
            Some("new")
        );
    }

    #[test]
    fn test_production_mode_caches() {
        let (dir, registry) = registry_with(&[("home.json", r#"{"context":{"v":"old"}}"#)], false);
        registry.load("home").unwrap();

        std::fs::write(
            dir.path().join("home.json"),
            r#"{"context":{"v":"new"}}"#,
        )
        .unwrap();
        let cached = registry.load("home").unwrap();
        assert_eq!(
            cached.context().get("v").and_then(|v| v.as_str()),
            Some("old")
        );

        // clear() drops the cached entry and forces a reread
        registry.clear();
        let reread = registry.load("home").unwrap();
        assert_eq!(
            reread.context().get("v").and_then(|v| v.as_str()),
            Some("new")
        );
    }

    #[test]
    fn test_doc_meta_round_trip() {
        let doc = DocMeta {
            title: Some("T".into()),
            head: HeadMeta {
                meta: vec![],
                script: ScriptMeta {
                    analytics_id: Some("G-9".into()),
                    hotjar: None,
                    custom: vec![],
                },
            },
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("analyticsID"));
        let back: DocMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}
