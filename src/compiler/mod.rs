//! Svelte component compilation.
//!
//! Compilation is one JSON round trip per render: the resolver flattens
//! the component tree, then the whole batch (entry source plus every
//! imported component) goes to the compile worker in a single request.
//! The response carries compiled JS and extracted CSS per component.
//!
//! | Target            | Svelte `generate` | Used for             |
//! |-------------------|-------------------|----------------------|
//! | [`Target::Node`]  | `server`          | SSR in the engine    |
//! | [`Target::Browser`] | `client`        | hydration in the DOM |

mod worker;

pub use worker::CompileWorker;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bundler::Target;
use crate::debug;
use crate::error::RenderFailure;
use crate::resolver::ComponentResolver;

// ============================================================================
// Artifacts
// ============================================================================

/// One compiled unit: executable JS plus extracted CSS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CompiledComponent {
    pub js: String,
    #[serde(default)]
    pub css: String,
}

/// A fully compiled component subtree for one target.
#[derive(Debug, Default)]
pub struct CompiledArtifact {
    /// The entry component.
    pub main: CompiledComponent,
    /// Imported components by local import name.
    pub components: BTreeMap<String, CompiledComponent>,
    /// Package bundles the subtree depends on, passed through untouched.
    pub packages: BTreeMap<String, String>,
}

impl CompiledArtifact {
    /// CSS of the entry component and every imported component, in a
    /// deterministic order (entry first).
    pub fn collect_css(&self) -> String {
        let mut css = String::new();
        if !self.main.css.is_empty() {
            css.push_str(&self.main.css);
            css.push('\n');
        }
        for component in self.components.values() {
            if !component.css.is_empty() {
                css.push_str(&component.css);
                css.push('\n');
            }
        }
        css
    }
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Serialize)]
struct CompileRequest<'a> {
    main: MainSource<'a>,
    components: &'a BTreeMap<String, String>,
    target: &'static str,
    dev: bool,
}

#[derive(Serialize)]
struct MainSource<'a> {
    source: &'a str,
    filename: &'a str,
}

#[derive(Deserialize)]
struct CompileResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stack: Option<String>,
    #[serde(default)]
    main: Option<CompiledComponent>,
    #[serde(default)]
    components: BTreeMap<String, CompiledComponent>,
}

// ============================================================================
// Compiler
// ============================================================================

/// Compiles component subtrees through the resolver and the worker.
pub struct ComponentCompiler {
    resolver: Arc<ComponentResolver>,
    worker: CompileWorker,
}

impl ComponentCompiler {
    pub fn new(resolver: Arc<ComponentResolver>, worker: CompileWorker) -> Self {
        Self { resolver, worker }
    }

    /// Compile `source` and its whole import tree for `target`.
    ///
    /// Worker death, a malformed response and `success:false` all
    /// surface as [`RenderFailure::Compilation`]; nothing is retried.
    pub fn compile(
        &self,
        source: &str,
        template_path: &Path,
        target: Target,
        dev: bool,
    ) -> Result<CompiledArtifact, RenderFailure> {
        let name = template_path.display().to_string();
        let failure = |message: String, stack: Option<String>| RenderFailure::Compilation {
            name: name.clone(),
            message,
            stack,
        };

        let resolved = self.resolver.resolve_imports(source, template_path, target)?;

        let request = CompileRequest {
            main: MainSource {
                source: &resolved.source,
                filename: &name,
            },
            components: &resolved.components,
            target: target.generate(),
            dev,
        };
        let payload = serde_json::to_string(&request)
            .map_err(|err| failure(format!("failed to encode compile request: {err}"), None))?;

        let response_line = self
            .worker
            .request(&payload)
            .map_err(|err| failure(err.to_string(), None))?;

        let response: CompileResponse = serde_json::from_str(&response_line)
            .map_err(|err| failure(format!("malformed compiler response: {err}"), None))?;

        if !response.success {
            let message = response
                .error
                .unwrap_or_else(|| "unknown compilation error".to_string());
            return Err(failure(message, response.stack));
        }
        let main = response
            .main
            .ok_or_else(|| failure("compiler response missing main artifact".to_string(), None))?;

        debug!("render"; "compiled {} (+{} imports) for {}", name, response.components.len(), target);

        Ok(CompiledArtifact {
            main,
            components: response.components,
            packages: resolved.packages,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let mut components = BTreeMap::new();
        components.insert("Card".to_string(), "<div/>".to_string());

        let request = CompileRequest {
            main: MainSource {
                source: "<h1>{title}</h1>",
                filename: "/app/templates/home/index.svelte",
            },
            components: &components,
            target: Target::Node.generate(),
            dev: true,
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
        assert_eq!(json["main"]["source"], "<h1>{title}</h1>");
        assert_eq!(json["components"]["Card"], "<div/>");
        assert_eq!(json["target"], "server");
        assert_eq!(json["dev"], true);
    }

    #[test]
    fn test_success_response_parsing() {
        let line = r#"{"success":true,"main":{"js":"export default function App() {}","css":"h1{color:red}"},"components":{"Card":{"js":"card js","css":""}}}"#;
        let response: CompileResponse = serde_json::from_str(line).unwrap();

        assert!(response.success);
        let main = response.main.unwrap();
        assert_eq!(main.css, "h1{color:red}");
        assert_eq!(response.components["Card"].js, "card js");
    }

    #[test]
    fn test_failure_response_parsing() {
        let line = r#"{"success":false,"error":"Unexpected token","stack":"CompileError: Unexpected token\n  at ..."}"#;
        let response: CompileResponse = serde_json::from_str(line).unwrap();

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Unexpected token"));
        assert!(response.stack.unwrap().starts_with("CompileError"));
        assert!(response.main.is_none());
    }

    #[test]
    fn test_collect_css_entry_first() {
        let mut components = BTreeMap::new();
        components.insert(
            "Card".to_string(),
            CompiledComponent {
                js: String::new(),
                css: ".card{margin:0}".to_string(),
            },
        );
        components.insert(
            "Nav".to_string(),
            CompiledComponent {
                js: String::new(),
                css: String::new(),
            },
        );

        let artifact = CompiledArtifact {
            main: CompiledComponent {
                js: String::new(),
                css: "h1{color:red}".to_string(),
            },
            components,
            packages: BTreeMap::new(),
        };

        let css = artifact.collect_css();
        assert_eq!(css, "h1{color:red}\n.card{margin:0}\n");
    }

    #[test]
    fn test_targets_map_to_generate_modes() {
        assert_eq!(Target::Node.generate(), "server");
        assert_eq!(Target::Browser.generate(), "client");
    }
}
