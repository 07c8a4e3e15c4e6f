//! The per-request render pipeline.
//!
//! One request walks: route match → template load → controller data →
//! server compile → engine execution → CSS extraction → browser compile
//! → hydration script → document assembly. Fatal steps convert into
//! rendered error documents at this boundary; soft steps (controller
//! load, browser compile) degrade and log. Nothing escapes to the
//! serving layer as an error — every path ends in a complete HTML
//! document with a status code.

pub mod document;
pub mod hydrate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use crate::assets::{AssetRegistries, minify};
use crate::bundler::{PackageBundler, Target, loader_script};
use crate::compiler::{CompileWorker, CompiledArtifact, ComponentCompiler};
use crate::config::{AppConfig, cfg};
use crate::controller::{self, ControllerRegistry, DocMeta};
use crate::embed::serve::{ERROR_HTML, ErrorVars, PAGE_HTML, PageVars};
use crate::error::RenderFailure;
use crate::resolver::ComponentResolver;
use crate::router::{RouteMatch, Router};
use crate::runtime::{RenderOutcome, ScriptRuntime};
use crate::{debug, log};

/// A complete response document.
#[derive(Debug)]
pub struct RenderedDocument {
    pub html: String,
    pub status: u16,
}

/// Owns the pipeline components and the per-process mutable state.
pub struct RenderOrchestrator {
    router: RwLock<Router>,
    resolver: Arc<ComponentResolver>,
    compiler: ComponentCompiler,
    runtime: ScriptRuntime,
    controllers: ControllerRegistry,
    registries: Arc<AssetRegistries>,
    templates_root: PathBuf,
}

impl RenderOrchestrator {
    /// Build the pipeline from config: route table, resolver with its
    /// bundler, compile worker, engine. Fails when the route file is
    /// malformed or the server runtime bundle is missing.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let router = Router::load(&config.paths.routes)?;
        debug!("serve"; "{} routes registered", router.len());

        let root = config.get_root().to_path_buf();
        let templates_root = config.paths.templates.clone();
        let bundler = PackageBundler::new(root.clone());
        let resolver = Arc::new(ComponentResolver::new(templates_root.clone(), bundler));
        let worker = CompileWorker::new(root, config.paths.compile_worker());
        let compiler = ComponentCompiler::new(Arc::clone(&resolver), worker);
        let runtime = ScriptRuntime::new(
            &config.paths.server_runtime(),
            config.serve.render_timeout_ms,
        )?;
        let controllers =
            ControllerRegistry::new(config.paths.controllers.clone(), config.compiler.dev);

        Ok(Self {
            router: RwLock::new(router),
            resolver,
            compiler,
            runtime,
            controllers,
            registries: Arc::new(AssetRegistries::new()),
            templates_root,
        })
    }

    /// The resolver, shared with the file watcher for invalidation.
    pub fn resolver(&self) -> &Arc<ComponentResolver> {
        &self.resolver
    }

    /// The controller registry, shared with the file watcher.
    pub fn controllers(&self) -> &ControllerRegistry {
        &self.controllers
    }

    /// The asset registries, read by the asset responder.
    pub fn registries(&self) -> &Arc<AssetRegistries> {
        &self.registries
    }

    /// Swap in a freshly loaded route table. Used by watch mode when the
    /// routes file changes; a malformed file keeps the old table.
    pub fn reload_routes(&self, path: &std::path::Path) -> Result<(), RenderFailure> {
        let router = Router::load(path)?;
        debug!("serve"; "{} routes registered", router.len());
        *self.router.write() = router;
        Ok(())
    }

    /// Render the document for one request path.
    pub fn handle(&self, path: &str) -> RenderedDocument {
        let Some(route) = self.router.read().match_path(path) else {
            return not_found_document(path);
        };

        match self.render_route(&route) {
            Ok(rendered) => rendered,
            Err(failure) => {
                log!("error"; "{failure}");
                error_document(&failure)
            }
        }
    }

    fn render_route(&self, route: &RouteMatch) -> Result<RenderedDocument, RenderFailure> {
        let config = cfg();
        let dev = config.compiler.dev;

        // LoadSource
        let template_path = self.templates_root.join(&route.template);
        let source = std::fs::read_to_string(&template_path).map_err(|_| {
            RenderFailure::TemplateNotFound {
                owner: route.owner.clone(),
                action: route.action.clone(),
                path: template_path.clone(),
            }
        })?;

        // LoadControllerData: a broken controller degrades to empty data.
        let controller = self.controllers.load(&route.owner).unwrap_or_else(|err| {
            log!("warning"; "{err}");
            controller::noop()
        });
        let mut props = controller.context();
        let mut params: Vec<_> = route.params.clone().into_iter().collect();
        params.sort();
        for (name, value) in params {
            // Path params never shadow controller-provided keys.
            if !props.contains_key(&name) {
                props.insert(name, serde_json::Value::String(value));
            }
        }
        let props_json = serde_json::to_string(&props).unwrap_or_else(|_| "{}".to_string());
        let doc = controller.doc();
        let doc_json = doc
            .as_ref()
            .and_then(|meta| serde_json::to_string(meta).ok());

        // CompileServer
        let server = self
            .compiler
            .compile(&source, &template_path, Target::Node, dev)?;
        let server_js = flatten_for_engine(&server);
        let loader = loader_script(&server.packages);

        // Execute. A failed render still answers with a full document,
        // the fallback block standing in for the component markup.
        let outcome = self.runtime.render(
            &server_js,
            (!loader.is_empty()).then_some(loader.as_str()),
            &props_json,
            &route.template,
            doc_json.as_deref(),
        );
        let (app_html, runtime_head, runtime_css, status) = match outcome {
            RenderOutcome::Rendered { html, head, css } => (html, head, css, 200),
            RenderOutcome::Failed {
                error,
                fallback_html,
            } => {
                log!("error"; "{error}");
                let document = self.assemble(
                    route,
                    doc.as_ref(),
                    &fallback_html,
                    "",
                    &props_json,
                    &hydrate::disabled(),
                    500,
                );
                return Ok(document);
            }
        };

        // ExtractCss
        let stem = template_stem(&route.template);
        let mut css = server.collect_css();
        if css.trim().is_empty() {
            css = runtime_css;
        }
        if !dev && let Some(minified) = minify::minify_css(&css) {
            css = minified;
        }
        self.registries.register_css(&stem, css);

        // CompileBrowser: a failure only disables hydration.
        let hydration = match self
            .compiler
            .compile(&source, &template_path, Target::Browser, dev)
        {
            Ok(browser) => {
                let script = hydrate::build(&browser, &route.template, doc_json.as_deref(), dev);
                self.registries
                    .register_component(&stem, browser_asset_js(&browser));
                script
            }
            Err(err) => {
                log!("warning"; "browser compilation failed, hydration disabled: {err}");
                hydrate::disabled()
            }
        };

        Ok(self.assemble(
            route,
            doc.as_ref(),
            &app_html,
            &runtime_head,
            &props_json,
            &hydration,
            status,
        ))
    }

    /// AssembleDocument: fill the page shell.
    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        route: &RouteMatch,
        doc: Option<&DocMeta>,
        app_html: &str,
        runtime_head: &str,
        props_json: &str,
        hydration_js: &str,
        status: u16,
    ) -> RenderedDocument {
        let config = cfg();
        let title = doc
            .and_then(|meta| meta.title.clone())
            .unwrap_or_else(|| config.app.name.clone());

        let mut head_content = doc.map(document::head_content).unwrap_or_default();
        if !runtime_head.is_empty() {
            head_content.push_str("    ");
            head_content.push_str(runtime_head);
            head_content.push('\n');
        }

        debug!("render"; "{} -> {}/{} ({status})", route.template, route.owner, route.action);

        let html = PAGE_HTML.render(&PageVars {
            title: &title,
            css_links: &self.registries.css_links(),
            head_content: &head_content,
            app_html,
            props_json: &hydrate::script_safe_json(props_json),
            hydration_js,
        });
        RenderedDocument { html, status }
    }
}

// ============================================================================
// Artifact flattening
// ============================================================================

/// Flatten a server artifact into one evaluable source for the engine:
/// the entry first (the guest entry reads the component name off the
/// head of the source), imported components appended as plain
/// declarations. Function declarations hoist, so order only matters for
/// the name extraction.
fn flatten_for_engine(artifact: &CompiledArtifact) -> String {
    use crate::runtime::strip_module_imports;

    let mut source = hydrate::demote_export(&strip_module_imports(&artifact.main.js));
    for js in artifact.components.values() {
        source.push('\n');
        source.push_str(&hydrate::demote_export(&strip_module_imports(&js.js)));
    }
    source
}

/// The copy of the browser artifact served at
/// `/assets/components/{stem}.js`, identical to the source embedded in
/// the hydration script.
fn browser_asset_js(artifact: &CompiledArtifact) -> String {
    hydrate::flatten_components(artifact)
}

/// Registry key for a template: its path without the extension.
fn template_stem(template: &str) -> String {
    template
        .strip_suffix(".svelte")
        .unwrap_or(template)
        .to_string()
}

// ============================================================================
// Error documents
// ============================================================================

/// 404 document for a path no route covers.
pub fn not_found_document(path: &str) -> RenderedDocument {
    let html = ERROR_HTML.render(&ErrorVars {
        status: 404,
        title: "Not Found",
        message: &format!("No route found for {path}"),
        detail: None,
    });
    RenderedDocument { html, status: 404 }
}

/// Error document for a fatal pipeline failure.
pub fn error_document(failure: &RenderFailure) -> RenderedDocument {
    let html = ERROR_HTML.render(&ErrorVars {
        status: failure.status(),
        title: failure.title(),
        message: &failure.to_string(),
        detail: failure.stack(),
    });
    RenderedDocument {
        html,
        status: failure.status(),
    }
}

/// Generic 500 document for faults nothing else caught.
pub fn server_error_document(message: &str) -> RenderedDocument {
    let html = ERROR_HTML.render(&ErrorVars {
        status: 500,
        title: "Internal Server Error",
        message,
        detail: None,
    });
    RenderedDocument { html, status: 500 }
}

// ============================================================================
// Tests
// ============================================================================
