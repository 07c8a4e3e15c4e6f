//! Hydration script assembly.
//!
//! The browser-compiled artifact is flattened into one component source
//! (imported components first, entry last), embedded as a JSON string in
//! the hydration template, and evaluated by the page's module script
//! against the shared client runtime. When browser compilation fails the
//! page ships a stub script instead; the server-rendered markup stands
//! on its own.

use std::sync::LazyLock;

use regex::Regex;

use crate::assets::minify;
use crate::bundler::loader_script;
use crate::compiler::CompiledArtifact;
use crate::embed::serve::{HYDRATE_JS, HydrateVars};
use crate::runtime::strip_module_imports;

/// `export default Name;` left by the compiler on imported components.
static EXPORT_BINDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"export default (\w+);?").unwrap());

/// Script served when browser compilation soft-fails.
pub fn disabled() -> String {
    "console.error('Client compilation failed');".to_string()
}

/// Build the module script for one render.
///
/// `doc_json` is the serialized document metadata the browser-side
/// `getDoc()` accessor returns; `dev` disables minification.
pub fn build(
    artifact: &CompiledArtifact,
    template: &str,
    doc_json: Option<&str>,
    dev: bool,
) -> String {
    let mut source = flatten_components(artifact);
    if !dev && let Some(minified) = minify::minify_js(&source) {
        source = minified;
    }

    HYDRATE_JS.render(&HydrateVars {
        component_js: &encode_js_string(&source),
        filename: template,
        doc_json: doc_json.unwrap_or("null"),
        package_loader: &loader_script(&artifact.packages),
    })
}

/// Flatten a browser artifact into one evaluable source.
///
/// Imported components come first with their default exports demoted to
/// plain declarations; the entry keeps its `export default`, which is
/// how the hydration template locates it.
pub(crate) fn flatten_components(artifact: &CompiledArtifact) -> String {
    let mut source = String::new();
    for js in artifact.components.values() {
        source.push_str(&demote_export(&strip_module_imports(&js.js)));
        source.push('\n');
    }
    source.push_str(&strip_module_imports(&artifact.main.js));
    source
}

/// Turn an imported component's export into a local declaration.
pub(crate) fn demote_export(js: &str) -> String {
    let js = js.replace("export default function ", "function ");
    EXPORT_BINDING.replace_all(&js, "").into_owned()
}

/// Make a props JSON object safe inside `<script type="application/json">`.
///
/// A `</script` inside a string value would close the block early; the
/// escaped form parses identically.
pub fn script_safe_json(json: &str) -> String {
    json.replace("</script", "<\\/script")
}

/// JSON-encode a string for embedding in a script literal.
fn encode_js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""))
}

// ============================================================================
// Tests
// ============================================================================
