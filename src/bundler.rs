//! External package bundling via esbuild.
//!
//! Component sources may import installed packages (`import { format }
//! from 'date-fns'`). Those imports cannot survive into the compiled
//! component, because the engine that executes server renders has no
//! module loader. Instead each imported package is bundled once into an
//! IIFE that publishes the module onto `globalThis._lumo_packages`, and
//! the import statement is rewritten to read from that registry.
//!
//! Bundles are cached by `(package, target)`, so repeated renders and
//! the hydration loader reuse the same bundle text. A failed bundle is
//! not fatal: the import is stripped, a warning is logged and the
//! component renders without the package.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;

use dashmap::DashMap;
use regex::{Captures, Regex};

use crate::utils::exec::{Cmd, ESBUILD_FILTER};
use crate::{debug, log};

// ============================================================================
// Import Patterns
// ============================================================================

// Module specifiers starting with `.` or `/` are component-relative and
// never external, so the first specifier character excludes them.

/// `import { a, b } from 'pkg'`
static NAMED_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s*\{([^}]+)\}\s*from\s*['"]([^'"./][^'"]*)['"];?"#).unwrap()
});

/// `import x from 'pkg'`
static DEFAULT_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"import\s+(\w+)\s+from\s*['"]([^'"./][^'"]*)['"];?"#).unwrap());

/// `import * as x from 'pkg'`
static NAMESPACE_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s*\*\s*as\s+(\w+)\s+from\s*['"]([^'"./][^'"]*)['"];?"#).unwrap()
});

/// `import 'pkg'`
static SIDE_EFFECT_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"import\s+['"]([^'"./][^'"]*)['"];?"#).unwrap());

// ============================================================================
// Target
// ============================================================================

/// Compilation target for a component and its package bundles.
///
/// The same package bundles differently per target (browser builds pull
/// in browser entry points, node builds keep `fs`/`path`/`os` external),
/// so the target is part of every cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Browser,
    Node,
}

impl Target {
    /// Wire value, also the esbuild `--platform` value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Node => "node",
        }
    }

    /// Svelte compiler `generate` value for this target.
    pub const fn generate(self) -> &'static str {
        match self {
            Self::Browser => "client",
            Self::Node => "server",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Package Bundler
// ============================================================================

/// Source with external imports rewritten, plus the bundles backing them.
#[derive(Debug, Default)]
pub struct BundledSource {
    pub source: String,
    /// Package name → bundle text, for every external import in the source.
    pub packages: BTreeMap<String, String>,
}

/// Bundles external packages and rewrites their import statements.
#[derive(Debug)]
pub struct PackageBundler {
    /// Project root, where `node_modules` lives.
    project_root: PathBuf,
    cache: DashMap<(String, Target), String>,
}

impl PackageBundler {
    pub fn new(project_root: PathBuf) -> Self {
        Self {
            project_root,
            cache: DashMap::new(),
        }
    }

    /// Bundle every external import in `source` and rewrite the import
    /// statements to registry reads.
    ///
    /// Never fails: a package that will not bundle is stripped with a
    /// warning and the rest of the source is processed normally.
    pub fn bundle_external_imports(&self, source: &str, target: Target) -> BundledSource {
        let imports = extract_imports(source);
        if imports.is_empty() {
            return BundledSource {
                source: source.to_string(),
                packages: BTreeMap::new(),
            };
        }

        // Dedupe, keeping first-seen order.
        let mut unique: Vec<&str> = Vec::new();
        for (_, module) in &imports {
            if !unique.contains(&module.as_str()) {
                unique.push(module);
            }
        }

        let mut packages = BTreeMap::new();
        let mut rewritten = source.to_string();

        for module in unique {
            match self.bundle_package(module, target) {
                Ok(bundle) => {
                    packages.insert(module.to_string(), bundle);
                    rewritten = rewrite_imports(&rewritten, module);
                }
                Err(err) => {
                    log!("warning"; "failed to bundle '{module}' for {target}: {err}");
                    rewritten = strip_imports(&rewritten, module);
                }
            }
        }

        BundledSource {
            source: rewritten,
            packages,
        }
    }

    /// Bundle one package, going through the cache.
    fn bundle_package(&self, package: &str, target: Target) -> anyhow::Result<String> {
        let key = (package.to_string(), target);
        if let Some(cached) = self.cache.get(&key) {
            debug!("bundle"; "cache hit: {package} ({target})");
            return Ok(cached.clone());
        }

        // The entry point lives in the project root so esbuild resolves
        // the package against the project's node_modules.
        let mut entry = tempfile::Builder::new()
            .prefix(".lumo-bundle-")
            .suffix(".mjs")
            .tempfile_in(&self.project_root)?;
        writeln!(entry, "import * as pkg from '{package}';")?;
        writeln!(
            entry,
            "globalThis._lumo_packages = globalThis._lumo_packages || {{}};"
        )?;
        writeln!(entry, "globalThis._lumo_packages['{package}'] = pkg;")?;
        entry.flush()?;

        let mut cmd = Cmd::from_slice(&["npx", "esbuild"])
            .arg(entry.path())
            .args(["--bundle", "--format=iife", "--minify", "--target=es2020"])
            .arg(format!("--platform={target}"))
            .cwd(&self.project_root)
            .filter(&ESBUILD_FILTER);
        if target == Target::Node {
            cmd = cmd.args(["--external:fs", "--external:path", "--external:os"]);
        }

        let output = cmd.run()?;
        let bundle = String::from_utf8_lossy(&output.stdout).into_owned();

        log!("bundle"; "bundled '{package}' for {target}");
        self.cache.insert(key, bundle.clone());
        Ok(bundle)
    }

    /// Drop every cached bundle.
    pub fn clear(&self) {
        self.cache.clear();
    }
}

/// Concatenate bundles into a loader that fills the package registry.
///
/// The loader runs before any component code, in the server composite
/// script and at the top of the hydration module.
pub fn loader_script(packages: &BTreeMap<String, String>) -> String {
    if packages.is_empty() {
        return String::new();
    }

    let mut loader = String::from(
        "// Load bundled packages\nglobalThis._lumo_packages = globalThis._lumo_packages || {};\n",
    );
    for (package, bundle) in packages {
        loader.push_str(&format!("// Bundle for {package}\n"));
        loader.push_str(&format!("(function() {{ {bundle} }})();\n"));
    }
    loader
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Collect `(full statement, module name)` for every external import.
///
/// `.svelte` specifiers are component imports even without a relative
/// prefix, so they are left for the component resolver.
fn extract_imports(source: &str) -> Vec<(String, String)> {
    let mut imports = Vec::new();

    for pattern in [&NAMED_IMPORT, &DEFAULT_IMPORT, &NAMESPACE_IMPORT] {
        for caps in pattern.captures_iter(source) {
            let module = &caps[2];
            if !module.ends_with(".svelte") {
                imports.push((caps[0].to_string(), module.to_string()));
            }
        }
    }
    for caps in SIDE_EFFECT_IMPORT.captures_iter(source) {
        let module = &caps[1];
        if !module.ends_with(".svelte") {
            imports.push((caps[0].to_string(), module.to_string()));
        }
    }

    imports
}

/// Rewrite every import of `package` to read from the global registry.
fn rewrite_imports(source: &str, package: &str) -> String {
    let registry = format!("globalThis._lumo_packages['{package}']");

    let source = NAMED_IMPORT.replace_all(source, |caps: &Captures| {
        if &caps[2] == package {
            format!("const {{{}}} = {registry};", &caps[1])
        } else {
            caps[0].to_string()
        }
    });
    let source = DEFAULT_IMPORT.replace_all(&source, |caps: &Captures| {
        if &caps[2] == package {
            format!("const {} = {registry}.default || {registry};", &caps[1])
        } else {
            caps[0].to_string()
        }
    });
    let source = NAMESPACE_IMPORT.replace_all(&source, |caps: &Captures| {
        if &caps[2] == package {
            format!("const {} = {registry};", &caps[1])
        } else {
            caps[0].to_string()
        }
    });
    SIDE_EFFECT_IMPORT
        .replace_all(&source, |caps: &Captures| {
            if &caps[1] == package {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Remove every import of `package` (used when its bundle failed).
fn strip_imports(source: &str, package: &str) -> String {
    let mut out = source.to_string();
    for (pattern, module_group) in [
        (&*NAMED_IMPORT, 2usize),
        (&*DEFAULT_IMPORT, 2),
        (&*NAMESPACE_IMPORT, 2),
        (&*SIDE_EFFECT_IMPORT, 1),
    ] {
        out = pattern
            .replace_all(&out, |caps: &Captures| {
                if &caps[module_group] == package {
                    String::new()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned();
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
