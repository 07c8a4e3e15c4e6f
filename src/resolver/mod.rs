//! Component import resolution.
//!
//! A component may import other components:
//!
//! ```svelte
//! <script>
//!   import Card from './Card.svelte';
//! </script>
//! ```
//!
//! Resolution walks those imports recursively and returns the entry
//! source with its import statements removed, plus a flat map of every
//! transitively imported component, ready for one compile request.
//! Import specifiers take four forms:
//!
//! | Form                | Resolved against     |
//! |---------------------|----------------------|
//! | `./Card.svelte`     | importing file's dir |
//! | `../ui/Nav.svelte`  | importing file's dir |
//! | `/shared/X.svelte`  | templates root       |
//! | `Card.svelte`       | importing file's dir |
//!
//! External package imports are handed to the [`PackageBundler`] before
//! the component scan, so the scan only ever sees component imports.
//!
//! Source text is cached by normalized absolute path. [`invalidate`]
//! evicts a file and every ancestor that imports it, so a change deep
//! in the tree forces the whole chain to re-resolve.
//!
//! [`invalidate`]: ComponentResolver::invalidate

pub mod graph;

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use dashmap::DashMap;
use regex::Regex;

use crate::bundler::{PackageBundler, Target};
use crate::debug;
use crate::error::RenderFailure;
use crate::utils::path::lexical_normalize;
use graph::DependencyGraph;

/// `import Name from './path.svelte'`
static COMPONENT_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s+(\w+)\s+from\s+['"]([^'"]+\.svelte)['"];?"#).unwrap()
});

/// One component import statement found in a source scan.
struct ComponentImport {
    name: String,
    specifier: String,
    span: Range<usize>,
}

/// Output of resolving one component tree.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResolvedComponent {
    /// Entry source with all import statements stripped or rewritten.
    pub source: String,
    /// Local import name → processed source, flattened over the tree.
    pub components: BTreeMap<String, String>,
    /// Package name → bundle text, union over the tree.
    pub packages: BTreeMap<String, String>,
}

/// Resolves component imports with caching and dependency tracking.
pub struct ComponentResolver {
    templates_root: PathBuf,
    bundler: PackageBundler,
    /// Raw source text by normalized absolute path.
    cache: DashMap<PathBuf, String>,
    graph: DependencyGraph,
}

impl ComponentResolver {
    pub fn new(templates_root: PathBuf, bundler: PackageBundler) -> Self {
        Self {
            templates_root,
            bundler,
            cache: DashMap::new(),
            graph: DependencyGraph::new(),
        }
    }

    /// Resolve every import in `source`, recursively.
    ///
    /// `current_path` is the file the source came from; relative
    /// specifiers resolve against its directory. Fails on a missing
    /// import file or an import cycle.
    pub fn resolve_imports(
        &self,
        source: &str,
        current_path: &Path,
        target: Target,
    ) -> Result<ResolvedComponent, RenderFailure> {
        let current = lexical_normalize(current_path);
        let mut visited = vec![current.clone()];
        self.resolve_inner(source, &current, target, &mut visited)
    }

    fn resolve_inner(
        &self,
        source: &str,
        current: &Path,
        target: Target,
        visited: &mut Vec<PathBuf>,
    ) -> Result<ResolvedComponent, RenderFailure> {
        // External packages first, so the scan below only sees
        // component imports.
        let bundled = self.bundler.bundle_external_imports(source, target);
        let working = bundled.source;
        let mut packages = bundled.packages;

        if !packages.is_empty() {
            let names: Vec<&str> = packages.keys().map(String::as_str).collect();
            debug!("render"; "external packages in {}: {}", self.display_path(current), names.join(", "));
        }

        // One scan: collect the imports with their spans, strip after.
        let imports: Vec<ComponentImport> = COMPONENT_IMPORT
            .captures_iter(&working)
            .filter_map(|caps| {
                let span = caps.get(0)?.range();
                Some(ComponentImport {
                    name: caps[1].to_string(),
                    specifier: caps[2].to_string(),
                    span,
                })
            })
            .collect();

        let mut components = BTreeMap::new();

        for import in &imports {
            let resolved = self.resolve_import_path(&import.specifier, current);

            // A file on the current resolution stack importing itself
            // again would recurse forever.
            if visited.contains(&resolved) {
                let mut chain: Vec<String> =
                    visited.iter().map(|p| self.display_path(p)).collect();
                chain.push(self.display_path(&resolved));
                return Err(RenderFailure::CyclicImport {
                    chain: chain.join(" -> "),
                });
            }

            let component_source =
                self.load_component(&resolved)
                    .map_err(|err| RenderFailure::ImportResolution {
                        specifier: import.specifier.clone(),
                        importer: current.to_path_buf(),
                        source: err,
                    })?;

            visited.push(resolved.clone());
            let nested = self.resolve_inner(&component_source, &resolved, target, visited)?;
            visited.pop();

            components.insert(import.name.clone(), nested.source);
            components.extend(nested.components);
            packages.extend(nested.packages);

            self.graph.record(current, &resolved);
        }

        // Drop the import statements, keeping everything between them.
        let mut processed = String::with_capacity(working.len());
        let mut cursor = 0;
        for import in &imports {
            processed.push_str(&working[cursor..import.span.start]);
            cursor = import.span.end;
        }
        processed.push_str(&working[cursor..]);

        Ok(ResolvedComponent {
            source: processed,
            components,
            packages,
        })
    }

    /// Evict `path` and every component that transitively imports it.
    pub fn invalidate(&self, path: &Path) {
        let path = lexical_normalize(path);
        let mut stale = self.graph.ancestors_of(&path);
        stale.insert(path);

        for entry in &stale {
            self.cache.remove(entry);
            self.graph.remove_outgoing(entry);
        }

        debug!("watch"; "invalidated {} cached components ({} edges remain)",
            stale.len(), self.graph.edge_count());
    }

    /// Drop all cached sources, edges and package bundles.
    pub fn clear(&self) {
        self.cache.clear();
        self.graph.clear();
        self.bundler.clear();
    }

    /// Map an import specifier to a normalized absolute path.
    fn resolve_import_path(&self, specifier: &str, current: &Path) -> PathBuf {
        let parent = current.parent().unwrap_or(Path::new(""));
        let joined = if let Some(rest) = specifier.strip_prefix("./") {
            parent.join(rest)
        } else if specifier.starts_with("../") {
            parent.join(specifier)
        } else if let Some(rest) = specifier.strip_prefix('/') {
            self.templates_root.join(rest)
        } else {
            parent.join(specifier)
        };
        lexical_normalize(&joined)
    }

    /// Read a component source, going through the cache.
    fn load_component(&self, path: &Path) -> std::io::Result<String> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached.clone());
        }
        let source = std::fs::read_to_string(path)?;
        self.cache.insert(path.to_path_buf(), source.clone());
        Ok(source)
    }

    /// Path relative to the templates root, for log and error text.
    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.templates_root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
