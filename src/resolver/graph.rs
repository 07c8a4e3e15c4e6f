//! Component dependency graph.
//!
//! Records which component file imports which, so invalidation can walk
//! the reverse edges and evict every ancestor of a changed file.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

/// Forward import edges: parent file → files it imports.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: RwLock<FxHashMap<PathBuf, FxHashSet<PathBuf>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `parent` imports `child`.
    pub fn record(&self, parent: &Path, child: &Path) {
        self.edges
            .write()
            .entry(parent.to_path_buf())
            .or_default()
            .insert(child.to_path_buf());
    }

    /// Direct imports of `parent`.
    #[allow(dead_code)]
    pub fn dependencies_of(&self, parent: &Path) -> FxHashSet<PathBuf> {
        self.edges.read().get(parent).cloned().unwrap_or_default()
    }

    /// Every file that transitively imports `child`.
    ///
    /// Walks reverse edges breadth-first; safe on cyclic graphs because
    /// visited ancestors are never re-queued.
    pub fn ancestors_of(&self, child: &Path) -> FxHashSet<PathBuf> {
        let edges = self.edges.read();
        let mut ancestors: FxHashSet<PathBuf> = FxHashSet::default();
        let mut frontier: Vec<PathBuf> = vec![child.to_path_buf()];

        while let Some(current) = frontier.pop() {
            for (parent, deps) in edges.iter() {
                if deps.contains(&current) && !ancestors.contains(parent) {
                    ancestors.insert(parent.clone());
                    frontier.push(parent.clone());
                }
            }
        }

        ancestors
    }

    /// Drop the outgoing edges of `parent`.
    ///
    /// Called when `parent` is evicted; the edges are re-recorded the
    /// next time it resolves.
    pub fn remove_outgoing(&self, parent: &Path) {
        self.edges.write().remove(parent);
    }

    pub fn clear(&self) {
        self.edges.write().clear();
    }

    /// Total number of edges, for diagnostics.
    pub fn edge_count(&self) -> usize {
        self.edges.read().values().map(FxHashSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_lookup() {
        let graph = DependencyGraph::new();
        graph.record(Path::new("/t/index.svelte"), Path::new("/t/Card.svelte"));
        graph.record(Path::new("/t/index.svelte"), Path::new("/t/Nav.svelte"));

        let deps = graph.dependencies_of(Path::new("/t/index.svelte"));
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(Path::new("/t/Card.svelte")));
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_ancestors_are_transitive() {
        let graph = DependencyGraph::new();
        // index -> card -> badge
        graph.record(Path::new("/t/index.svelte"), Path::new("/t/Card.svelte"));
        graph.record(Path::new("/t/Card.svelte"), Path::new("/t/Badge.svelte"));

        let ancestors = graph.ancestors_of(Path::new("/t/Badge.svelte"));
        assert_eq!(ancestors.len(), 2);
        assert!(ancestors.contains(Path::new("/t/Card.svelte")));
        assert!(ancestors.contains(Path::new("/t/index.svelte")));
    }

    #[test]
    fn test_ancestors_of_diamond() {
        let graph = DependencyGraph::new();
        // index -> a -> shared, index -> b -> shared
        graph.record(Path::new("/t/index.svelte"), Path::new("/t/A.svelte"));
        graph.record(Path::new("/t/index.svelte"), Path::new("/t/B.svelte"));
        graph.record(Path::new("/t/A.svelte"), Path::new("/t/Shared.svelte"));
        graph.record(Path::new("/t/B.svelte"), Path::new("/t/Shared.svelte"));

        let ancestors = graph.ancestors_of(Path::new("/t/Shared.svelte"));
        assert_eq!(ancestors.len(), 3);
    }

    #[test]
    fn test_ancestors_terminates_on_cycle() {
        let graph = DependencyGraph::new();
        graph.record(Path::new("/t/A.svelte"), Path::new("/t/B.svelte"));
        graph.record(Path::new("/t/B.svelte"), Path::new("/t/A.svelte"));

        let ancestors = graph.ancestors_of(Path::new("/t/A.svelte"));
        assert!(ancestors.contains(Path::new("/t/B.svelte")));
        assert!(ancestors.contains(Path::new("/t/A.svelte")));
    }

    #[test]
    fn test_remove_outgoing() {
        let graph = DependencyGraph::new();
        graph.record(Path::new("/t/index.svelte"), Path::new("/t/Card.svelte"));
        graph.remove_outgoing(Path::new("/t/index.svelte"));

        assert_eq!(graph.edge_count(), 0);
        assert!(graph.ancestors_of(Path::new("/t/Card.svelte")).is_empty());
    }
}
