//! Route table and URL matching.
//!
//! Routes come from `app/routes.toml`:
//!
//! ```toml
//! root = "home.index"
//! resources = ["posts"]
//!
//! [routes]
//! "/about" = "pages.about"
//! "/posts/:id/preview" = { owner = "posts", action = "preview" }
//! ```
//!
//! Matching runs in three stages: exact lookup, `:param` patterns in
//! declaration order, then a convention fallback that maps `/a` to
//! `a.index` and `/a/b` to `a.b`. Resource names expand into the four
//! RESTful routes (index/show/edit/new) at load time and sit in the
//! same table as hand-written entries, so they take part in the exact
//! and pattern stages like everything else.
//!
//! Declaration order is significant: when two dynamic patterns both
//! match a path, the one declared first wins.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use serde::de::{MapAccess, Visitor};

use crate::debug;
use crate::error::RenderFailure;

// ============================================================================
// Route Types
// ============================================================================

/// One registered route: who renders it and with which template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Controller / template namespace (e.g. "posts").
    pub owner: String,
    /// Action within the owner (e.g. "show").
    pub action: String,
    /// Template path relative to the templates root.
    pub template: String,
}

impl RouteEntry {
    fn new(owner: &str, action: &str, template: Option<&str>) -> Self {
        let template = match template {
            Some(t) => t.to_string(),
            None => format!("{owner}/{action}.svelte"),
        };
        Self {
            owner: owner.to_string(),
            action: action.to_string(),
            template,
        }
    }
}

/// A matched route plus the `:param` values captured from the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub owner: String,
    pub action: String,
    pub template: String,
    /// Captured dynamic segments (`/posts/:id` on `/posts/5` → `{id: "5"}`).
    pub params: HashMap<String, String>,
}

impl RouteMatch {
    fn from_entry(entry: &RouteEntry, params: HashMap<String, String>) -> Self {
        Self {
            owner: entry.owner.clone(),
            action: entry.action.clone(),
            template: entry.template.clone(),
            params,
        }
    }

    /// Build a match for a path no table entry covers, from the
    /// `/{owner}/{action}` convention.
    fn conventional(owner: &str, action: &str) -> Self {
        let entry = RouteEntry::new(owner, action, None);
        Self::from_entry(&entry, HashMap::new())
    }
}

/// One row of the route table.
#[derive(Debug)]
struct TableRow {
    pattern: String,
    /// Compiled matcher, present only for patterns with `:param` segments.
    matcher: Option<Regex>,
    entry: RouteEntry,
}

// ============================================================================
// Router
// ============================================================================

/// Declaration-ordered route table.
///
/// The table is a `Vec` rather than a map: iteration order decides
/// priority between overlapping dynamic patterns, so insertion order
/// must survive.
#[derive(Debug, Default)]
pub struct Router {
    table: Vec<TableRow>,
}

impl Router {
    /// Load routes from a TOML file.
    ///
    /// A missing file is not an error: the router starts with the single
    /// default route `/` → `home.index`. A file that exists but does not
    /// parse is fatal.
    pub fn load(path: &Path) -> Result<Self, RenderFailure> {
        if !path.exists() {
            debug!("serve"; "no routes file at {}, using defaults", path.display());
            return Ok(Self::with_defaults());
        }

        let content = std::fs::read_to_string(path).map_err(|err| RenderFailure::RouteConfig {
            path: path.to_path_buf(),
            message: format!("failed to read: {err}"),
        })?;

        Self::parse(&content, path)
    }

    /// Router with only the default root route.
    pub fn with_defaults() -> Self {
        let mut router = Self::default();
        router.add_route("/", "home", "index", None);
        router
    }

    /// Parse a routes file. `origin` is only used in error messages.
    fn parse(content: &str, origin: &Path) -> Result<Self, RenderFailure> {
        let invalid = |message: String| RenderFailure::RouteConfig {
            path: origin.to_path_buf(),
            message,
        };

        let file: RoutesFile =
            toml::from_str(content).map_err(|err| invalid(err.message().to_string()))?;

        let mut router = Self::default();

        if let Some(target) = &file.root {
            let (owner, action) = split_target(target).map_err(&invalid)?;
            router.add_route("/", owner, action, None);
        }

        for resource in &file.resources {
            if resource.is_empty() || resource.contains('/') {
                return Err(invalid(format!("invalid resource name \"{resource}\"")));
            }
            router.add_resource(resource);
        }

        for (pattern, spec) in &file.routes.0 {
            if !pattern.starts_with('/') {
                return Err(invalid(format!(
                    "route pattern \"{pattern}\" must start with '/'"
                )));
            }
            match spec {
                RouteSpec::Compact(target) => {
                    let (owner, action) = split_target(target)
                        .map_err(|msg| invalid(format!("route \"{pattern}\": {msg}")))?;
                    router.add_route(pattern, owner, action, None);
                }
                RouteSpec::Full {
                    owner,
                    action,
                    template,
                } => {
                    router.add_route(pattern, owner, action, template.as_deref());
                }
            }
        }

        Ok(router)
    }

    /// Register a route, replacing any existing entry with the same pattern.
    ///
    /// When `template` is `None` the convention `{owner}/{action}.svelte`
    /// applies.
    pub fn add_route(&mut self, pattern: &str, owner: &str, action: &str, template: Option<&str>) {
        let row = TableRow {
            pattern: pattern.to_string(),
            matcher: compile_pattern(pattern),
            entry: RouteEntry::new(owner, action, template),
        };
        match self.table.iter_mut().find(|r| r.pattern == pattern) {
            Some(existing) => *existing = row,
            None => self.table.push(row),
        }
    }

    /// Register the four RESTful routes for a resource collection.
    pub fn add_resource(&mut self, name: &str) {
        self.add_route(&format!("/{name}"), name, "index", None);
        self.add_route(&format!("/{name}/:id"), name, "show", None);
        self.add_route(&format!("/{name}/:id/edit"), name, "edit", None);
        self.add_route(&format!("/{name}/new"), name, "new", None);
    }

    /// Match a request path against the table.
    ///
    /// Returns `None` only for unmatched paths of three or more segments;
    /// shorter paths always fall back to the `/{owner}/{action}` convention.
    pub fn match_path(&self, path: &str) -> Option<RouteMatch> {
        let path = normalize(path);

        // Exact match first, so static routes beat dynamic ones
        // (`/posts/new` wins over `/posts/:id`).
        if let Some(row) = self.table.iter().find(|r| r.pattern == path) {
            return Some(RouteMatch::from_entry(&row.entry, HashMap::new()));
        }

        // Dynamic patterns in declaration order. First structural match wins.
        for row in &self.table {
            let Some(matcher) = &row.matcher else {
                continue;
            };
            if let Some(caps) = matcher.captures(path) {
                let params = matcher
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect();
                return Some(RouteMatch::from_entry(&row.entry, params));
            }
        }

        // Convention fallback for short paths.
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Some(RouteMatch::conventional("home", "index")),
            [owner] => Some(RouteMatch::conventional(owner, "index")),
            [owner, action] => Some(RouteMatch::conventional(owner, action)),
            _ => None,
        }
    }

    /// Iterate the table in declaration order (used by `lumo routes`).
    pub fn entries(&self) -> impl Iterator<Item = (&str, &RouteEntry)> {
        self.table
            .iter()
            .map(|row| (row.pattern.as_str(), &row.entry))
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Strip a single trailing slash, except on the root path.
fn normalize(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => path,
    }
}

/// Compile a `:param` pattern into an anchored regex with one named
/// capture group per parameter. Returns `None` for static patterns.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    if !pattern.contains(':') {
        return None;
    }

    let escaped = regex::escape(pattern);
    let mut anchored = String::with_capacity(escaped.len() + 8);
    anchored.push('^');
    let mut rest = escaped.as_str();
    while let Some(pos) = rest.find(':') {
        anchored.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        let end = rest
            .find(|c: char| !c.is_alphanumeric() && c != '_')
            .unwrap_or(rest.len());
        let name = &rest[..end];
        if name.is_empty() {
            anchored.push(':');
        } else {
            anchored.push_str(&format!("(?P<{name}>[^/]+)"));
        }
        rest = &rest[end..];
    }
    anchored.push_str(rest);
    anchored.push('$');

    // Escaped input and validated group names; compilation cannot fail
    // for any pattern the table accepts.
    Regex::new(&anchored).ok()
}

/// Split a compact `"owner.action"` target.
fn split_target(target: &str) -> Result<(&str, &str), String> {
    match target.split_once('.') {
        Some((owner, action))
            if !owner.is_empty() && !action.is_empty() && !action.contains('.') =>
        {
            Ok((owner, action))
        }
        _ => Err(format!("expected \"owner.action\", got \"{target}\"")),
    }
}

// ============================================================================
// Routes File Format
// ============================================================================

/// `app/routes.toml` top level.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoutesFile {
    root: Option<String>,
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    routes: RouteTable,
}

/// One value in the `[routes]` table: compact `"owner.action"` or a
/// full entry with an explicit template.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RouteSpec {
    Compact(String),
    Full {
        owner: String,
        action: String,
        template: Option<String>,
    },
}

/// The `[routes]` table with declaration order preserved.
///
/// Deserialized by hand because the default TOML map type sorts keys,
/// which would silently reorder overlapping dynamic patterns.
#[derive(Debug, Default)]
struct RouteTable(Vec<(String, RouteSpec)>);

impl<'de> Deserialize<'de> for RouteTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = RouteTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a table of route patterns")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, RouteSpec>()? {
                    entries.push(entry);
                }
                Ok(RouteTable(entries))
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Router {
        Router::parse(content, Path::new("app/routes.toml")).unwrap()
    }

    #[test]
    fn test_exact_match_returns_route_unchanged() {
        let router = parse(
            r#"
root = "home.index"

[routes]
"/about" = "pages.about"
"#,
        );

        let root = router.match_path("/").unwrap();
        assert_eq!(root.owner, "home");
        assert_eq!(root.action, "index");
        assert_eq!(root.template, "home/index.svelte");
        assert!(root.params.is_empty());

        let about = router.match_path("/about").unwrap();
        assert_eq!(about.owner, "pages");
        assert_eq!(about.action, "about");
    }

    #[test]
    fn test_resource_expansion() {
        let router = parse(r#"resources = ["posts"]"#);

        let index = router.match_path("/posts").unwrap();
        assert_eq!((index.owner.as_str(), index.action.as_str()), ("posts", "index"));

        let show = router.match_path("/posts/5").unwrap();
        assert_eq!(show.action, "show");
        assert_eq!(show.params.get("id").map(String::as_str), Some("5"));
        assert_eq!(show.template, "posts/show.svelte");

        let edit = router.match_path("/posts/5/edit").unwrap();
        assert_eq!(edit.action, "edit");
        assert_eq!(edit.params.get("id").map(String::as_str), Some("5"));

        // Static /posts/new is an exact match, so it never reaches /posts/:id.
        let new = router.match_path("/posts/new").unwrap();
        assert_eq!(new.action, "new");
        assert!(new.params.is_empty());
    }

    #[test]
    fn test_declaration_order_decides_pattern_priority() {
        let mut router = Router::default();
        router.add_route("/items/:id", "items", "show", None);
        router.add_route("/items/:slug", "items", "by_slug", None);

        let matched = router.match_path("/items/7").unwrap();
        assert_eq!(matched.action, "show");
        assert_eq!(matched.params.get("id").map(String::as_str), Some("7"));
    }

    #[test]
    fn test_multiple_params_captured() {
        let mut router = Router::default();
        router.add_route("/posts/:post_id/comments/:id", "comments", "show", None);

        let matched = router.match_path("/posts/3/comments/14").unwrap();
        assert_eq!(matched.params.get("post_id").map(String::as_str), Some("3"));
        assert_eq!(matched.params.get("id").map(String::as_str), Some("14"));
    }

    #[test]
    fn test_convention_fallback() {
        let router = Router::default();

        let root = router.match_path("/").unwrap();
        assert_eq!((root.owner.as_str(), root.action.as_str()), ("home", "index"));

        let one = router.match_path("/dashboard").unwrap();
        assert_eq!(one.owner, "dashboard");
        assert_eq!(one.action, "index");

        let two = router.match_path("/blog/archive").unwrap();
        assert_eq!(two.owner, "blog");
        assert_eq!(two.action, "archive");
        assert_eq!(two.template, "blog/archive.svelte");

        assert!(router.match_path("/a/b/c").is_none());
    }

    #[test]
    fn test_trailing_slash_normalized() {
        let router = parse(
            r#"
[routes]
"/about" = "pages.about"
"#,
        );

        assert_eq!(router.match_path("/about/").unwrap().owner, "pages");
        // Only a single slash is stripped.
        let double = router.match_path("/about//").unwrap();
        assert_eq!(double.owner, "about");
        assert_eq!(double.action, "index");
    }

    #[test]
    fn test_add_route_replaces_same_pattern() {
        let mut router = Router::default();
        router.add_route("/about", "pages", "about", None);
        router.add_route("/about", "pages", "about_v2", Some("pages/v2.svelte"));

        assert_eq!(router.len(), 1);
        let matched = router.match_path("/about").unwrap();
        assert_eq!(matched.action, "about_v2");
        assert_eq!(matched.template, "pages/v2.svelte");
    }

    #[test]
    fn test_explicit_route_overrides_resource() {
        let router = parse(
            r#"
resources = ["posts"]

[routes]
"/posts/new" = "posts.compose"
"#,
        );

        assert_eq!(router.match_path("/posts/new").unwrap().action, "compose");
        assert_eq!(router.match_path("/posts/5").unwrap().action, "show");
    }

    #[test]
    fn test_full_entry_with_template() {
        let router = parse(
            r#"
[routes]
"/about" = { owner = "pages", action = "about", template = "pages/static.svelte" }
"/contact" = { owner = "pages", action = "contact" }
"#,
        );

        assert_eq!(
            router.match_path("/about").unwrap().template,
            "pages/static.svelte"
        );
        assert_eq!(
            router.match_path("/contact").unwrap().template,
            "pages/contact.svelte"
        );
    }

    #[test]
    fn test_malformed_compact_target_rejected() {
        let missing_dot = Router::parse(
            r#"
[routes]
"/about" = "pages"
"#,
            Path::new("app/routes.toml"),
        );
        assert!(matches!(
            missing_dot,
            Err(RenderFailure::RouteConfig { .. })
        ));

        let extra_dot = Router::parse(r#"root = "a.b.c""#, Path::new("app/routes.toml"));
        assert!(extra_dot.is_err());
    }

    #[test]
    fn test_pattern_without_leading_slash_rejected() {
        let result = Router::parse(
            r#"
[routes]
"about" = "pages.about"
"#,
            Path::new("app/routes.toml"),
        );
        assert!(matches!(result, Err(RenderFailure::RouteConfig { .. })));
    }

    #[test]
    fn test_declaration_order_preserved_from_file() {
        let router = parse(
            r#"
[routes]
"/x/:id" = "x.by_id"
"/x/:name" = "x.by_name"
"/a" = "a.index"
"#,
        );

        let patterns: Vec<&str> = router.entries().map(|(p, _)| p).collect();
        assert_eq!(patterns, vec!["/x/:id", "/x/:name", "/a"]);
        assert_eq!(router.match_path("/x/42").unwrap().action, "by_id");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let router = Router::load(&dir.path().join("routes.toml")).unwrap();

        assert_eq!(router.len(), 1);
        assert_eq!(router.match_path("/").unwrap().owner, "home");
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.toml");
        std::fs::write(&path, "root = \"landing.show\"\n").unwrap();

        let router = Router::load(&path).unwrap();
        let root = router.match_path("/").unwrap();
        assert_eq!(root.owner, "landing");
        assert_eq!(root.action, "show");
    }
}
