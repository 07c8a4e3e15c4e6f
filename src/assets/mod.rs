//! Asset registries and `/assets/` request handling.
//!
//! Every successful render appends to two registries: the compiled
//! browser artifact under `/assets/components/{name}.js` and the
//! extracted stylesheet under `/assets/css/{name}.css`. Entries are
//! never removed; `{name}` is the template stem (`home/index`).
//!
//! The remaining asset namespace:
//!
//! | URL                        | Backed by                     |
//! |----------------------------|-------------------------------|
//! | `/assets/runtime/{file}`   | `dist/runtime/` on disk       |
//! | `/assets/{path}`           | the static root, served as-is |

pub mod minify;

use std::path::{Component, Path, PathBuf};

use dashmap::DashMap;
use tiny_http::{Header, Request, Response, StatusCode};

use crate::config::AppConfig;
use crate::debug;
use crate::error::RenderFailure;
use crate::utils::mime;

// ============================================================================
// Registries
// ============================================================================

/// Compiled browser artifacts and extracted stylesheets, keyed by
/// template stem. Appended to on every successful render.
#[derive(Debug, Default)]
pub struct AssetRegistries {
    components: DashMap<String, String>,
    css: DashMap<String, String>,
}

impl AssetRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the browser-compiled JS for a component.
    pub fn register_component(&self, name: &str, js: String) {
        self.components.insert(name.to_owned(), js);
    }

    /// Register the extracted CSS for a component. Empty CSS is not
    /// registered, so no empty stylesheet links reach the document.
    pub fn register_css(&self, name: &str, css: String) {
        if !css.trim().is_empty() {
            self.css.insert(name.to_owned(), css);
        }
    }

    pub fn component(&self, name: &str) -> Option<String> {
        self.components.get(name).map(|entry| entry.clone())
    }

    pub fn css(&self, name: &str) -> Option<String> {
        self.css.get(name).map(|entry| entry.clone())
    }

    /// `<link rel="stylesheet">` lines for every registered stylesheet,
    /// sorted by name so the document is deterministic.
    pub fn css_links(&self) -> String {
        let mut names: Vec<String> = self.css.iter().map(|entry| entry.key().clone()).collect();
        names.sort();

        let mut links = String::new();
        for name in names {
            links.push_str(&format!(
                "    <link rel=\"stylesheet\" href=\"/assets/css/{name}.css\">\n"
            ));
        }
        links
    }
}

// ============================================================================
// Request classification
// ============================================================================

/// What an `/assets/` URL points at.
#[derive(Debug, PartialEq, Eq)]
pub enum AssetRequest {
    /// `/assets/components/{name}.js`
    Component(String),
    /// `/assets/css/{name}.css`
    Css(String),
    /// `/assets/runtime/{file}`, served from `dist/runtime/`.
    Runtime(String),
    /// `/assets/{path}`, served from the static root.
    Static(PathBuf),
}

/// Whether a request URL belongs to the asset namespace.
pub fn is_asset_url(url: &str) -> bool {
    strip_query(url).starts_with("/assets/")
}

/// Classify an asset URL. Returns `None` for URLs outside `/assets/`
/// and for paths that try to escape their root.
pub fn classify(url: &str) -> Option<AssetRequest> {
    let path = strip_query(url).strip_prefix("/assets/")?;
    if !is_safe_relative(Path::new(path)) {
        return None;
    }

    if let Some(name) = path.strip_prefix("components/") {
        return Some(AssetRequest::Component(name.strip_suffix(".js")?.to_owned()));
    }
    if let Some(name) = path.strip_prefix("css/") {
        return Some(AssetRequest::Css(name.strip_suffix(".css")?.to_owned()));
    }
    if let Some(file) = path.strip_prefix("runtime/") {
        return Some(AssetRequest::Runtime(file.to_owned()));
    }
    Some(AssetRequest::Static(PathBuf::from(path)))
}

fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Reject absolute paths and any `..` or `.` segment.
fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

// ============================================================================
// Responses
// ============================================================================

/// Answer one `/assets/` request.
///
/// Misses answer with a plain 404; they never abort the server loop.
pub fn respond(request: Request, registries: &AssetRegistries, config: &AppConfig) {
    let url = request.url().to_owned();

    let lookup = classify(&url)
        .ok_or_else(|| RenderFailure::AssetMissing { path: url.clone() })
        .and_then(|asset| load(&asset, registries, config, &url));

    let result = match lookup {
        Ok((body, content_type)) => send(request, 200, content_type, body),
        Err(failure) => {
            debug!("serve"; "{failure}");
            send(
                request,
                failure.status(),
                mime::types::PLAIN,
                b"404 Not Found".to_vec(),
            )
        }
    };
    if let Err(err) = result {
        debug!("serve"; "asset response failed: {err}");
    }
}

/// Resolve an asset to its bytes and content type.
fn load(
    asset: &AssetRequest,
    registries: &AssetRegistries,
    config: &AppConfig,
    url: &str,
) -> Result<(Vec<u8>, &'static str), RenderFailure> {
    let missing = || RenderFailure::AssetMissing {
        path: url.to_owned(),
    };

    match asset {
        AssetRequest::Component(name) => registries
            .component(name)
            .map(|js| (js.into_bytes(), mime::types::JAVASCRIPT))
            .ok_or_else(missing),
        AssetRequest::Css(name) => registries
            .css(name)
            .map(|css| (css.into_bytes(), mime::types::CSS))
            .ok_or_else(missing),
        AssetRequest::Runtime(file) => {
            let path = config.paths.output.join("runtime").join(file);
            read_file(&path, url)
        }
        AssetRequest::Static(relative) => {
            let path = config.paths.static_dir.join(relative);
            read_file(&path, url)
        }
    }
}

fn read_file(path: &Path, url: &str) -> Result<(Vec<u8>, &'static str), RenderFailure> {
    if !path.is_file() {
        return Err(RenderFailure::AssetMissing {
            path: url.to_owned(),
        });
    }
    std::fs::read(path)
        .map(|body| (body, mime::from_path(path)))
        .map_err(|_| RenderFailure::AssetMissing {
            path: url.to_owned(),
        })
}

fn send(
    request: Request,
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
) -> anyhow::Result<()> {
    let response = Response::from_data(body)
        .with_status_code(StatusCode(status))
        .with_header(make_header("Content-Type", content_type))
        .with_header(make_header("Cache-Control", "no-cache"))
        .with_header(make_header("Access-Control-Allow-Origin", "*"));
    request.respond(response)?;
    Ok(())
}

fn make_header(key: &'static str, value: &'static str) -> Header {
    // Static ASCII key/value pairs; construction cannot fail.
    Header::from_bytes(key, value).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_component_and_css() {
        assert_eq!(
            classify("/assets/components/home/index.js"),
            Some(AssetRequest::Component("home/index".into()))
        );
        assert_eq!(
            classify("/assets/css/home/index.css"),
            Some(AssetRequest::Css("home/index".into()))
        );
        // Wrong extension is not a registry asset
        assert_eq!(classify("/assets/components/home/index.css"), None);
    }

    #[test]
    fn test_classify_runtime_and_static() {
        assert_eq!(
            classify("/assets/runtime/client.js"),
            Some(AssetRequest::Runtime("client.js".into()))
        );
        assert_eq!(
            classify("/assets/images/logo.svg"),
            Some(AssetRequest::Static(PathBuf::from("images/logo.svg")))
        );
    }

    #[test]
    fn test_classify_strips_query() {
        assert_eq!(
            classify("/assets/css/home/index.css?v=3"),
            Some(AssetRequest::Css("home/index".into()))
        );
    }

    #[test]
    fn test_classify_rejects_traversal() {
        assert_eq!(classify("/assets/../lumo.toml"), None);
        assert_eq!(classify("/assets/css/../../secret.css"), None);
        assert_eq!(classify("/assets/"), None);
    }

    #[test]
    fn test_classify_ignores_other_urls() {
        assert_eq!(classify("/posts/5"), None);
        assert!(!is_asset_url("/posts/5"));
        assert!(is_asset_url("/assets/css/a.css"));
    }

    #[test]
    fn test_registry_round_trip() {
        let registries = AssetRegistries::new();
        registries.register_component("home/index", "js code".into());
        registries.register_css("home/index", "h1{}".into());

        assert_eq!(registries.component("home/index").as_deref(), Some("js code"));
        assert_eq!(registries.css("home/index").as_deref(), Some("h1{}"));
        assert!(registries.component("posts/show").is_none());
    }

    #[test]
    fn test_empty_css_not_registered() {
        let registries = AssetRegistries::new();
        registries.register_css("home/index", "   \n".into());
        assert!(registries.css("home/index").is_none());
        assert_eq!(registries.css_links(), "");
    }

    #[test]
    fn test_css_links_sorted() {
        let registries = AssetRegistries::new();
        registries.register_css("posts/show", ".b{}".into());
        registries.register_css("home/index", ".a{}".into());

        let links = registries.css_links();
        let home = links.find("home/index.css").unwrap();
        let posts = links.find("posts/show.css").unwrap();
        assert!(home < posts);
        assert!(links.contains("<link rel=\"stylesheet\" href=\"/assets/css/home/index.css\">"));
    }

    #[test]
    fn test_load_static_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("app/static")).unwrap();
        std::fs::write(dir.path().join("app/static/robots.txt"), "allow").unwrap();

        let mut config = AppConfig::default();
        config.paths.normalize(dir.path());

        let registries = AssetRegistries::new();
        let asset = AssetRequest::Static(PathBuf::from("robots.txt"));
        let (body, content_type) = load(&asset, &registries, &config, "/assets/robots.txt").unwrap();
        assert_eq!(body, b"allow");
        assert_eq!(content_type, mime::types::PLAIN);

        let gone = AssetRequest::Static(PathBuf::from("gone.txt"));
        let err = load(&gone, &registries, &config, "/assets/gone.txt").unwrap_err();
        assert_eq!(err.status(), 404);
    }
}
