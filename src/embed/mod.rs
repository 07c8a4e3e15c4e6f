//! Embedded static resources for Lumo.
//!
//! # Module Structure
//!
//! - `template` - Template types for typed variable injection
//! - `serve` - Document shells (page.html, error.html) and the hydration entry
//! - `init` - Scaffold files written by `lumo init`
//!
//! Engine-side scripts are embedded next to their modules instead
//! (`runtime/js/`, `compiler/worker.mjs`).
//!
//! # Usage
//!
//! ```ignore
//! use embed::serve::{ERROR_HTML, ErrorVars};
//!
//! let html = ERROR_HTML.render(&ErrorVars {
//!     status: 404,
//!     title: "Not Found",
//!     message: "No route found for /missing",
//!     detail: None,
//! });
//! ```

mod template;

pub use template::{Template, TemplateVars};

pub mod serve {
    use super::{Template, TemplateVars};
    use crate::utils::html;

    /// Variables for page.html.
    pub struct PageVars<'a> {
        /// Document title, escaped on injection.
        pub title: &'a str,
        /// Pre-built `<link rel="stylesheet">` lines, empty when no CSS is registered.
        pub css_links: &'a str,
        /// Pre-built head markup (meta tags, analytics, sanitized scripts).
        pub head_content: &'a str,
        /// Server-rendered component markup.
        pub app_html: &'a str,
        /// Props JSON for the hydration script, already made script-safe.
        pub props_json: &'a str,
        /// Module script body.
        pub hydration_js: &'a str,
    }

    impl TemplateVars for PageVars<'_> {
        fn apply(&self, content: &str) -> String {
            content
                .replace("__TITLE__", &html::escape(self.title))
                .replace("__CSS_LINKS__", self.css_links)
                .replace("__HEAD_CONTENT__", self.head_content)
                .replace("__APP_HTML__", self.app_html)
                .replace("__PROPS_JSON__", self.props_json)
                .replace("__HYDRATION_JS__", self.hydration_js)
        }
    }

    /// Document shell for rendered pages.
    pub const PAGE_HTML: Template<PageVars<'static>> =
        Template::new(include_str!("serve/page.html"));

    /// Variables for error.html.
    pub struct ErrorVars<'a> {
        pub status: u16,
        pub title: &'a str,
        pub message: &'a str,
        /// Optional preformatted detail (compiler output, stack trace).
        pub detail: Option<&'a str>,
    }

    impl TemplateVars for ErrorVars<'_> {
        fn apply(&self, content: &str) -> String {
            let detail = match self.detail {
                Some(text) if !text.is_empty() => {
                    format!("        <pre>{}</pre>\n", html::escape(text))
                }
                _ => String::new(),
            };
            content
                .replace("__STATUS__", &self.status.to_string())
                .replace("__TITLE__", &html::escape(self.title))
                .replace("__MESSAGE__", &html::escape(self.message))
                .replace("__DETAIL__", &detail)
        }
    }

    /// Error document for 404/500 responses.
    pub const ERROR_HTML: Template<ErrorVars<'static>> =
        Template::new(include_str!("serve/error.html"));

    /// Variables for hydrate.js.
    pub struct HydrateVars<'a> {
        /// JSON string literal holding the compiled browser artifact.
        pub component_js: &'a str,
        /// Template-relative path baked into the component's FILENAME slot.
        pub filename: &'a str,
        /// `null` or the JSON-serialized document metadata.
        pub doc_json: &'a str,
        /// Package loader script, empty when the component imports no packages.
        pub package_loader: &'a str,
    }

    impl TemplateVars for HydrateVars<'_> {
        fn apply(&self, content: &str) -> String {
            content
                .replace("__COMPONENT_JS__", self.component_js)
                .replace("__FILENAME__", self.filename)
                .replace("__DOC_JSON__", self.doc_json)
                .replace("__PACKAGE_LOADER__", self.package_loader)
        }
    }

    /// Hydration entry evaluated as the page's module script.
    pub const HYDRATE_JS: Template<HydrateVars<'static>> =
        Template::new(include_str!("serve/hydrate.js"));
}

pub mod init {
    use super::{Template, TemplateVars};

    /// Variables for scaffold files that carry the project name.
    pub struct ProjectVars<'a> {
        pub name: &'a str,
    }

    impl TemplateVars for ProjectVars<'_> {
        fn apply(&self, content: &str) -> String {
            content.replace("__NAME__", self.name)
        }
    }

    /// Commented lumo.toml written by `lumo init`.
    pub const LUMO_TOML: Template<ProjectVars<'static>> =
        Template::new(include_str!("init/lumo.toml"));

    /// package.json pinning the component toolchain.
    pub const PACKAGE_JSON: Template<ProjectVars<'static>> =
        Template::new(include_str!("init/package.json"));

    /// Default route table.
    pub const ROUTES_TOML: &str = include_str!("init/routes.toml");

    /// Home controller with static context and document metadata.
    pub const HOME_CONTROLLER: &str = include_str!("init/home.json");

    /// Counter component demonstrating props and state.
    pub const HOME_TEMPLATE: &str = include_str!("init/index.svelte");

    /// Ignore patterns for a fresh project.
    pub const GITIGNORE: &str = include_str!("init/gitignore");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_template() {
        let vars = serve::PageVars {
            title: "Hello",
            css_links: "    <link rel=\"stylesheet\" href=\"/assets/css/index.css\">",
            head_content: "",
            app_html: "<h1>Hi</h1>",
            props_json: "{\"title\":\"Hello\"}",
            hydration_js: "console.log('hydrate');",
        };
        let html = serve::PAGE_HTML.render(&vars);
        assert!(html.contains("<title>Hello</title>"));
        assert!(html.contains("<div id=\"lumo-app\"><h1>Hi</h1></div>"));
        assert!(html.contains("id=\"lumo-props\" type=\"application/json\""));
        assert!(!html.contains("__APP_HTML__"));
        assert!(!html.contains("__PROPS_JSON__"));
    }

    #[test]
    fn test_page_template_escapes_title() {
        let vars = serve::PageVars {
            title: "a < b",
            css_links: "",
            head_content: "",
            app_html: "",
            props_json: "{}",
            hydration_js: "",
        };
        let html = serve::PAGE_HTML.render(&vars);
        assert!(html.contains("<title>a &lt; b</title>"));
    }

    #[test]
    fn test_error_template_with_detail() {
        let vars = serve::ErrorVars {
            status: 500,
            title: "Compilation Failed",
            message: "Unexpected token",
            detail: Some("at line 3 <script>"),
        };
        let html = serve::ERROR_HTML.render(&vars);
        assert!(html.contains("<span class=\"status\">500</span>"));
        assert!(html.contains("Compilation Failed"));
        // Detail is escaped inside the <pre> block
        assert!(html.contains("<pre>at line 3 &lt;script&gt;</pre>"));
        assert!(!html.contains("__DETAIL__"));
    }

    #[test]
    fn test_error_template_without_detail() {
        let vars = serve::ErrorVars {
            status: 404,
            title: "Not Found",
            message: "No route found for /missing",
            detail: None,
        };
        let html = serve::ERROR_HTML.render(&vars);
        assert!(html.contains("404"));
        assert!(!html.contains("<pre>"));
    }

    #[test]
    fn test_hydrate_template() {
        let vars = serve::HydrateVars {
            component_js: "\"const x = 1;\"",
            filename: "home/index.svelte",
            doc_json: "null",
            package_loader: "",
        };
        let js = serve::HYDRATE_JS.render(&vars);
        assert!(js.contains("const componentSource = \"const x = 1;\";"));
        assert!(js.contains("'home/index.svelte'"));
        assert!(js.contains("const docData = null;"));
        assert!(js.contains("/assets/runtime/client.js"));
        assert!(!js.contains("__COMPONENT_JS__"));
    }

    #[test]
    fn test_init_templates_carry_name() {
        let vars = init::ProjectVars { name: "my_app" };
        let toml = init::LUMO_TOML.render(&vars);
        assert!(toml.contains("name = \"my_app\""));

        let pkg = init::PACKAGE_JSON.render(&vars);
        assert!(pkg.contains("\"name\": \"my_app\""));
        assert!(pkg.contains("svelte"));
        assert!(pkg.contains("esbuild"));
    }
}
