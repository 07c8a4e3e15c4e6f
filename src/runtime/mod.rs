//! Embedded script engine for server-side renders.
//!
//! One isolate lives on a dedicated engine thread for the life of the
//! process; requests arrive over a channel, so renders serialize without
//! a lock around the engine. Each render opens a fresh context, evaluates
//! the composite startup script into it and invokes the guest render
//! entry. No guest state survives from one render to the next.
//!
//! Composite startup script, in evaluation order:
//!
//! | Part           | Purpose                                          |
//! |----------------|--------------------------------------------------|
//! | console shim   | buffer `console.error` into `globalThis.__errors`|
//! | CommonJS shim  | `module.exports` target for cjs-form bundles     |
//! | server library | `dist/runtime/server.js`, read once at startup   |
//! | init block     | publish the library as `globalThis.$`, verify it |
//! | render entry   | `globalThis.__lumo_render(code, propsJson)`      |
//! | browser stubs  | `document`/`window`/... set to `undefined`       |
//!
//! Guest execution is bounded by a wall-clock budget. A watchdog thread
//! holding the isolate's thread-safe handle terminates execution past the
//! deadline, and the render reports a timeout failure instead of hanging
//! its request thread.

use std::path::Path;
use std::pin::Pin;
use std::sync::{LazyLock, Once};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use regex::Regex;
use v8::{
    Context, ContextScope, CreateParams, Isolate, OwnedIsolate, Script, ScriptOrigin,
    String as V8String, V8, new_default_platform,
};

use crate::error::RenderFailure;
use crate::utils::html;
use crate::{debug, log};

pub mod bootstrap;

const CONSOLE_SHIM: &str = include_str!("js/console_shim.js");
const MODULE_SHIM: &str = include_str!("js/module_shim.js");
const RUNTIME_INIT: &str = include_str!("js/init.js");
const RENDER_ENTRY: &str = include_str!("js/render_entry.js");
const BROWSER_STUBS: &str = include_str!("js/browser_stubs.js");

const DRAIN_ERRORS: &str = "JSON.stringify(globalThis.__errors || [])";

/// Residual module syntax the compiler leaves in its output. The engine
/// has no module loader; the bindings these would import come from the
/// globals the composite script installs.
static MODULE_IMPORTS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r#"import \* as \$ from ['"]svelte/internal/server['"];?"#).unwrap(),
        Regex::new(r#"import \* as \$ from ['"]svelte/internal/client['"];?"#).unwrap(),
        Regex::new(r#"import ['"]svelte/internal/disclose-version['"];?"#).unwrap(),
    ]
});

/// Strip residual ES module imports from a compiled artifact.
pub fn strip_module_imports(source: &str) -> String {
    let mut cleaned = source.to_string();
    for pattern in MODULE_IMPORTS.iter() {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }
    cleaned
}

// ============================================================================
// Outcome
// ============================================================================

/// Result of one render session. Never an `Err`: every fault inside the
/// engine is converted into the `Failed` arm here.
#[derive(Debug)]
pub enum RenderOutcome {
    /// The component rendered.
    Rendered {
        html: String,
        head: String,
        css: String,
    },
    /// The render failed; `fallback_html` is a self-contained error block
    /// suitable for embedding in a page.
    Failed {
        error: RenderFailure,
        fallback_html: String,
    },
}

/// Error block shown in place of component markup.
fn fallback_html(message: &str) -> String {
    format!(
        "<div class=\"ssr-error\">SSR Error: {}</div>",
        html::escape(message)
    )
}

/// JSON-encode a string for embedding in a script literal.
fn encode_js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""))
}

// ============================================================================
// Runtime
// ============================================================================

struct RenderJob {
    /// Compiled server artifact, module imports already stripped.
    server_js: String,
    /// Package loader script, evaluated before the component.
    package_loader: Option<String>,
    /// Props as a JSON object string.
    props_json: String,
    /// Template path, used in failure reports.
    name: String,
    /// JSON document metadata for the guest `getDoc()` accessor.
    doc_json: Option<String>,
    reply: Sender<RenderOutcome>,
}

/// Handle to the engine thread.
///
/// Dropping the runtime closes the request channel and the engine thread
/// winds down with it.
pub struct ScriptRuntime {
    requests: Sender<RenderJob>,
}

impl ScriptRuntime {
    /// Read the server library and start the engine thread.
    ///
    /// Fails when the library bundle is missing: without it no render can
    /// succeed, so there is no degraded mode.
    pub fn new(server_runtime: &Path, timeout_ms: u64) -> Result<Self> {
        let library = std::fs::read_to_string(server_runtime).map_err(|err| {
            anyhow!(
                "server runtime bundle {} is not readable: {err}",
                server_runtime.display()
            )
        })?;
        let composite = build_composite(&library);
        debug!("render"; "composite startup script: {} bytes", composite.len());

        let (requests, jobs) = unbounded::<RenderJob>();
        thread::Builder::new()
            .name("lumo-engine".into())
            .spawn(move || engine_loop(&composite, timeout_ms, &jobs))
            .map_err(|err| anyhow!("failed to start the engine thread: {err}"))?;

        Ok(Self { requests })
    }

    /// Render a compiled server artifact.
    ///
    /// `props_json` must be a JSON object; `doc_json` is the
    /// JSON-serialized document metadata when the controller provided
    /// any. Blocks until the engine thread answers.
    pub fn render(
        &self,
        server_js: &str,
        package_loader: Option<&str>,
        props_json: &str,
        template_name: &str,
        doc_json: Option<&str>,
    ) -> RenderOutcome {
        let (reply, answer) = bounded(1);
        let job = RenderJob {
            server_js: strip_module_imports(server_js),
            package_loader: package_loader.map(str::to_owned),
            props_json: props_json.to_owned(),
            name: template_name.to_owned(),
            doc_json: doc_json.map(str::to_owned),
            reply,
        };

        if self.requests.send(job).is_err() {
            return engine_gone(template_name);
        }
        match answer.recv() {
            Ok(outcome) => outcome,
            Err(_) => engine_gone(template_name),
        }
    }
}

fn engine_gone(name: &str) -> RenderOutcome {
    let message = "render engine is not running";
    RenderOutcome::Failed {
        error: RenderFailure::Rendering {
            name: name.to_owned(),
            message: message.to_owned(),
            stack: None,
        },
        fallback_html: fallback_html(message),
    }
}

fn build_composite(library: &str) -> String {
    [
        CONSOLE_SHIM,
        MODULE_SHIM,
        library,
        RUNTIME_INIT,
        RENDER_ENTRY,
        BROWSER_STUBS,
    ]
    .join("\n")
}

// ============================================================================
// Engine thread
// ============================================================================

fn init_platform() {
    static START: Once = Once::new();
    START.call_once(|| {
        let platform = new_default_platform(0, false).make_shared();
        V8::initialize_platform(platform);
        V8::initialize();
    });
}

fn engine_loop(composite: &str, timeout_ms: u64, jobs: &Receiver<RenderJob>) {
    init_platform();
    // The isolate is created on this thread and every engine call below
    // happens on it; requests from other threads only cross the channel.
    let mut isolate = Box::pin(Isolate::new(CreateParams::default()));
    debug!("render"; "script engine initialized");

    while let Ok(job) = jobs.recv() {
        let outcome = run_render(isolate.as_mut(), composite, timeout_ms, &job);
        // A closed reply channel means the requester gave up; nothing to do.
        let _ = job.reply.send(outcome);
    }
    debug!("render"; "script engine shut down");
}

fn run_render(
    isolate: Pin<&mut OwnedIsolate>,
    composite: &str,
    timeout_ms: u64,
    job: &RenderJob,
) -> RenderOutcome {
    // SAFETY: the isolate is pinned for the life of the engine thread and
    // never leaves it.
    let isolate = unsafe { isolate.get_unchecked_mut() };

    let terminator = isolate.thread_safe_handle();
    let canceler = isolate.thread_safe_handle();
    let budget = Duration::from_millis(timeout_ms);
    let (done, deadline) = bounded::<()>(0);
    let watchdog = thread::spawn(move || {
        // Disconnect means the render finished inside its budget.
        if let Err(RecvTimeoutError::Timeout) = deadline.recv_timeout(budget) {
            terminator.terminate_execution();
        }
    });

    let session = run_session(isolate, composite, job);

    drop(done);
    let _ = watchdog.join();
    // A termination that fired after the session finished would poison
    // the next render; cancelling with none pending is a no-op.
    canceler.cancel_terminate_execution();

    match session {
        Session::Finished {
            payload,
            console_errors,
        } => {
            for message in &console_errors {
                log!("warning"; "console.error from {}: {message}", job.name);
            }
            parse_render_payload(&payload, &job.name)
        }
        Session::Exception { message, stack } => RenderOutcome::Failed {
            fallback_html: fallback_html(&message),
            error: RenderFailure::Rendering {
                name: job.name.clone(),
                message,
                stack,
            },
        },
        Session::Terminated => RenderOutcome::Failed {
            error: RenderFailure::Timeout {
                name: job.name.clone(),
                ms: timeout_ms,
            },
            fallback_html: fallback_html(&format!("render timed out after {timeout_ms}ms")),
        },
        Session::EngineFault(message) => RenderOutcome::Failed {
            error: RenderFailure::Rendering {
                name: job.name.clone(),
                message: message.to_owned(),
                stack: None,
            },
            fallback_html: fallback_html(message),
        },
    }
}

/// What one execution session produced.
enum Session {
    Finished {
        /// JSON payload returned by the guest render entry.
        payload: String,
        /// Messages the guest passed to `console.error`.
        console_errors: Vec<String>,
    },
    Exception {
        message: String,
        stack: Option<String>,
    },
    Terminated,
    EngineFault(&'static str),
}

/// Run one render in a fresh context: composite script, document
/// accessor, package loader, then the guest render entry.
fn run_session(isolate: &mut Isolate, composite: &str, job: &RenderJob) -> Session {
    v8::scope!(let scope, isolate);
    let context = Context::new(scope, Default::default());
    let scope = &mut ContextScope::new(scope, context);
    v8::tc_scope!(let tc, scope);

    macro_rules! caught {
        () => {{
            if tc.has_terminated() {
                return Session::Terminated;
            }
            let message = tc
                .exception()
                .and_then(|exc| exc.to_string(tc))
                .map_or_else(
                    || String::from("uncaught exception"),
                    |text| text.to_rust_string_lossy(tc),
                );
            let stack = tc
                .stack_trace()
                .and_then(|trace| trace.to_string(tc))
                .map(|text| text.to_rust_string_lossy(tc));
            return Session::Exception { message, stack };
        }};
    }

    let doc_script = job
        .doc_json
        .as_ref()
        .map(|doc| format!("globalThis.getDoc = function() {{ return {doc}; }};"));
    let invocation = format!(
        "globalThis.__lumo_render({}, {})",
        encode_js_string(&job.server_js),
        encode_js_string(&job.props_json)
    );

    let mut phases: Vec<(&str, &str)> = vec![(composite, "lumo://runtime")];
    if let Some(script) = &doc_script {
        phases.push((script, "lumo://doc"));
    }
    if let Some(loader) = &job.package_loader {
        phases.push((loader, "lumo://packages"));
    }
    phases.push((&invocation, "lumo://render"));

    let mut last = None;
    for (source, origin_name) in phases {
        let Some(code) = V8String::new(tc, source) else {
            return Session::EngineFault("failed to allocate script source");
        };
        let Some(name) = V8String::new(tc, origin_name) else {
            return Session::EngineFault("failed to allocate script origin");
        };
        let origin = ScriptOrigin::new(
            tc,
            name.into(),
            0,
            0,
            false,
            0,
            None,
            false,
            false,
            false,
            None,
        );
        let Some(compiled) = Script::compile(tc, code, Some(&origin)) else {
            caught!();
        };
        match compiled.run(tc) {
            Some(value) => last = Some(value),
            None => caught!(),
        }
    }

    let Some(result) = last else {
        return Session::EngineFault("render entry produced no value");
    };
    let Some(text) = result.to_string(tc) else {
        return Session::EngineFault("render result is not a string");
    };
    let payload = text.to_rust_string_lossy(tc);

    let mut console_errors: Vec<String> = Vec::new();
    if let Some(code) = V8String::new(tc, DRAIN_ERRORS)
        && let Some(compiled) = Script::compile(tc, code, None)
        && let Some(value) = compiled.run(tc)
        && let Some(text) = value.to_string(tc)
    {
        let raw = text.to_rust_string_lossy(tc);
        console_errors = serde_json::from_str(&raw).unwrap_or_default();
    }

    Session::Finished {
        payload,
        console_errors,
    }
}

/// Normalize the guest's JSON payload into a host-native outcome by
/// explicit field extraction. An opaque guest value never reaches the
/// caller; `css` may arrive as `{code}` or as a bare string.
fn parse_render_payload(payload: &str, name: &str) -> RenderOutcome {
    use serde_json::Value;

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => {
            let message = format!("render result is not valid JSON: {err}");
            return RenderOutcome::Failed {
                fallback_html: fallback_html(&message),
                error: RenderFailure::Rendering {
                    name: name.to_owned(),
                    message,
                    stack: None,
                },
            };
        }
    };

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let stack = value
            .get("stack")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let fallback = value
            .get("html")
            .and_then(Value::as_str)
            .map_or_else(|| fallback_html(error), str::to_owned);
        return RenderOutcome::Failed {
            error: RenderFailure::Rendering {
                name: name.to_owned(),
                message: error.to_owned(),
                stack,
            },
            fallback_html: fallback,
        };
    }

    let html = value
        .get("html")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let head = value
        .get("head")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let css = match value.get("css") {
        Some(Value::String(code)) => code.clone(),
        Some(object) => object
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        None => String::new(),
    };

    RenderOutcome::Rendered { html, head, css }
}

// ============================================================================
// tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Stand-in for the bundled server library: renders by calling the
    /// component function directly.
    const STUB_LIBRARY: &str = "globalThis.SvelteServer = {\n    render: function (component, options) {\n        return component(options.props);\n    }\n};\n";

    const CARD: &str = "function Card(props) {\n    return { html: '<h1>' + props.title + '</h1>', head: '<meta name=\"c\">', css: { code: 'h1 { color: red; }' } };\n}\nexport default Card;\n";

    fn stub_runtime(timeout_ms: u64) -> (tempfile::TempDir, ScriptRuntime) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.js");
        std::fs::write(&path, STUB_LIBRARY).unwrap();
        let runtime = ScriptRuntime::new(&path, timeout_ms).unwrap();
        (dir, runtime)
    }

    #[test]
    fn test_render_produces_markup() {
        let (_dir, runtime) = stub_runtime(5_000);
        let outcome = runtime.render(CARD, None, r#"{"title":"T"}"#, "home/index.svelte", None);
        match outcome {
            RenderOutcome::Rendered { html, head, css } => {
                assert_eq!(html, "<h1>T</h1>");
                assert_eq!(head, "<meta name=\"c\">");
                assert_eq!(css, "h1 { color: red; }");
            }
            RenderOutcome::Failed { error, .. } => panic!("render failed: {error}"),
        }
    }

    #[test]
    fn test_render_empty_props() {
        let (_dir, runtime) = stub_runtime(5_000);
        let component = "function Plain(props) {\n    return { html: '<p>' + Object.keys(props).length + '</p>', head: '', css: { code: '' } };\n}\n";
        let outcome = runtime.render(component, None, "{}", "home/index.svelte", None);
        match outcome {
            RenderOutcome::Rendered { html, .. } => assert_eq!(html, "<p>0</p>"),
            RenderOutcome::Failed { error, .. } => panic!("render failed: {error}"),
        }
    }

    #[test]
    fn test_render_error_is_trapped() {
        let (_dir, runtime) = stub_runtime(5_000);
        let component = "function Boom(props) {\n    throw new Error('exploded');\n}\n";
        let outcome = runtime.render(component, None, "{}", "home/boom.svelte", None);
        match outcome {
            RenderOutcome::Failed {
                error,
                fallback_html,
            } => {
                assert!(matches!(error, RenderFailure::Rendering { .. }));
                assert!(error.to_string().contains("exploded"));
                assert!(fallback_html.contains("ssr-error"));
            }
            RenderOutcome::Rendered { .. } => panic!("expected a trapped failure"),
        }
    }

    #[test]
    fn test_render_timeout_terminates_and_recovers() {
        let (_dir, runtime) = stub_runtime(250);
        let spin = "function Spin(props) {\n    for (;;) {}\n}\n";
        let outcome = runtime.render(spin, None, "{}", "home/spin.svelte", None);
        match outcome {
            RenderOutcome::Failed { error, .. } => {
                assert!(matches!(error, RenderFailure::Timeout { ms: 250, .. }));
            }
            RenderOutcome::Rendered { .. } => panic!("expected a timeout"),
        }

        // The isolate survives termination; the next render succeeds.
        let outcome = runtime.render(CARD, None, r#"{"title":"after"}"#, "home/index.svelte", None);
        assert!(matches!(outcome, RenderOutcome::Rendered { .. }));
    }

    #[test]
    fn test_doc_accessor_injection() {
        let (_dir, runtime) = stub_runtime(5_000);
        let component = "function Doc(props) {\n    return { html: getDoc().title, head: '', css: { code: '' } };\n}\n";
        let outcome = runtime.render(
            component,
            None,
            "{}",
            "home/doc.svelte",
            Some(r#"{"title":"FromDoc"}"#),
        );
        match outcome {
            RenderOutcome::Rendered { html, .. } => assert_eq!(html, "FromDoc"),
            RenderOutcome::Failed { error, .. } => panic!("render failed: {error}"),
        }
    }

    #[test]
    fn test_package_loader_runs_before_component() {
        let (_dir, runtime) = stub_runtime(5_000);
        let loader = "globalThis._lumo_packages = { 'left-pad': { width: 7 } };";
        let component = "function Pkg(props) {\n    return { html: String(globalThis._lumo_packages['left-pad'].width), head: '', css: { code: '' } };\n}\n";
        let outcome = runtime.render(component, Some(loader), "{}", "home/pkg.svelte", None);
        match outcome {
            RenderOutcome::Rendered { html, .. } => assert_eq!(html, "7"),
            RenderOutcome::Failed { error, .. } => panic!("render failed: {error}"),
        }
    }

    #[test]
    fn test_console_error_does_not_fail_render() {
        let (_dir, runtime) = stub_runtime(5_000);
        let component = "function Noisy(props) {\n    console.error('a svelte warning');\n    return { html: '<i>ok</i>', head: '', css: { code: '' } };\n}\n";
        let outcome = runtime.render(component, None, "{}", "home/noisy.svelte", None);
        assert!(matches!(outcome, RenderOutcome::Rendered { .. }));
    }

    #[test]
    fn test_missing_runtime_bundle_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.js");
        let Err(err) = ScriptRuntime::new(&missing, 1_000) else {
            panic!("expected a startup failure");
        };
        assert!(err.to_string().contains("absent.js"));
    }

    #[test]
    fn test_strip_module_imports() {
        let source = "import * as $ from 'svelte/internal/server';\nimport 'svelte/internal/disclose-version';\nimport { helper } from './local.js';\nfunction App() {}";
        let cleaned = strip_module_imports(source);
        assert!(!cleaned.contains("svelte/internal/server"));
        assert!(!cleaned.contains("disclose-version"));
        // Unrelated imports are someone else's concern
        assert!(cleaned.contains("./local.js"));
        assert!(cleaned.contains("function App()"));
    }

    #[test]
    fn test_parse_payload_error_arm() {
        let payload = r#"{"error":"x is not defined","stack":"at render","html":"<div class=\"ssr-error\">SSR Error: x is not defined</div>"}"#;
        match parse_render_payload(payload, "home/index.svelte") {
            RenderOutcome::Failed {
                error,
                fallback_html,
            } => {
                assert!(error.to_string().contains("x is not defined"));
                assert_eq!(error.stack(), Some("at render"));
                assert!(fallback_html.contains("ssr-error"));
            }
            RenderOutcome::Rendered { .. } => panic!("expected the error arm"),
        }
    }

    #[test]
    fn test_parse_payload_css_shapes() {
        let object_css = r#"{"html":"<p>a</p>","head":"","css":{"code":"p {}"}}"#;
        match parse_render_payload(object_css, "t") {
            RenderOutcome::Rendered { css, .. } => assert_eq!(css, "p {}"),
            RenderOutcome::Failed { .. } => panic!("unexpected failure"),
        }

        let bare_css = r#"{"html":"<p>a</p>","css":"p { margin: 0; }"}"#;
        match parse_render_payload(bare_css, "t") {
            RenderOutcome::Rendered { css, head, .. } => {
                assert_eq!(css, "p { margin: 0; }");
                assert_eq!(head, "");
            }
            RenderOutcome::Failed { .. } => panic!("unexpected failure"),
        }
    }

    #[test]
    fn test_parse_payload_rejects_non_json() {
        let outcome = parse_render_payload("[object Object]", "t");
        match outcome {
            RenderOutcome::Failed { error, .. } => {
                assert!(error.to_string().contains("not valid JSON"));
            }
            RenderOutcome::Rendered { .. } => panic!("expected a failure"),
        }
    }

    #[test]
    fn test_encode_js_string_escapes() {
        assert_eq!(encode_js_string("a\"b"), r#""a\"b""#);
        assert_eq!(encode_js_string("line\nbreak"), r#""line\nbreak""#);
    }
}
