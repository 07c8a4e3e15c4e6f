//! The rendering server.
//!
//! `lumo serve` wires the whole pipeline: toolchain probe, runtime
//! bundles, the render orchestrator, the HTTP server with its request
//! pool, and (in watch mode) the file watcher. Every inbound request is
//! dispatched either to the asset responder or the orchestrator and
//! always answered with a complete response.

mod lifecycle;
mod response;
mod watch;

pub use lifecycle::setup_shutdown_handler;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam::channel;
use tiny_http::{Request, Server};

use crate::assets;
use crate::config::{AppConfig, cfg};
use crate::render::{self, RenderOrchestrator};
use crate::runtime::bootstrap::ensure_runtime_bundles;
use crate::{debug, log};

/// Start the server (blocking until shutdown).
pub fn run(config: &AppConfig) -> Result<()> {
    probe_toolchain()?;
    ensure_runtime_bundles(config)?;

    let orchestrator = Arc::new(RenderOrchestrator::new(config)?);

    let (server, addr) = lifecycle::bind_with_retry(config.serve.interface, config.serve.port)?;
    let server = Arc::new(server);
    let (shutdown_tx, shutdown_rx) = channel::unbounded::<()>();
    lifecycle::register_server(Arc::clone(&server), shutdown_tx);

    log!("serve"; "http://{addr}");
    debug!("serve"; "dev mode: {}, watch: {}", config.compiler.dev, config.serve.watch);

    let watcher = watch::spawn_watcher(Arc::clone(&orchestrator), shutdown_rx);

    run_request_loop(&server, &orchestrator);
    lifecycle::wait_for_shutdown(watcher);
    Ok(())
}

/// The compile worker and the bundler shell out to node; failing here
/// beats failing on the first request.
fn probe_toolchain() -> Result<()> {
    which::which("node")
        .context("'node' not found in PATH; the component compiler requires it")?;
    if which::which("npx").is_err() {
        log!("warning"; "'npx' not found in PATH; runtime bundles and package imports cannot be built");
    }
    Ok(())
}

fn run_request_loop(server: &Server, orchestrator: &Arc<RenderOrchestrator>) {
    // Use a thread pool to handle requests concurrently, so one slow
    // compile does not block other requests.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .expect("failed to create thread pool");

    for request in server.incoming_requests() {
        let orchestrator = Arc::clone(orchestrator);
        pool.spawn(move || {
            if let Err(e) = handle_request(request, &orchestrator) {
                log!("serve"; "request error: {e}");
            }
        });
    }
}

/// Handle a single HTTP request.
fn handle_request(request: Request, orchestrator: &RenderOrchestrator) -> Result<()> {
    if lifecycle::is_shutdown() {
        return response::respond_unavailable(request);
    }

    if assets::is_asset_url(request.url()) {
        let config = cfg();
        assets::respond(request, orchestrator.registries(), &config);
        return Ok(());
    }

    let url = request.url().to_owned();
    let path = url.split('?').next().unwrap_or(&url).to_owned();

    // The pipeline converts every failure it knows about into an error
    // document itself; this boundary only catches the unexpected.
    let document = catch_unwind(AssertUnwindSafe(|| orchestrator.handle(&path)))
        .unwrap_or_else(|_| {
            log!("error"; "render panicked for {path}");
            render::server_error_document("unexpected server error")
        });

    response::respond_document(request, document)
}
