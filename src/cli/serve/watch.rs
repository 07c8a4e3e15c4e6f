//! File watching for cache invalidation and config hot reload.
//!
//! One watcher thread covers the whole project surface:
//!
//! | Change                  | Effect                                       |
//! |-------------------------|----------------------------------------------|
//! | `app/templates/**`      | transitive resolver invalidation             |
//! | `app/controllers/**`    | controller cache cleared                     |
//! | `app/routes.toml`       | route table reloaded                         |
//! | `lumo.toml`             | config hot reload (content-hash guarded)     |
//!
//! Nothing recompiles eagerly; invalidation only makes the next request
//! do the work.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, select, unbounded};
use notify::{Event, RecursiveMode, Watcher};

use crate::config::{cfg, reload_config};
use crate::logger::{status_error, status_success, status_unchanged};
use crate::render::RenderOrchestrator;
use crate::{debug, log};

/// Start the watcher thread when watch mode is enabled.
pub fn spawn_watcher(
    orchestrator: Arc<RenderOrchestrator>,
    shutdown_rx: Receiver<()>,
) -> Option<JoinHandle<()>> {
    if !cfg().serve.watch {
        return None;
    }
    Some(thread::spawn(move || watch_loop(&orchestrator, &shutdown_rx)))
}

fn watch_loop(orchestrator: &RenderOrchestrator, shutdown_rx: &Receiver<()>) {
    let config = cfg();
    let (notify_tx, events) = unbounded();

    let mut watcher = match notify::recommended_watcher(move |res| {
        let _ = notify_tx.send(res);
    }) {
        Ok(watcher) => watcher,
        Err(err) => {
            log!("watch"; "failed to start file watcher: {err}");
            return;
        }
    };

    // Skip paths that do not exist yet; a fresh project may lack some.
    let targets = [
        (&config.paths.templates, RecursiveMode::Recursive),
        (&config.paths.controllers, RecursiveMode::Recursive),
        (&config.paths.routes, RecursiveMode::NonRecursive),
        (&config.config_path, RecursiveMode::NonRecursive),
    ];
    for (path, mode) in targets {
        if path.exists()
            && let Err(err) = watcher.watch(path, mode)
        {
            log!("watch"; "cannot watch {}: {err}", path.display());
        }
    }
    log!("watch"; "watching {} for changes", config.root_relative(&config.paths.templates).display());

    loop {
        select! {
            recv(shutdown_rx) -> _ => {
                debug!("watch"; "watcher stopped");
                return;
            }
            recv(events) -> msg => match msg {
                Ok(Ok(event)) => handle_event(orchestrator, &event),
                Ok(Err(err)) => debug!("watch"; "watch error: {err}"),
                Err(_) => return,
            }
        }
    }
}

/// Editor temp files churn constantly; none of them feed a render.
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    matches!(ext, "bck" | "bak" | "swp" | "swo" | "tmp") || name.ends_with('~') || name.starts_with('.')
}

fn handle_event(orchestrator: &RenderOrchestrator, event: &Event) {
    if !(event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove()) {
        return;
    }

    let config = cfg();
    for path in &event.paths {
        if is_temp_file(path) {
            continue;
        }

        if *path == config.config_path {
            match reload_config() {
                Ok(true) => {
                    // Compile flags may have changed; cached artifacts are stale.
                    orchestrator.resolver().clear();
                    orchestrator.controllers().clear();
                    status_success("reloaded lumo.toml");
                }
                Ok(false) => status_unchanged("lumo.toml unchanged"),
                Err(err) => status_error("config reload failed", &format!("{err:#}")),
            }
        } else if *path == config.paths.routes {
            match orchestrator.reload_routes(&config.paths.routes) {
                Ok(()) => status_success("reloaded routes"),
                Err(err) => status_error("invalid routes file", &err.to_string()),
            }
        } else if path.starts_with(&config.paths.controllers) {
            orchestrator.controllers().clear();
            status_success(&format!(
                "reloaded {}",
                config.root_relative(path).display()
            ));
        } else if path.starts_with(&config.paths.templates) {
            orchestrator.resolver().invalidate(path);
            status_success(&format!(
                "invalidated {}",
                config.root_relative(path).display()
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_temp_files_skipped() {
        assert!(is_temp_file(Path::new("/p/app/templates/.index.svelte.swp")));
        assert!(is_temp_file(Path::new("/p/app/templates/index.svelte~")));
        assert!(is_temp_file(Path::new("/p/app/templates/index.svelte.bak")));
        assert!(!is_temp_file(&PathBuf::from("/p/app/templates/index.svelte")));
    }
}
