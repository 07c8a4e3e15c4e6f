//! Runtime bundle bootstrap.
//!
//! The render pipeline needs two support bundles built from the project's
//! own `node_modules/svelte`:
//!
//! | Bundle                   | Form | Consumer                          |
//! |--------------------------|------|-----------------------------------|
//! | `dist/runtime/server.js` | iife | engine composite script           |
//! | `dist/runtime/client.js` | esm  | hydration module, via `/assets/`  |
//!
//! Both are built at serve startup when missing. The server bundle is
//! required: without it no render can run, so a build failure there is
//! fatal. The client bundle only degrades hydration, so its failure is
//! logged and serving continues.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::utils::exec::{Cmd, ESBUILD_FILTER};
use crate::{debug, log};

const SERVER_ENTRY: &str = include_str!("js/server_entry.mjs");
const CLIENT_ENTRY: &str = include_str!("js/client_entry.mjs");

/// Build the runtime bundles that are not already on disk.
///
/// Returns an error only when the server bundle cannot be produced.
pub fn ensure_runtime_bundles(config: &AppConfig) -> Result<()> {
    let server = config.paths.server_runtime();
    if server.exists() {
        debug!("serve"; "runtime bundle present: {}", config.root_relative(&server).display());
    } else {
        build_bundle(config, SERVER_ENTRY, &server, "--format=iife")
            .context("failed to build the server runtime bundle (is 'svelte' installed?)")?;
        log!("serve"; "built runtime bundle {}", config.root_relative(&server).display());
    }

    let client = config.paths.client_runtime();
    if client.exists() {
        debug!("serve"; "runtime bundle present: {}", config.root_relative(&client).display());
    } else {
        match build_bundle(config, CLIENT_ENTRY, &client, "--format=esm") {
            Ok(()) => {
                log!("serve"; "built runtime bundle {}", config.root_relative(&client).display());
            }
            Err(err) => {
                log!("warning"; "client runtime bundle failed, hydration disabled: {err:#}");
            }
        }
    }

    Ok(())
}

/// Run esbuild over an embedded entry file.
///
/// The entry is materialized in the project root so package resolution
/// uses the project's `node_modules`. Both bundles run outside node (the
/// embedded engine, the browser), so neither is built with node
/// assumptions.
fn build_bundle(config: &AppConfig, entry_source: &str, outfile: &Path, format: &str) -> Result<()> {
    if let Some(parent) = outfile.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut entry = tempfile::Builder::new()
        .prefix(".lumo-runtime-")
        .suffix(".mjs")
        .tempfile_in(config.get_root())
        .context("failed to create the runtime entry file")?;
    entry.write_all(entry_source.as_bytes())?;
    entry.flush()?;

    Cmd::from_slice(&["npx", "esbuild"])
        .arg(entry.path())
        .args(["--bundle", "--target=es2020", "--platform=browser", format])
        .arg(format!("--outfile={}", outfile.display()))
        .cwd(config.get_root())
        .filter(&ESBUILD_FILTER)
        .run()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_entry_publishes_global() {
        assert!(SERVER_ENTRY.contains("globalThis.SvelteServer"));
        assert!(SERVER_ENTRY.contains("svelte/internal/server"));
    }

    #[test]
    fn test_client_entry_reexports_mount() {
        assert!(CLIENT_ENTRY.contains("svelte/internal/client"));
        assert!(CLIENT_ENTRY.contains("mount"));
    }
}
