//! Compile worker process management.
//!
//! The Svelte compiler runs in a long-lived node process speaking a
//! JSON-lines protocol over stdin/stdout (see `worker.mjs`). One worker
//! serves the whole server; a mutex serializes request/response pairs.
//!
//! A dead or wedged worker fails the in-flight request and is dropped;
//! the next request starts a fresh one. Requests are never retried
//! automatically.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::debug;

/// The worker script, embedded at build time and materialized under
/// `dist/.lumo/` so node can resolve the project's Svelte install.
const WORKER_SOURCE: &str = include_str!("worker.mjs");

/// A spawned worker with its pipe ends.
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    fn spawn_with(mut command: Command) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to start node (is node on your PATH?)")?;

        let stdin = child.stdin.take().context("worker stdin unavailable")?;
        let stdout = BufReader::new(child.stdout.take().context("worker stdout unavailable")?);

        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    fn kill(&mut self) {
        self.child.kill().ok();
        self.child.wait().ok();
    }
}

/// Handle to the long-lived compile worker.
pub struct CompileWorker {
    project_root: PathBuf,
    script_path: PathBuf,
    /// Running worker; `None` until the first request or after a death.
    process: Mutex<Option<WorkerProcess>>,
}

impl CompileWorker {
    pub fn new(project_root: PathBuf, script_path: PathBuf) -> Self {
        Self {
            project_root,
            script_path,
            process: Mutex::new(None),
        }
    }

    /// Send one request line, receive one response line.
    ///
    /// Spawns the worker on first use. On any I/O failure the worker is
    /// discarded so the next call respawns it.
    pub fn request(&self, line: &str) -> Result<String> {
        let mut guard = self.process.lock();

        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }
        let worker = guard.as_mut().context("compile worker unavailable")?;

        let result = Self::round_trip(worker, line);
        if result.is_err() {
            if let Some(mut dead) = guard.take() {
                dead.kill();
            }
        }
        result
    }

    fn round_trip(worker: &mut WorkerProcess, line: &str) -> Result<String> {
        worker
            .stdin
            .write_all(line.as_bytes())
            .context("failed to write to compile worker")?;
        worker.stdin.write_all(b"\n")?;
        worker.stdin.flush()?;

        let mut response = String::new();
        let read = worker
            .stdout
            .read_line(&mut response)
            .context("failed to read from compile worker")?;
        if read == 0 {
            anyhow::bail!("compile worker exited unexpectedly");
        }
        Ok(response)
    }

    fn spawn(&self) -> Result<WorkerProcess> {
        self.materialize_script()?;
        debug!("render"; "starting compile worker: {}", self.script_path.display());

        let mut command = Command::new("node");
        command.arg(&self.script_path).current_dir(&self.project_root);
        WorkerProcess::spawn_with(command)
    }

    /// Write the embedded worker script, refreshing a stale copy left by
    /// an older binary.
    fn materialize_script(&self) -> Result<()> {
        if let Ok(existing) = fs::read_to_string(&self.script_path) {
            if existing == WORKER_SOURCE {
                return Ok(());
            }
        }
        if let Some(parent) = self.script_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&self.script_path, WORKER_SOURCE)
            .with_context(|| format!("failed to write {}", self.script_path.display()))?;
        Ok(())
    }
}

impl Drop for CompileWorker {
    fn drop(&mut self) {
        if let Some(mut worker) = self.process.lock().take() {
            worker.kill();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_line_protocol() {
        // `cat` mirrors one line back per line in, like the worker does.
        let mut worker = WorkerProcess::spawn_with(Command::new("cat")).unwrap();
        let response = CompileWorker::round_trip(&mut worker, r#"{"ping":1}"#).unwrap();
        assert_eq!(response.trim(), r#"{"ping":1}"#);

        let response = CompileWorker::round_trip(&mut worker, "second").unwrap();
        assert_eq!(response.trim(), "second");
        worker.kill();
    }

    #[test]
    fn test_dead_worker_is_an_error() {
        let mut worker = WorkerProcess::spawn_with(Command::new("true")).unwrap();
        // Give the process a moment to exit.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(CompileWorker::round_trip(&mut worker, "anything").is_err());
    }

    #[test]
    fn test_materialize_script_refreshes_stale_copy() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join(".lumo/compile-worker.mjs");
        let worker = CompileWorker::new(dir.path().to_path_buf(), script.clone());

        worker.materialize_script().unwrap();
        assert_eq!(fs::read_to_string(&script).unwrap(), WORKER_SOURCE);

        fs::write(&script, "// stale").unwrap();
        worker.materialize_script().unwrap();
        assert_eq!(fs::read_to_string(&script).unwrap(), WORKER_SOURCE);
    }
}
