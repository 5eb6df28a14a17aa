//! PTY session lifecycle
//!
//! A session owns one spawned shell attached to an OS pseudo-terminal and
//! the two background threads that service it: the output pump (blocking
//! reads delivered to the output sink) and the exit watcher (blocking wait
//! on the child). PTY reads and process waits both block indefinitely, so
//! each gets a dedicated thread; teardown works by killing the child and
//! closing the PTY, which unblocks whichever call is in flight.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::flow::FlowGate;
use crate::config::SessionConfig;

/// Unique identifier for a session. Opaque; callers may supply their own.
pub type SessionId = String;

/// Callback invoked from the pump thread with each output chunk.
///
/// Shared across all sessions; a slow sink stalls only the session whose
/// pump invoked it.
pub type OutputSink = Arc<dyn Fn(&SessionId, &[u8]) + Send + Sync>;

/// Callback invoked exactly once from the exit-watcher thread when the
/// child process terminates.
pub type ExitSink = Arc<dyn Fn(&SessionId) + Send + Sync>;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to open PTY: {0}")]
    OpenPty(String),

    #[error("failed to spawn shell: {0}")]
    Spawn(String),

    #[error("failed to write to PTY: {0}")]
    Write(String),

    #[error("failed to resize PTY: {0}")]
    Resize(String),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Read chunk size for the output pump.
const READ_CHUNK: usize = 4096;

/// Snapshot of a session's metadata for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Human-readable session name.
    pub name: String,
    /// Working directory the shell was started in.
    pub workdir: PathBuf,
    /// Whether the child process is still alive.
    pub running: bool,
}

/// One shell process attached to a pseudo-terminal.
///
/// The PTY and process handles are owned exclusively by the session and
/// reachable only through its methods. `running` is monotonic: once the
/// exit watcher or `close` flips it to false it never becomes true again.
pub struct Session {
    id: SessionId,
    name: String,
    workdir: PathBuf,

    /// Master side of the PTY; `None` once closed.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    /// Input half of the PTY; `None` once closed.
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    /// Cloned killer so `close` never contends with the watcher's `wait`.
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,

    running: AtomicBool,
    gate: FlowGate,
}

impl Session {
    /// Spawn a shell on a fresh PTY and start its background threads.
    ///
    /// The shell is resolved from `config` (explicit path, then `$SHELL`,
    /// then `/bin/sh`), started in `workdir` with color-capability
    /// environment variables set, and sized to the configured default.
    /// On failure no threads are started and nothing is registered.
    pub fn spawn(
        id: SessionId,
        name: String,
        workdir: PathBuf,
        config: &SessionConfig,
        output: OutputSink,
        exit: ExitSink,
    ) -> SessionResult<Arc<Self>> {
        if !workdir.is_dir() {
            return Err(SessionError::Spawn(format!(
                "working directory does not exist: {}",
                workdir.display()
            )));
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::OpenPty(e.to_string()))?;

        let cmd = build_shell_command(config, &workdir);
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        // Only the master side is needed from here on
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        let killer = child.clone_killer();

        let session = Arc::new(Self {
            id,
            name,
            workdir,
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(Some(writer)),
            killer: Mutex::new(killer),
            running: AtomicBool::new(true),
            gate: FlowGate::new(),
        });

        start_output_pump(&session, reader, output);
        start_exit_watcher(&session, child, exit);

        info!(
            "Spawned session {} ({}) in {}",
            session.id,
            session.name,
            session.workdir.display()
        );

        Ok(session)
    }

    /// The session's unique identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The session's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shell's working directory.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Whether the child process is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether output delivery is currently paused.
    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Metadata snapshot for listings.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            workdir: self.workdir.clone(),
            running: self.is_running(),
        }
    }

    /// Deliver bytes to the shell's input. Never gated by pause.
    pub fn write(&self, data: &[u8]) -> SessionResult<()> {
        let mut guard = lock(&self.writer);
        let writer = guard
            .as_mut()
            .ok_or_else(|| SessionError::Write("session is closed".to_string()))?;
        writer
            .write_all(data)
            .map_err(|e| SessionError::Write(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SessionError::Write(e.to_string()))?;
        Ok(())
    }

    /// Change the PTY's window size, notifying the child. Never gated by
    /// pause and independent of ongoing output delivery.
    pub fn resize(&self, rows: u16, cols: u16) -> SessionResult<()> {
        let guard = lock(&self.master);
        let master = guard
            .as_ref()
            .ok_or_else(|| SessionError::Resize("session is closed".to_string()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Resize(e.to_string()))?;
        debug!("Resized session {} to {}x{}", self.id, rows, cols);
        Ok(())
    }

    /// Pause output delivery. Takes effect at the pump's next iteration;
    /// the kernel PTY buffer then backpressures the child once full.
    pub fn pause(&self) {
        debug!("Pausing output for session {}", self.id);
        self.gate.pause();
    }

    /// Resume output delivery, waking the pump if blocked.
    pub fn resume(&self) {
        debug!("Resuming output for session {}", self.id);
        self.gate.resume();
    }

    /// Tear down the session: kill the child (best-effort, it may already
    /// be gone), close the PTY, and mark the session stopped. Closing the
    /// PTY makes the pump's blocked read return, so no thread leaks.
    /// Idempotent.
    pub fn close(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("Closing session {}", self.id);
        }

        self.gate.release();

        if let Err(e) = lock(&self.killer).kill() {
            debug!("Kill for session {} ignored: {}", self.id, e);
        }

        *lock(&self.writer) = None;
        // Dropping the master closes the PTY file descriptor
        *lock(&self.master) = None;
    }
}

/// Start the thread that pumps PTY output to the output sink.
///
/// Loop: wait while paused, blocking read of up to [`READ_CHUNK`] bytes,
/// deliver. EOF and read errors are the pump's termination signal and are
/// not surfaced; chunks are delivered in PTY read order.
fn start_output_pump(session: &Arc<Session>, mut reader: Box<dyn Read + Send>, output: OutputSink) {
    let session = Arc::clone(session);
    thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if !session.gate.wait_until_flowing() {
                debug!("Output pump for session {} released", session.id);
                break;
            }
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("Output pump for session {} reached EOF", session.id);
                    break;
                }
                Ok(n) => output(&session.id, &buf[..n]),
                Err(e) => {
                    debug!("Output pump for session {} stopped: {}", session.id, e);
                    break;
                }
            }
        }
    });
}

/// Start the thread that waits for the child to terminate, flips `running`
/// and fires the exit sink. The sink is invoked exactly once per session:
/// this thread is its only caller and it runs once, whether the child died
/// on its own or was killed by `close`.
fn start_exit_watcher(
    session: &Arc<Session>,
    mut child: Box<dyn Child + Send + Sync>,
    exit: ExitSink,
) {
    let session = Arc::clone(session);
    thread::spawn(move || {
        match child.wait() {
            Ok(status) => info!(
                "Session {} exited with code {}",
                session.id,
                status.exit_code()
            ),
            Err(e) => warn!("Wait for session {} failed: {}", session.id, e),
        }
        session.running.store(false, Ordering::SeqCst);
        exit(&session.id);
    });
}

/// Build the shell command for a session: resolved shell, login flag,
/// working directory, and color-capability environment.
fn build_shell_command(config: &SessionConfig, workdir: &Path) -> CommandBuilder {
    let shell = config.resolve_shell();
    let mut cmd = CommandBuilder::new(&shell);
    if config.login_shell {
        cmd.arg("-l");
    }
    cmd.cwd(workdir);
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    cmd
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
