//! ptyhub — concurrent PTY session manager
//!
//! Spawns shell processes attached to OS pseudo-terminals, streams their
//! output through caller-supplied callbacks in real time, and routes input,
//! resize, pause/resume and close operations to sessions by ID. Each live
//! session runs two background threads: an output pump doing blocking PTY
//! reads and an exit watcher blocked on the child process. Pausing a
//! session stops draining its PTY so the kernel buffer backpressures the
//! child — cooperative flow control without an explicit buffering layer.
//!
//! The transport layer is a consumer of this crate, not part of it: a
//! [`SessionRegistry`] is constructed with one output sink and one exit
//! sink, shared by every session it creates.
//!
//! ```no_run
//! use ptyhub::{SessionConfig, SessionRegistry};
//!
//! let registry = SessionRegistry::new(
//!     SessionConfig::default(),
//!     |id: &String, bytes: &[u8]| print!("{id}: {}", String::from_utf8_lossy(bytes)),
//!     |id: &String| println!("{id} exited"),
//! );
//! let id = registry.create("build shell", "/tmp")?;
//! registry.write(&id, b"make\n")?;
//! registry.close(&id);
//! # Ok::<(), ptyhub::RegistryError>(())
//! ```

pub mod config;
pub mod session;

pub use config::{ConfigError, SessionConfig};
pub use session::{
    ExitSink, OutputSink, RegistryError, RegistryResult, Session, SessionError, SessionId,
    SessionInfo, SessionRegistry, SessionResult,
};
