//! PTY session management
//!
//! Sessions pair a spawned shell with a pseudo-terminal and a pair of
//! background threads; the registry owns the live set and routes
//! operations to sessions by ID.

mod flow;
mod pty;
mod registry;

pub use pty::{
    ExitSink, OutputSink, Session, SessionError, SessionId, SessionInfo, SessionResult,
};
pub use registry::{RegistryError, RegistryResult, SessionRegistry};
