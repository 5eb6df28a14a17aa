//! Session registry
//!
//! Owns the set of live sessions keyed by ID and routes operations to
//! them. The map lock guards membership only and is never held across
//! blocking I/O: spawning happens before insertion, closing happens on a
//! snapshot after removal, and write/resize clone the session handle out
//! before touching the PTY.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pty::{ExitSink, OutputSink, Session, SessionError, SessionId, SessionInfo};
use crate::config::SessionConfig;

/// Errors that can occur during registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registry of live PTY sessions.
///
/// Constructed once with the output and exit sinks shared by every
/// session it creates; there is no hidden global instance. The registry
/// outlives individual sessions and stays usable after `close_all`.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    config: SessionConfig,
    output: OutputSink,
    exit: ExitSink,
}

impl SessionRegistry {
    /// Create a registry. The sinks are set once here and shared read-only
    /// across all sessions; the output sink is invoked from each session's
    /// pump thread and must tolerate concurrent calls.
    pub fn new(
        config: SessionConfig,
        output: impl Fn(&SessionId, &[u8]) + Send + Sync + 'static,
        exit: impl Fn(&SessionId) + Send + Sync + 'static,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            output: Arc::new(output),
            exit: Arc::new(exit),
        }
    }

    /// Create a session with a freshly generated unique ID.
    pub fn create(&self, name: &str, workdir: impl Into<PathBuf>) -> RegistryResult<SessionId> {
        let id = Uuid::new_v4().to_string();
        self.create_with_id(&id, name, workdir)?;
        Ok(id)
    }

    /// Create a session under a caller-supplied ID.
    ///
    /// Spawning happens outside the map lock; on failure no entry is
    /// registered. If the caller reuses the ID of a live session, the
    /// displaced session is closed rather than leaked.
    pub fn create_with_id(
        &self,
        id: &str,
        name: &str,
        workdir: impl Into<PathBuf>,
    ) -> RegistryResult<()> {
        let session = Session::spawn(
            id.to_string(),
            name.to_string(),
            workdir.into(),
            &self.config,
            Arc::clone(&self.output),
            Arc::clone(&self.exit),
        )?;

        let displaced = self.write_lock().insert(id.to_string(), session);
        if let Some(old) = displaced {
            warn!("Session ID {} reused; closing the previous session", id);
            old.close();
        }

        Ok(())
    }

    /// Look up a session by ID.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.read_lock().get(id).map(Arc::clone)
    }

    /// Snapshot of all registered sessions' metadata. Sessions whose child
    /// already exited stay listed (with `running: false`) until closed.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.read_lock().values().map(|s| s.info()).collect()
    }

    /// Number of registered sessions.
    pub fn count(&self) -> usize {
        self.read_lock().len()
    }

    /// Deliver bytes to a session's input.
    pub fn write(&self, id: &str, data: &[u8]) -> RegistryResult<()> {
        let session = self
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        session.write(data)?;
        debug!("Wrote {} bytes to session {}", data.len(), id);
        Ok(())
    }

    /// Resize a session's PTY window.
    pub fn resize(&self, id: &str, rows: u16, cols: u16) -> RegistryResult<()> {
        let session = self
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        session.resize(rows, cols)?;
        Ok(())
    }

    /// Pause output delivery for a session. Advisory: unknown IDs are a
    /// no-op, not an error.
    pub fn pause(&self, id: &str) {
        if let Some(session) = self.get(id) {
            session.pause();
        }
    }

    /// Resume output delivery for a session. Advisory like [`pause`].
    ///
    /// [`pause`]: SessionRegistry::pause
    pub fn resume(&self, id: &str) {
        if let Some(session) = self.get(id) {
            session.resume();
        }
    }

    /// Remove a session and tear down its OS resources. Idempotent;
    /// unknown IDs are a no-op.
    pub fn close(&self, id: &str) {
        let removed = self.write_lock().remove(id);
        if let Some(session) = removed {
            session.close();
            info!("Closed session {}", id);
        }
    }

    /// Atomically drain the registry, then close every snapshotted
    /// session. The registry remains usable for further creates.
    pub fn close_all(&self) {
        let drained: Vec<(SessionId, Arc<Session>)> =
            self.write_lock().drain().collect();
        if drained.is_empty() {
            return;
        }
        info!("Closing {} session(s)", drained.len());
        for (id, session) in drained {
            session.close();
            debug!("Closed session {}", id);
        }
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    fn test_config() -> SessionConfig {
        SessionConfig::default()
            .with_shell("/bin/sh")
            .with_login_shell(false)
    }

    struct Harness {
        registry: SessionRegistry,
        bytes: Arc<Mutex<Vec<u8>>>,
        exits: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let exits = Arc::new(AtomicUsize::new(0));
        let bytes_sink = Arc::clone(&bytes);
        let exits_sink = Arc::clone(&exits);
        let registry = SessionRegistry::new(
            test_config(),
            move |_id: &SessionId, data: &[u8]| {
                bytes_sink.lock().unwrap().extend_from_slice(data)
            },
            move |_id: &SessionId| {
                exits_sink.fetch_add(1, Ordering::SeqCst);
            },
        );
        Harness {
            registry,
            bytes,
            exits,
        }
    }

    impl Harness {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.bytes.lock().unwrap()).into_owned()
        }
    }

    fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_create_returns_unique_ids() {
        let h = harness();
        let mut ids = HashSet::new();
        for _ in 0..3 {
            let id = h.registry.create("shell", "/tmp").unwrap();
            assert!(ids.insert(id), "duplicate session ID");
        }
        assert_eq!(h.registry.count(), 3);
        h.registry.close_all();
    }

    #[test]
    fn test_list_after_creates() {
        let h = harness();
        let id1 = h.registry.create("first", "/tmp").unwrap();
        let id2 = h.registry.create("second", "/tmp").unwrap();

        let infos = h.registry.list();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|i| i.running));
        let ids: HashSet<_> = infos.iter().map(|i| i.id.clone()).collect();
        assert!(ids.contains(&id1) && ids.contains(&id2));

        h.registry.close_all();
    }

    #[test]
    fn test_create_failure_registers_nothing() {
        let h = harness();
        let result = h.registry.create("bad", "/nonexistent/path/for/sure");
        assert!(matches!(
            result,
            Err(RegistryError::Session(SessionError::Spawn(_)))
        ));
        assert_eq!(h.registry.count(), 0);
    }

    #[test]
    fn test_create_with_id_and_get() {
        let h = harness();
        h.registry
            .create_with_id("my-session", "shell", "/tmp")
            .unwrap();

        let session = h.registry.get("my-session").expect("session missing");
        assert_eq!(session.id(), "my-session");
        assert_eq!(session.name(), "shell");
        assert!(session.is_running());

        h.registry.close_all();
    }

    #[test]
    fn test_create_with_id_reuse_closes_displaced() {
        let h = harness();
        h.registry.create_with_id("dup", "first", "/tmp").unwrap();
        let first = h.registry.get("dup").unwrap();

        h.registry.create_with_id("dup", "second", "/tmp").unwrap();
        assert_eq!(h.registry.count(), 1);
        assert!(!first.is_running());
        assert_eq!(h.registry.get("dup").unwrap().name(), "second");

        h.registry.close_all();
    }

    #[test]
    fn test_write_not_found() {
        let h = harness();
        let result = h.registry.write("nonexistent", b"hello");
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_resize_not_found() {
        let h = harness();
        let result = h.registry.resize("nonexistent", 40, 120);
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_pause_resume_unknown_id_is_noop() {
        let h = harness();
        h.registry.pause("nonexistent");
        h.registry.resume("nonexistent");
    }

    #[test]
    fn test_close_unknown_id_is_noop() {
        let h = harness();
        h.registry.close("nonexistent");
        assert_eq!(h.registry.count(), 0);
    }

    #[test]
    fn test_close_removes_and_is_idempotent() {
        let h = harness();
        let id = h.registry.create("shell", "/tmp").unwrap();
        assert_eq!(h.registry.count(), 1);

        h.registry.close(&id);
        assert_eq!(h.registry.count(), 0);
        assert!(h.registry.get(&id).is_none());

        h.registry.close(&id);
        assert_eq!(h.registry.count(), 0);
    }

    #[test]
    fn test_close_all_empties_and_registry_stays_usable() {
        let h = harness();
        h.registry.create("a", "/tmp").unwrap();
        h.registry.create("b", "/tmp").unwrap();
        h.registry.create("c", "/tmp").unwrap();

        h.registry.close_all();
        assert_eq!(h.registry.count(), 0);
        assert!(h.registry.list().is_empty());

        let id = h.registry.create("after", "/tmp").unwrap();
        assert!(h.registry.get(&id).is_some());
        h.registry.close_all();
    }

    #[test]
    fn test_write_roundtrip_through_callback() {
        let h = harness();
        let id = h.registry.create("echoer", "/tmp").unwrap();

        h.registry
            .write(&id, b"echo registry_roundtrip_marker\n")
            .unwrap();
        assert!(
            wait_for(
                || h.text().contains("registry_roundtrip_marker"),
                Duration::from_secs(5)
            ),
            "output never arrived, got: {:?}",
            h.text()
        );

        h.registry.close_all();
    }

    #[test]
    fn test_resize_does_not_interrupt_delivery() {
        let h = harness();
        let id = h.registry.create("shell", "/tmp").unwrap();

        h.registry.write(&id, b"echo before_resize\n").unwrap();
        h.registry.resize(&id, 50, 132).unwrap();
        h.registry.write(&id, b"echo after_resize\n").unwrap();

        assert!(wait_for(
            || {
                let text = h.text();
                text.contains("before_resize") && text.contains("after_resize")
            },
            Duration::from_secs(5)
        ));

        h.registry.close_all();
    }

    #[test]
    fn test_exited_session_lingers_until_closed() {
        let h = harness();
        let id = h.registry.create("shortlived", "/tmp").unwrap();

        h.registry.write(&id, b"exit 0\n").unwrap();
        assert!(
            wait_for(
                || h.registry.get(&id).is_some_and(|s| !s.is_running()),
                Duration::from_secs(5)
            ),
            "session never exited"
        );
        assert!(wait_for(
            || h.exits.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        ));

        // The entry is not auto-evicted on exit
        let infos = h.registry.list();
        assert_eq!(infos.len(), 1);
        assert!(!infos[0].running);

        h.registry.close(&id);
        assert!(h.registry.list().is_empty());
    }

    #[test]
    fn test_exit_callback_once_when_close_races_natural_exit() {
        let h = harness();
        let id = h.registry.create("racer", "/tmp").unwrap();

        let _ = h.registry.write(&id, b"exit 0\n");
        h.registry.close(&id);

        assert!(wait_for(
            || h.exits.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(5)
        ));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(h.exits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_sessions_deliver_independently() {
        // Per-session collectors keyed by ID through a shared sink
        let outputs: Arc<Mutex<HashMap<SessionId, Vec<u8>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let sink = Arc::clone(&outputs);
        let registry = SessionRegistry::new(
            test_config(),
            move |id: &SessionId, data: &[u8]| {
                sink.lock()
                    .unwrap()
                    .entry(id.clone())
                    .or_default()
                    .extend_from_slice(data);
            },
            |_id: &SessionId| {},
        );

        let id1 = registry.create("one", "/tmp").unwrap();
        let id2 = registry.create("two", "/tmp").unwrap();

        registry.write(&id1, b"echo marker_alpha\n").unwrap();
        registry.write(&id2, b"echo marker_beta\n").unwrap();

        let text_of = |id: &SessionId| {
            let guard = outputs.lock().unwrap();
            guard
                .get(id)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default()
        };
        assert!(wait_for(
            || text_of(&id1).contains("marker_alpha") && text_of(&id2).contains("marker_beta"),
            Duration::from_secs(5)
        ));
        assert!(!text_of(&id1).contains("marker_beta"));
        assert!(!text_of(&id2).contains("marker_alpha"));

        registry.close_all();
    }

    #[test]
    fn test_pause_is_per_session() {
        let h = harness();
        let paused_id = h.registry.create("paused", "/tmp").unwrap();
        let live_id = h.registry.create("live", "/tmp").unwrap();

        h.registry.pause(&paused_id);
        h.registry.write(&live_id, b"echo live_marker\n").unwrap();

        assert!(wait_for(
            || h.text().contains("live_marker"),
            Duration::from_secs(5)
        ));

        h.registry.resume(&paused_id);
        h.registry.close_all();
    }
}
