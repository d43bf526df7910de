//! The session-id-to-backing map and the per-session output path.
//!
//! Each live session gets a dedicated OS thread for PTY reads, because the
//! reads block. The reader thread owns the PTY reader directly (never the
//! map lock), forwards output chunks in order through the session's
//! channel, and removes the session from the map when the process exits.
//!
//! Writes can block too (a process that stops reading its tty while the
//! input buffer fills), so each backing sits behind its own lock. The map
//! lock is only ever held to look a handle up or move it in or out of the
//! map, never across process I/O.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::fallback::FallbackShell;
use crate::pty::{PtyError, PtyHandle, SpawnConfig};

/// Channel end that receives shell output chunks for one session.
pub type OutputSender = mpsc::UnboundedSender<String>;

/// Initial PTY geometry. Mobile-first: the client sends an authoritative
/// resize right after connecting, so only the first paint uses this.
pub const INITIAL_COLS: u16 = 38;
pub const INITIAL_ROWS: u16 = 20;

/// The capability set shared by a real PTY session and the fallback shell.
/// Gateway and tmux helper code depends only on this, never on the variant.
pub trait TerminalBacking: Send {
    /// OS process id, or a negative sentinel if unavailable.
    fn pid(&self) -> i32;
    fn write(&mut self, data: &[u8]) -> Result<(), PtyError>;
    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError>;
    /// Best-effort terminate. Idempotent.
    fn kill(&mut self);
    /// Exit code if the backing process has exited.
    fn try_wait(&mut self) -> Option<u32>;
}

/// Which variant is backing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    Pty,
    FallbackShell,
}

/// Result of creating a terminal session.
#[derive(Debug, Clone)]
pub struct CreatedTerminal {
    pub pid: i32,
    pub backing: BackingKind,
}

struct PtySession {
    handle: PtyHandle,
}

impl TerminalBacking for PtySession {
    fn pid(&self) -> i32 {
        self.handle.pid()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.handle.write(data)
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.handle.resize(cols, rows)
    }

    fn kill(&mut self) {
        self.handle.kill();
    }

    fn try_wait(&mut self) -> Option<u32> {
        self.handle.try_wait()
    }
}

/// One session's backing, cloneable out of the map so I/O never happens
/// under the map lock.
type SessionHandle = Arc<Mutex<Box<dyn TerminalBacking>>>;

type SessionMap = Arc<Mutex<HashMap<String, SessionHandle>>>;

/// Owns the 1:1 mapping of logical session id to backing process.
///
/// Every mutation of the map is a single lock scope with no suspension
/// inside, so create/exit/kill cannot interleave halfway. I/O on a backing
/// runs under that session's own lock after the handle has been cloned out
/// of the map; a stalled process can only stall callers of that session.
pub struct PtyManager {
    sessions: SessionMap,
    config: SpawnConfig,
}

impl PtyManager {
    pub fn new(config: SpawnConfig) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// The spawn configuration sessions are created with.
    pub fn config(&self) -> &SpawnConfig {
        &self.config
    }

    /// Create a session under `id`, forwarding shell output to `output`.
    ///
    /// If a live session already exists under this id it is killed first;
    /// a session id maps to at most one live process. If PTY allocation
    /// fails the session degrades to the line-buffered fallback shell
    /// instead of failing.
    pub fn create_session(&self, id: &str, output: OutputSender) -> CreatedTerminal {
        // Last-writer-wins: evict any previous holder of this id. The map
        // lock is released before the old backing is killed.
        let evicted = lock(&self.sessions).remove(id);
        if let Some(old) = evicted {
            log::warn!("session {id} already exists, killing old session");
            old.lock().unwrap_or_else(|e| e.into_inner()).kill();
        }

        match PtyHandle::spawn(&self.config, INITIAL_COLS, INITIAL_ROWS) {
            Ok(mut handle) => {
                let pid = handle.pid();
                let reader = handle.take_reader();
                let mut session = PtySession { handle };

                // Local tmux bootstrap; in SSH mode the attach-or-create is
                // already part of the remote command line.
                if self.config.ssh.is_none() {
                    if let Some(line) = self.config.tmux_bootstrap_line() {
                        if let Err(e) = session.write(line.as_bytes()) {
                            log::error!("failed to bootstrap tmux in session {id}: {e}");
                        }
                    }
                }

                let backing: Box<dyn TerminalBacking> = Box::new(session);
                lock(&self.sessions)
                    .insert(id.to_string(), Arc::new(Mutex::new(backing)));
                spawn_reader_thread(id.to_string(), Arc::clone(&self.sessions), reader, output);

                log::info!(
                    "created PTY session {id} (pid: {pid}, mode: {})",
                    if self.config.ssh.is_some() { "ssh" } else { "local" }
                );
                CreatedTerminal {
                    pid,
                    backing: BackingKind::Pty,
                }
            }
            Err(e) => {
                log::warn!("PTY spawn failed for session {id}, falling back to non-PTY mode: {e}");
                let shell = FallbackShell::new(id, &self.config, output);
                let pid = shell.pid();
                let backing: Box<dyn TerminalBacking> = Box::new(shell);
                lock(&self.sessions).insert(id.to_string(), Arc::new(Mutex::new(backing)));
                CreatedTerminal {
                    pid,
                    backing: BackingKind::FallbackShell,
                }
            }
        }
    }

    /// Forward raw input bytes to the session's process. Unknown ids are a
    /// logged no-op; input is never interpreted here. The write runs under
    /// the session's own lock, so a process that has stopped draining its
    /// tty blocks only callers of that one session.
    pub fn write(&self, id: &str, data: &str) {
        match self.handle(id) {
            Some(session) => {
                let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = session.write(data.as_bytes()) {
                    log::error!("failed to write to session {id}: {e}");
                }
            }
            None => log::warn!("attempted to write to non-existent session {id}"),
        }
    }

    /// Resize the session's terminal. Zero-sized geometry is rejected with
    /// a warning and never reaches the process.
    pub fn resize(&self, id: &str, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            log::warn!("invalid resize dimensions for session {id}: {cols}x{rows}");
            return;
        }

        match self.handle(id) {
            Some(session) => {
                let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = session.resize(cols, rows) {
                    log::error!("failed to resize session {id}: {e}");
                } else {
                    log::info!("resized session {id} to {cols}x{rows}");
                }
            }
            None => log::warn!("attempted to resize non-existent session {id}"),
        }
    }

    /// Terminate a session and drop its bookkeeping. Idempotent. The
    /// backing leaves the map before it is killed, so the map stays
    /// responsive even if the kill has to wait out an in-flight write.
    pub fn kill(&self, id: &str) {
        let removed = lock(&self.sessions).remove(id);
        if let Some(session) = removed {
            session.lock().unwrap_or_else(|e| e.into_inner()).kill();
            log::info!("killed session {id}");
        }
    }

    pub fn session_exists(&self, id: &str) -> bool {
        lock(&self.sessions).contains_key(id)
    }

    /// Pid of a live session, if any.
    pub fn session_pid(&self, id: &str) -> Option<i32> {
        self.handle(id)
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).pid())
    }

    pub fn live_sessions(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Clone a session's handle out of the map. The map lock is dropped
    /// before the caller touches the backing.
    fn handle(&self, id: &str) -> Option<SessionHandle> {
        lock(&self.sessions).get(id).cloned()
    }
}

fn lock(sessions: &SessionMap) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
    sessions.lock().unwrap_or_else(|e| e.into_inner())
}

/// Read PTY output on a dedicated OS thread until EOF, forwarding chunks
/// in order. EOF means the process exited or was killed; either way the
/// session leaves the live map here.
fn spawn_reader_thread(
    id: String,
    sessions: SessionMap,
    mut reader: Box<dyn Read + Send>,
    output: OutputSender,
) {
    std::thread::Builder::new()
        .name(format!("pty-io-{id}"))
        .spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        // A gone receiver means the connection closed; keep
                        // draining so the child is not blocked on a full pipe.
                        let _ = output.send(chunk);
                    }
                }
            }

            let removed = sessions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            if let Some(session) = removed {
                let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
                match session.try_wait() {
                    Some(code) => log::info!("session {id} exited with code {code}"),
                    None => log::info!("session {id} closed"),
                }
            }
        })
        .expect("failed to spawn PTY I/O thread");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    fn test_manager() -> PtyManager {
        PtyManager::new(SpawnConfig {
            shell: Some("/bin/sh".to_string()),
            ..SpawnConfig::default()
        })
    }

    async fn collect_until(
        rx: &mut mpsc::UnboundedReceiver<String>,
        needle: &str,
        timeout: Duration,
    ) -> String {
        let mut collected = String::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(chunk)) => {
                    collected.push_str(&chunk);
                    if collected.contains(needle) {
                        break;
                    }
                }
                _ => break,
            }
        }
        collected
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_write_and_output() {
        let manager = test_manager();
        let (tx, mut rx) = unbounded_channel();

        let created = manager.create_session("s1", tx);
        assert!(manager.session_exists("s1"));

        manager.write("s1", "echo MGR_TEST_OK\n");
        let out = collect_until(&mut rx, "MGR_TEST_OK", Duration::from_secs(5)).await;
        assert!(
            out.contains("MGR_TEST_OK"),
            "expected echoed output, got: {out}"
        );

        // Real PTY sessions report a positive pid; the fallback shell -1.
        match created.backing {
            BackingKind::Pty => assert!(created.pid > 0),
            BackingKind::FallbackShell => assert_eq!(created.pid, -1),
        }

        manager.kill("s1");
        assert!(!manager.session_exists("s1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_id_kills_old_session() {
        let manager = test_manager();
        let (tx1, _rx1) = unbounded_channel();
        let first = manager.create_session("dup", tx1);

        let (tx2, _rx2) = unbounded_channel();
        let second = manager.create_session("dup", tx2);

        // At most one live process per id: the old pid must be gone once
        // the replacement exists (fallback sessions share the sentinel).
        assert_eq!(manager.live_sessions(), 1);
        if first.backing == BackingKind::Pty && second.backing == BackingKind::Pty {
            assert_ne!(first.pid, second.pid);
            assert_eq!(manager.session_pid("dup"), Some(second.pid));
        }

        manager.kill("dup");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_geometry_resize_is_ignored() {
        let manager = test_manager();
        let (tx, mut rx) = unbounded_channel();
        manager.create_session("rz", tx);

        // Neither call may error or tear down the session.
        manager.resize("rz", 0, 10);
        manager.resize("rz", 10, 0);
        assert!(manager.session_exists("rz"));

        // The session is still usable afterwards.
        manager.write("rz", "echo STILL_ALIVE\n");
        let out = collect_until(&mut rx, "STILL_ALIVE", Duration::from_secs(5)).await;
        assert!(out.contains("STILL_ALIVE"));

        manager.kill("rz");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_to_unknown_session_is_noop() {
        let manager = test_manager();
        manager.write("ghost", "ls\n");
        manager.resize("ghost", 80, 24);
        assert!(!manager.session_exists("ghost"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_kill_is_idempotent() {
        let manager = test_manager();
        let (tx, _rx) = unbounded_channel();
        manager.create_session("k1", tx);

        manager.kill("k1");
        manager.kill("k1");
        assert!(!manager.session_exists("k1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocked_write_does_not_stall_other_sessions() {
        let manager = Arc::new(test_manager());
        let (tx, _rx) = unbounded_channel();
        let created = manager.create_session("busy", tx);
        if created.backing != BackingKind::Pty {
            // The fallback shell never blocks on write; nothing to verify.
            return;
        }

        // Put a foreground process on the tty that does not read stdin,
        // then flood the input buffer until the writer blocks.
        manager.write("busy", "sleep 5\n");
        tokio::time::sleep(Duration::from_millis(300)).await;

        let flooder = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                let blob = "\n".repeat(1024 * 1024);
                manager.write("busy", &blob);
            })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Operations on other sessions must stay responsive while the
        // blocked write holds only its own session's lock.
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                let (tx, _rx) = unbounded_channel();
                manager.create_session("other", tx);
                let seen = manager.session_exists("other");
                manager.kill("other");
                let _ = done_tx.send(seen);
            });
        }

        let seen = done_rx.recv_timeout(std::time::Duration::from_secs(2));
        assert_eq!(
            seen,
            Ok(true),
            "manager stalled behind a blocked session write"
        );

        // The blocked writer drains once sleep exits and the shell reads.
        drop(flooder);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_process_exit_removes_session() {
        let manager = test_manager();
        let (tx, mut rx) = unbounded_channel();
        let created = manager.create_session("ex", tx);
        if created.backing != BackingKind::Pty {
            // Fallback shells have no single process whose exit ends the
            // session; nothing to verify here.
            return;
        }

        manager.write("ex", "exit 0\n");
        let _ = collect_until(&mut rx, "\u{0}never", Duration::from_secs(3)).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while manager.session_exists("ex") && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!manager.session_exists("ex"));
    }
}
