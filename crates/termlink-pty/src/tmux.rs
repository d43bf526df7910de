//! Side-channel tmux control for a terminal session.
//!
//! Commands that are fire-and-forget are written straight into the PTY as
//! a `tmux …` line. Queries that need a structured answer cannot reuse the
//! interactive PTY without corrupting the visible terminal, so they run a
//! separate short-lived process against the tmux server instead.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use crate::manager::PtyManager;
use crate::pty::SshTarget;

/// Machine-parseable window list format: 4 colon-delimited fields.
const WINDOW_FORMAT: &str = "#{window_id}:#{window_name}:#{pane_active}:#{window_panes}";

/// Hard deadline for a single side-channel query, generous enough for an
/// SSH round trip.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between attachment-readiness polls.
const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(40);

/// Errors from tmux control operations.
#[derive(Debug)]
pub enum TmuxError {
    SessionNotFound(String),
    Timeout,
    SpawnFailed(String),
    QueryFailed(String),
}

impl std::fmt::Display for TmuxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TmuxError::SessionNotFound(id) => write!(f, "session {id} not found"),
            TmuxError::Timeout => write!(f, "tmux list-windows command timed out"),
            TmuxError::SpawnFailed(msg) => write!(f, "failed to spawn tmux query: {msg}"),
            TmuxError::QueryFailed(msg) => write!(f, "tmux list-windows failed: {msg}"),
        }
    }
}

impl std::error::Error for TmuxError {}

/// A transient snapshot of one tmux window. Not persisted anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TmuxWindow {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub panes: u32,
}

/// Issues tmux commands and queries against the multiplexer running
/// inside a terminal session.
pub struct TmuxHelper {
    manager: Arc<PtyManager>,
    ssh: Option<SshTarget>,
}

impl TmuxHelper {
    pub fn new(manager: Arc<PtyManager>) -> Self {
        let ssh = manager.config().ssh.clone();
        Self { manager, ssh }
    }

    /// Write a tmux command line into the session's PTY, terminated by a
    /// carriage return. Fails for unknown session ids; the caller is
    /// waiting on a result path and must hear about it.
    pub fn execute_command(
        &self,
        session_id: &str,
        command: &str,
        args: &[String],
    ) -> Result<(), TmuxError> {
        if !self.manager.session_exists(session_id) {
            log::warn!("tmux helper: session {session_id} not found");
            return Err(TmuxError::SessionNotFound(session_id.to_string()));
        }

        let mut line = format!("tmux {command}");
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line.push('\r');

        log::info!("tmux helper: executing in session {session_id}: {}", line.trim());
        self.manager.write(session_id, &line);
        Ok(())
    }

    /// Query the window list of `tmux_session` with a separate short-lived
    /// process, bounded by [`QUERY_TIMEOUT`].
    ///
    /// A tmux server that simply is not up yet (fresh session, nothing
    /// attached, remote host still unreachable) yields an empty list, not
    /// an error; anything else nonzero is a hard failure.
    pub async fn list_windows(
        &self,
        session_id: &str,
        tmux_session: &str,
    ) -> Result<Vec<TmuxWindow>, TmuxError> {
        if !self.manager.session_exists(session_id) {
            log::warn!("tmux helper: session {session_id} not found for listing windows");
            return Ok(Vec::new());
        }

        let cmd = self.build_query(
            format!("tmux list-windows -t {tmux_session} -F '{WINDOW_FORMAT}'"),
            &["list-windows", "-t", tmux_session, "-F", WINDOW_FORMAT],
        );
        let output = run_query(cmd).await?;

        if output.status.success() {
            return Ok(parse_windows(&String::from_utf8_lossy(&output.stdout)));
        }

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if is_benign_failure(&combined) {
            log::debug!(
                "tmux session {tmux_session} not ready or target unreachable: {}",
                combined.trim()
            );
            Ok(Vec::new())
        } else {
            log::error!(
                "tmux list-windows failed with code {:?}: {}",
                output.status.code(),
                combined.trim()
            );
            Err(TmuxError::QueryFailed(format!(
                "exit code {:?}",
                output.status.code()
            )))
        }
    }

    /// `true` once at least one client is attached to `tmux_session`.
    /// Not-ready conditions (no server, no session yet) report `false`.
    pub async fn client_attached(&self, tmux_session: &str) -> Result<bool, TmuxError> {
        let cmd = self.build_query(
            format!("tmux list-clients -t {tmux_session}"),
            &["list-clients", "-t", tmux_session],
        );
        let output = run_query(cmd).await?;

        if output.status.success() {
            return Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty());
        }

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if is_benign_failure(&combined) {
            Ok(false)
        } else {
            Err(TmuxError::QueryFailed(format!(
                "exit code {:?}",
                output.status.code()
            )))
        }
    }

    /// Poll until a client is attached to `tmux_session` or `deadline`
    /// elapses. Returns whether attachment was observed; query failures
    /// count as not-attached so the poll degrades to a bounded wait.
    pub async fn wait_attached(&self, tmux_session: &str, deadline: Duration) -> bool {
        let end = tokio::time::Instant::now() + deadline;
        loop {
            if matches!(self.client_attached(tmux_session).await, Ok(true)) {
                return true;
            }
            if tokio::time::Instant::now() >= end {
                return false;
            }
            tokio::time::sleep(ATTACH_POLL_INTERVAL).await;
        }
    }

    fn build_query(&self, remote_line: String, local_args: &[&str]) -> Command {
        match &self.ssh {
            Some(ssh) => {
                let mut cmd = Command::new("ssh");
                if let Some(key) = &ssh.key_path {
                    cmd.arg("-i").arg(key);
                }
                cmd.args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=no"]);
                cmd.arg(&ssh.target);
                cmd.arg(remote_line);
                cmd
            }
            None => {
                let mut cmd = Command::new("tmux");
                cmd.args(local_args);
                cmd
            }
        }
    }
}

/// Run a side-channel query with the standard pipes and deadline.
/// kill_on_drop reaps the query process when the timeout fires.
async fn run_query(mut cmd: Command) -> Result<std::process::Output, TmuxError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(QUERY_TIMEOUT, cmd.output()).await {
        Err(_) => Err(TmuxError::Timeout),
        Ok(Err(e)) => Err(TmuxError::SpawnFailed(e.to_string())),
        Ok(Ok(output)) => Ok(output),
    }
}

/// Nonzero exits that mean "the multiplexer is not there yet", not that
/// something broke. A fresh session legitimately has no windows until
/// first attached.
fn is_benign_failure(output: &str) -> bool {
    const NOT_READY: &[&str] = &[
        "can't find session",
        "failed to connect to server",
        "connection refused",
        "permission denied",
        "no such file or directory",
        "error connecting to",
        "no server running on",
    ];
    let lower = output.to_lowercase();
    NOT_READY.iter().any(|marker| lower.contains(marker))
}

/// Parse `list-windows` output lines; malformed lines are dropped rather
/// than failing the whole call.
fn parse_windows(output: &str) -> Vec<TmuxWindow> {
    output
        .trim()
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
                return None;
            }
            Some(TmuxWindow {
                id: parts[0].to_string(),
                name: parts[1].to_string(),
                active: parts[2] == "1",
                panes: parts[3].parse().ok()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::SpawnConfig;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn test_parse_windows_well_formed() {
        let out = "@0:main:1:2\n@1:logs:0:1\n";
        let windows = parse_windows(out);
        assert_eq!(windows.len(), 2);
        assert_eq!(
            windows[0],
            TmuxWindow {
                id: "@0".to_string(),
                name: "main".to_string(),
                active: true,
                panes: 2,
            }
        );
        assert!(!windows[1].active);
        assert_eq!(windows[1].panes, 1);
    }

    #[test]
    fn test_parse_windows_drops_malformed_lines() {
        let out = "@0:main:1:2\ngarbage\n@1:too:many:fields:here\n@2:ok:0:3\n@3:bad-panes:1:x\n";
        let windows = parse_windows(out);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].id, "@0");
        assert_eq!(windows[1].id, "@2");
    }

    #[test]
    fn test_parse_windows_empty() {
        assert!(parse_windows("").is_empty());
        assert!(parse_windows("\n\n").is_empty());
    }

    #[test]
    fn test_benign_failure_detection() {
        assert!(is_benign_failure("can't find session: term-x"));
        assert!(is_benign_failure("error connecting to /tmp/tmux-0/default"));
        assert!(is_benign_failure("ssh: connect to host x: Connection refused"));
        assert!(is_benign_failure("No server running on /tmp/tmux-1000/default"));
        assert!(!is_benign_failure("unknown option -- Z"));
        assert!(!is_benign_failure(""));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_command_unknown_session() {
        let manager = Arc::new(PtyManager::new(SpawnConfig::default()));
        let helper = TmuxHelper::new(Arc::clone(&manager));

        let result = helper.execute_command("nope", "new-window", &[]);
        assert!(matches!(result, Err(TmuxError::SessionNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_windows_unknown_session_is_empty() {
        let manager = Arc::new(PtyManager::new(SpawnConfig::default()));
        let helper = TmuxHelper::new(manager);

        let windows = helper.list_windows("nope", "term-nope").await.unwrap();
        assert!(windows.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wait_attached_gives_up_at_deadline() {
        let manager = Arc::new(PtyManager::new(SpawnConfig::default()));
        let helper = TmuxHelper::new(manager);

        // No such tmux session exists, so the poll must expire bounded.
        let start = tokio::time::Instant::now();
        let attached = helper
            .wait_attached("term-no-such-session", Duration::from_millis(150))
            .await;
        assert!(!attached);
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_command_formats_line() {
        let manager = Arc::new(PtyManager::new(SpawnConfig {
            shell: Some("/bin/sh".to_string()),
            ..SpawnConfig::default()
        }));
        let helper = TmuxHelper::new(Arc::clone(&manager));

        let (tx, _rx) = unbounded_channel();
        manager.create_session("t1", tx);

        // The command lands in the shell's input stream; we only verify it
        // is accepted for a live session.
        let args = vec!["-t".to_string(), "2".to_string()];
        assert!(helper.execute_command("t1", "select-window", &args).is_ok());

        manager.kill("t1");
    }
}
