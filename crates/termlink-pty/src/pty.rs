use std::io::{Read, Write};
use std::path::PathBuf;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Errors from PTY operations.
#[derive(Debug)]
pub enum PtyError {
    SpawnFailed(String),
    IoError(std::io::Error),
    ResizeFailed(String),
}

impl std::fmt::Display for PtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyError::SpawnFailed(msg) => write!(f, "PTY spawn failed: {msg}"),
            PtyError::IoError(err) => write!(f, "PTY I/O error: {err}"),
            PtyError::ResizeFailed(msg) => write!(f, "PTY resize failed: {msg}"),
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PtyError {
    fn from(err: std::io::Error) -> Self {
        PtyError::IoError(err)
    }
}

/// Remote target for SSH gateway mode. When set, the terminal session runs
/// `ssh` to this target instead of a local shell.
#[derive(Debug, Clone)]
pub struct SshTarget {
    /// `user@host` style destination.
    pub target: String,
    /// Optional private key path passed as `-i`.
    pub key_path: Option<String>,
}

/// Multiplexer options for a terminal session.
#[derive(Debug, Clone)]
pub struct TmuxOptions {
    /// The tmux session name to attach-or-create.
    pub session_name: String,
}

/// Explicit spawn-time configuration for a terminal session.
///
/// Everything the spawned process inherits is declared here rather than
/// read from ambient process state at spawn time.
#[derive(Debug, Clone, Default)]
pub struct SpawnConfig {
    /// Shell binary. `None` uses `$SHELL`, falling back to `/bin/sh`.
    pub shell: Option<String>,
    /// Working directory. `None` uses `$HOME`, falling back to `.`.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// SSH gateway mode target.
    pub ssh: Option<SshTarget>,
    /// Multiplexer layer; `None` disables tmux entirely.
    pub tmux: Option<TmuxOptions>,
}

impl SpawnConfig {
    /// The directory the session starts in.
    pub fn resolve_working_dir(&self) -> PathBuf {
        self.working_dir.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }

    /// The tmux bootstrap line written into a fresh local shell, ending in
    /// a carriage return. The status bar is compacted so it survives a
    /// mobile-width terminal.
    pub fn tmux_bootstrap_line(&self) -> Option<String> {
        let tmux = self.tmux.as_ref()?;
        Some(format!(
            "tmux new-session -A -s {} \\; set -g status-right ' %H:%M ' \\; set -g status-left-length 20\r",
            tmux.session_name
        ))
    }
}

/// Owns a portable-pty child process, master pair, reader, and writer.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn a new PTY per `config` with the given dimensions.
    ///
    /// In SSH gateway mode the PTY runs `ssh -t` to the remote target; when
    /// tmux is also enabled the attach-or-create invocation is appended to
    /// the remote command so reconnecting resumes multiplexer state.
    pub fn spawn(config: &SpawnConfig, cols: u16, rows: u16) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = match &config.ssh {
            Some(ssh) => {
                log::info!("SSH gateway mode enabled, target: {}", ssh.target);
                let mut cmd = CommandBuilder::new("ssh");
                if let Some(key) = &ssh.key_path {
                    cmd.arg("-i");
                    cmd.arg(key);
                }
                cmd.args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=no", "-t"]);
                cmd.arg(&ssh.target);
                if let Some(tmux) = &config.tmux {
                    cmd.arg(format!(
                        "tmux new-session -A -s {} \\; set -g status-right '%H:%M' \\; set -g status-left-length 20",
                        tmux.session_name
                    ));
                }
                cmd
            }
            None => {
                let shell = config
                    .shell
                    .clone()
                    .unwrap_or_else(default_shell);
                CommandBuilder::new(shell)
            }
        };

        cmd.cwd(config.resolve_working_dir());
        cmd.env("TERM", "xterm-color");
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn command: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        Ok(Self {
            master: pair.master,
            reader,
            writer,
            child,
        })
    }

    /// Resize the PTY to new dimensions.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(format!("{e}")))
    }

    /// Write bytes to the PTY master (user input -> shell).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Extract the PTY reader for use on a dedicated I/O thread.
    ///
    /// PTY reads block, so the reader must not live behind the session map
    /// lock. After this call the handle itself no longer reads anything.
    pub fn take_reader(&mut self) -> Box<dyn Read + Send> {
        std::mem::replace(&mut self.reader, Box::new(std::io::empty()))
    }

    /// OS process id of the child, or -1 if unavailable.
    pub fn pid(&self) -> i32 {
        self.child.process_id().map(|p| p as i32).unwrap_or(-1)
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Best-effort terminate the child. Errors from an already-dead
    /// process are swallowed.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            log::debug!("kill on exited child: {e}");
        }
    }
}

/// Returns the user's default shell, falling back to `/bin/sh`.
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
