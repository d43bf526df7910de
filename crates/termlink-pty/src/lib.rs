//! termlink-pty: PTY session lifecycle for the terminal server.
//!
//! This crate owns the mapping from a logical session id to the backing
//! interactive process, and every read/write/resize/kill against it.
//!
//! # Architecture
//!
//! - [`PtyHandle`] — low-level PTY process management (spawn, read, write,
//!   resize), configured through an explicit [`SpawnConfig`].
//! - [`TerminalBacking`] — the capability set (`pid`, `write`, `resize`,
//!   `kill`) shared by the real PTY and the degraded fallback shell.
//! - [`PtyManager`] — the session-id-to-backing map. Shell output flows out
//!   through a per-session channel, in the order the process produced it.
//! - [`TmuxHelper`] — side-channel tmux control for operations that need a
//!   structured result rather than raw keystrokes.

pub mod fallback;
pub mod manager;
pub mod pty;
pub mod tmux;

pub use fallback::FallbackShell;
pub use manager::{BackingKind, CreatedTerminal, OutputSender, PtyManager, TerminalBacking};
pub use pty::{PtyError, PtyHandle, SpawnConfig, SshTarget, TmuxOptions};
pub use tmux::{TmuxError, TmuxHelper, TmuxWindow};
