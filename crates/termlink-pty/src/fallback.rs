//! Degraded line-buffered shell for environments without a PTY device.
//!
//! Sandboxed environments sometimes cannot allocate a pseudo-terminal at
//! all. This emulator keeps the system demoable there: it accumulates
//! input byte by byte, treats CR/LF as a command boundary, and runs each
//! line as a one-shot `bash -lc` child, streaming stdout/stderr back
//! through the same output channel a real PTY session would use. It is not
//! meant to behave like a real shell.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

use crate::manager::{OutputSender, TerminalBacking};
use crate::pty::{PtyError, SpawnConfig};

const BACKSPACE: char = '\u{7f}';
const ESCAPE: char = '\u{1b}';

/// Line-buffered fallback shell. One command runs at a time; a line
/// submitted while one is in flight is rejected with an inline notice.
pub struct FallbackShell {
    pid: i32,
    buffer: String,
    home: String,
    cwd: Arc<Mutex<String>>,
    running: Arc<Mutex<Option<Child>>>,
    output: OutputSender,
}

impl FallbackShell {
    pub fn new(session_id: &str, config: &SpawnConfig, output: OutputSender) -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let cwd = config
            .resolve_working_dir()
            .to_string_lossy()
            .into_owned();

        let shell = Self {
            pid: -1,
            buffer: String::new(),
            home,
            cwd: Arc::new(Mutex::new(cwd)),
            running: Arc::new(Mutex::new(None)),
            output,
        };

        shell.send("(fallback) no PTY available in this environment; running a limited line shell.\r\n");
        shell.send(&shell.prompt());
        log::warn!("session {session_id} running in fallback (no PTY) mode");

        shell
    }

    fn send(&self, data: &str) {
        // Receiver gone means the connection closed; nothing to do.
        let _ = self.output.send(data.to_string());
    }

    fn prompt(&self) -> String {
        format!("{}$ ", self.cwd.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn handle_line(&mut self) {
        let command = self.buffer.trim().to_string();
        self.buffer.clear();
        self.send("\r\n");

        if command.is_empty() {
            let prompt = self.prompt();
            self.send(&prompt);
            return;
        }

        if command == "cd" || command.starts_with("cd ") {
            self.change_dir(&command);
            let prompt = self.prompt();
            self.send(&prompt);
            return;
        }

        self.run_command(&command);
    }

    /// `cd` builtin. The fallback has no real process-group cwd, so the
    /// directory is tracked as a plain string joined naively.
    fn change_dir(&mut self, command: &str) {
        let target = if command == "cd" {
            self.home.clone()
        } else {
            command[3..].trim().to_string()
        };

        let mut cwd = self.cwd.lock().unwrap_or_else(|e| e.into_inner());
        let next = if target.starts_with('/') {
            target
        } else {
            format!("{}/{}", *cwd, target)
        };
        let trimmed = next.trim_end_matches('/');
        *cwd = if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        };
    }

    fn run_command(&mut self, command: &str) {
        {
            let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if running.is_some() {
                let notice = format!(
                    "\r\n(a command is still running; wait for it to finish)\r\n{}",
                    self.prompt()
                );
                self.send(&notice);
                return;
            }
        }

        let cwd = self.cwd.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let spawned = Command::new("bash")
            .args(["-lc", command])
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let msg = format!("failed to run command: {e}\r\n{}", self.prompt());
                self.send(&msg);
                return;
            }
        };

        self.pid = child.id() as i32;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        *self.running.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);

        let out_thread = stdout.map(|s| stream_to_output(s, self.output.clone()));
        let err_thread = stderr.map(|s| stream_to_output(s, self.output.clone()));

        // Waiter: once both pipes hit EOF the command is done (or killed);
        // reap it and print the next prompt.
        let running = Arc::clone(&self.running);
        let cwd = Arc::clone(&self.cwd);
        let output = self.output.clone();
        std::thread::spawn(move || {
            if let Some(t) = out_thread {
                let _ = t.join();
            }
            if let Some(t) = err_thread {
                let _ = t.join();
            }

            let mut running = running.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(mut child) = running.take() {
                let _ = child.wait();
            }

            let cwd = cwd.lock().unwrap_or_else(|e| e.into_inner());
            let _ = output.send(format!("\r\n{}$ ", *cwd));
        });
    }
}

fn stream_to_output<R: Read + Send + 'static>(
    mut source: R,
    output: OutputSender,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match source.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = output.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                }
            }
        }
    })
}

impl TerminalBacking for FallbackShell {
    fn pid(&self) -> i32 {
        self.pid
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let text = String::from_utf8_lossy(data).into_owned();
        for ch in text.chars() {
            match ch {
                '\r' | '\n' => self.handle_line(),
                BACKSPACE => {
                    if !self.buffer.is_empty() {
                        self.buffer.pop();
                        self.send("\u{8} \u{8}");
                    }
                }
                // Arrow keys and other escape sequences are not supported.
                ESCAPE => {}
                _ => {
                    self.buffer.push(ch);
                    // Local echo; there is no PTY to do it for us.
                    let mut echoed = [0u8; 4];
                    self.send(ch.encode_utf8(&mut echoed));
                }
            }
        }
        Ok(())
    }

    fn resize(&mut self, _cols: u16, _rows: u16) -> Result<(), PtyError> {
        // No PTY to resize.
        Ok(())
    }

    fn kill(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut child) = running.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn try_wait(&mut self) -> Option<u32> {
        // The fallback has no single backing process to report on.
        None
    }
}
