//! Duplex gateway: one WebSocket connection, one terminal session.
//!
//! Admission (origin allowlist, session cookie) happens after the upgrade
//! so rejected clients get a proper close frame with a policy code instead
//! of an opaque failed handshake. Once admitted, the connection is bound
//! to a fresh terminal session that dies with it.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::{HeaderMap, ORIGIN};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::http::session_id_from_headers;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

/// RFC 6455 policy-violation close code.
const POLICY_VIOLATION: u16 = 1008;

/// Keepalive sweep period. A connection that misses a whole period
/// without answering the ping is presumed dead.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on waiting for a replayed `tmux attach` to take over the
/// terminal before the follow-up key is sent.
const ATTACH_READY_TIMEOUT: Duration = Duration::from_secs(2);

/// tmux prefix byte (Ctrl-B).
const TMUX_PREFIX: &str = "\u{2}";

pub fn router(state: AppState) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let session_id = session_id_from_headers(&headers);

    ws.on_upgrade(move |socket| handle_socket(socket, state, origin, session_id))
}

/// Close the socket with a policy code. Errors are moot, the connection
/// is going away either way.
async fn reject(mut socket: WebSocket, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: POLICY_VIOLATION,
            reason: reason.into(),
        })))
        .await;
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    origin: Option<String>,
    session_id: Option<String>,
) {
    // Browsers always send Origin; its absence means a non-browser client,
    // which the cookie check still gates.
    if let Some(origin) = origin.as_deref() {
        if !state.config.origin_allowed(origin) {
            log::warn!("gateway: rejected connection from origin {origin}");
            reject(socket, "Origin Not Allowed").await;
            return;
        }
    }

    let authenticated = session_id
        .as_deref()
        .map(|id| state.sessions.is_valid(id))
        .unwrap_or(false);
    if !authenticated {
        log::warn!("gateway: rejected unauthenticated connection");
        let error = ServerMessage::Error {
            message: "Authentication required".to_string(),
        };
        let _ = socket.send(Message::Text(error.to_json())).await;
        reject(socket, "Authentication Required").await;
        return;
    }

    let terminal_id = format!("client-{}", termlink_auth::random_id(9));
    log::info!("gateway: connection admitted, terminal {terminal_id}");

    let (mut sink, mut stream) = socket.split();

    // Single writer task; everything else sends frames through this
    // channel so PTY output and protocol replies cannot interleave a frame.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let write_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let (pty_tx, mut pty_rx) = mpsc::unbounded_channel::<String>();
    let created = state.pty.create_session(&terminal_id, pty_tx);
    log::info!(
        "gateway: terminal {terminal_id} backed by {:?} (pid {})",
        created.backing,
        created.pid
    );

    let pump_tx = out_tx.clone();
    let pump_task = tokio::spawn(async move {
        while let Some(chunk) = pty_rx.recv().await {
            let frame = ServerMessage::Output { data: chunk }.to_json();
            if pump_tx.send(Message::Text(frame)).is_err() {
                break;
            }
        }
    });

    let tmux_session = state
        .config
        .tmux_enabled
        .then(|| state.config.tmux_session_name());

    let connected = ServerMessage::Connected {
        session_id: terminal_id.clone(),
        tmux_session: tmux_session.clone(),
        is_detached: None,
    };
    let _ = out_tx.send(Message::Text(connected.to_json()));

    let mut detached = false;
    let mut alive = true;
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if !alive {
                    log::info!("gateway: terminal {terminal_id} missed keepalive, closing");
                    break;
                }
                alive = false;
                if out_tx.send(Message::Ping(Vec::new())).is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        // Plain-text keepalive used by clients that cannot
                        // observe protocol-level ping frames.
                        if text == "ping" {
                            let _ = out_tx.send(Message::Text("pong".to_string()));
                            continue;
                        }
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                handle_client_message(
                                    &state,
                                    &terminal_id,
                                    tmux_session.as_deref(),
                                    &out_tx,
                                    &mut detached,
                                    msg,
                                )
                                .await;
                            }
                            Err(e) => {
                                log::debug!("gateway: ignoring malformed frame: {e}");
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => alive = true,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.pty.kill(&terminal_id);
    pump_task.abort();
    write_task.abort();
    log::info!("gateway: terminal {terminal_id} closed");
}

async fn handle_client_message(
    state: &AppState,
    terminal_id: &str,
    tmux_session: Option<&str>,
    out_tx: &mpsc::UnboundedSender<Message>,
    detached: &mut bool,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::Input { data } => {
            state.pty.write(terminal_id, &data);
        }
        ClientMessage::Resize { cols, rows } => {
            state.pty.resize(terminal_id, cols, rows);
        }
        ClientMessage::TmuxCommand { command, args } => {
            let Some(tmux_name) = tmux_session else {
                send_inline_error(out_tx, "tmux is disabled");
                return;
            };

            match tmux_key_for_command(&command, &args) {
                Some(key) => {
                    // After a detach the PTY shows a bare shell; replay the
                    // attach and wait for it to settle before the next
                    // multiplexer keystroke.
                    if *detached && key != 'd' {
                        state
                            .pty
                            .write(terminal_id, &format!("tmux attach -t {tmux_name}\r"));
                        if !state.tmux.wait_attached(tmux_name, ATTACH_READY_TIMEOUT).await {
                            log::warn!(
                                "gateway: re-attach to {tmux_name} unconfirmed, replaying anyway"
                            );
                        }
                        *detached = false;
                    }
                    state
                        .pty
                        .write(terminal_id, &format!("{TMUX_PREFIX}{key}"));
                    if key == 'd' {
                        *detached = true;
                    }
                }
                None => {
                    if let Err(e) = state.tmux.execute_command(terminal_id, &command, &args) {
                        send_inline_error(out_tx, &e.to_string());
                    }
                }
            }
        }
        ClientMessage::SessionInfoRequest => {
            let Some(tmux_name) = tmux_session else {
                let response = ServerMessage::SessionInfoResponse {
                    windows: Vec::new(),
                };
                let _ = out_tx.send(Message::Text(response.to_json()));
                return;
            };

            match state.tmux.list_windows(terminal_id, tmux_name).await {
                Ok(windows) => {
                    let frame = ServerMessage::SessionInfoResponse { windows };
                    let _ = out_tx.send(Message::Text(frame.to_json()));
                }
                Err(e) => send_inline_error(out_tx, &e.to_string()),
            }
        }
    }
}

/// Multiplexer failures surface as terminal output text so they land in
/// the visible scrollback, not in a protocol path the UI may not render.
fn send_inline_error(out_tx: &mpsc::UnboundedSender<Message>, message: &str) {
    let frame = ServerMessage::Output {
        data: format!("\r\n[tmux-error] {message}\r\n"),
    };
    let _ = out_tx.send(Message::Text(frame.to_json()));
}

/// Map common multiplexer commands to their prefix-key equivalents.
///
/// Keystrokes go through the interactive PTY and work regardless of which
/// tmux client is attached; commands without a key binding fall back to a
/// literal `tmux …` line.
fn tmux_key_for_command(command: &str, args: &[String]) -> Option<char> {
    let full = if args.is_empty() {
        command.to_string()
    } else {
        format!("{command} {}", args.join(" "))
    };

    match full.as_str() {
        "new-window" => Some('c'),
        "next-window" => Some('n'),
        "previous-window" => Some('p'),
        "detach" => Some('d'),
        "split-window -v" => Some('%'),
        "split-window -h" => Some('"'),
        "select-pane -t :.+" => Some('o'),
        "zoom-pane" | "resize-pane -Z" => Some('z'),
        "copy-mode" => Some('['),
        _ => None,
    }
}
