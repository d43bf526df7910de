//! JSON message protocol spoken over the duplex gateway.
//!
//! Every frame is a JSON object with a `type` discriminant. The plain-text
//! `ping`/`pong` keepalive frames are handled before JSON parsing and are
//! not part of this enum.

use serde::{Deserialize, Serialize};
use termlink_pty::TmuxWindow;

/// Frames the client sends.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Raw keystrokes for the terminal.
    Input { data: String },
    /// Terminal dimension change.
    Resize { cols: u16, rows: u16 },
    /// A tmux command to run in the session's multiplexer.
    TmuxCommand {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Request for the current tmux window list.
    SessionInfoRequest,
}

/// Frames the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Terminal output chunk.
    Output { data: String },
    /// Sent once after admission; announces the bound terminal.
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "tmuxSession")]
        tmux_session: Option<String>,
        #[serde(rename = "isDetached", skip_serializing_if = "Option::is_none")]
        is_detached: Option<bool>,
    },
    /// Answer to a session-info request.
    SessionInfoResponse { windows: Vec<TmuxWindow> },
    Error { message: String },
}

impl ServerMessage {
    /// Serialize to the wire text. Serialization of these enums cannot
    /// fail; a failure would be a programming error, so it degrades to an
    /// error frame built by hand.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            log::error!("failed to serialize server message: {e}");
            format!("{{\"type\":\"error\",\"message\":\"internal error: {e}\"}}")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"input","data":"ls\r"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Input { data } if data == "ls\r"));
    }

    #[test]
    fn test_parse_resize() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"resize","cols":120,"rows":40}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Resize { cols: 120, rows: 40 }));
    }

    #[test]
    fn test_parse_tmux_command_args_default_empty() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"tmux-command","command":"new-window"}"#).unwrap();
        match msg {
            ClientMessage::TmuxCommand { command, args } => {
                assert_eq!(command, "new-window");
                assert!(args.is_empty());
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"tmux-command","command":"select-window","args":["-t","2"]}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::TmuxCommand { args, .. } => assert_eq!(args, vec!["-t", "2"]),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_session_info_request() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"session-info-request"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SessionInfoRequest));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"launch-missiles"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_serialize_connected() {
        let msg = ServerMessage::Connected {
            session_id: "client-abc".to_string(),
            tmux_session: Some("termlink-main".to_string()),
            is_detached: None,
        };
        assert_eq!(
            msg.to_json(),
            r#"{"type":"connected","sessionId":"client-abc","tmuxSession":"termlink-main"}"#
        );

        let msg = ServerMessage::Connected {
            session_id: "client-abc".to_string(),
            tmux_session: None,
            is_detached: Some(true),
        };
        assert_eq!(
            msg.to_json(),
            r#"{"type":"connected","sessionId":"client-abc","tmuxSession":null,"isDetached":true}"#
        );
    }

    #[test]
    fn test_serialize_output_and_error() {
        let msg = ServerMessage::Output {
            data: "hello\r\n".to_string(),
        };
        assert_eq!(msg.to_json(), r#"{"type":"output","data":"hello\r\n"}"#);

        let msg = ServerMessage::Error {
            message: "Authentication required".to_string(),
        };
        assert_eq!(
            msg.to_json(),
            r#"{"type":"error","message":"Authentication required"}"#
        );
    }

    #[test]
    fn test_serialize_session_info_response() {
        let msg = ServerMessage::SessionInfoResponse {
            windows: vec![TmuxWindow {
                id: "@0".to_string(),
                name: "main".to_string(),
                active: true,
                panes: 2,
            }],
        };
        assert_eq!(
            msg.to_json(),
            r#"{"type":"session-info-response","windows":[{"id":"@0","name":"main","active":true,"panes":2}]}"#
        );
    }
}
