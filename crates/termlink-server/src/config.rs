//! Environment-driven server configuration.

use std::time::Duration;

use termlink_pty::{SpawnConfig, SshTarget, TmuxOptions};

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_ORIGIN: &str = "http://localhost:3101";
const DEFAULT_LINK_TOKEN_TTL_SECS: u64 = 5 * 60;
const DEFAULT_TMUX_SESSION: &str = "termlink-main";

/// Development-only master credential. Never used when
/// `TERMINAL_ENV=production`; production must set `TERMINAL_TOKEN`
/// explicitly or run without a master token at all.
const DEV_MASTER_TOKEN: &str = "valid_token";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP API port.
    pub port: u16,
    /// Duplex gateway port; the WebSocket channel lives on its own port.
    pub ws_port: u16,
    /// Origins allowed for CORS and WebSocket admission.
    pub allowed_origins: Vec<String>,
    /// Fixed master credential; `None` means one-time tokens only.
    pub master_token: Option<String>,
    /// Lifetime of issued one-time link tokens.
    pub link_token_ttl: Duration,
    /// Explicit override for the cookie `Secure` flag.
    pub cookie_secure: Option<bool>,
    pub production: bool,
    /// Shell binary for local sessions.
    pub shell: Option<String>,
    /// SSH gateway mode target.
    pub ssh: Option<SshTarget>,
    pub tmux_enabled: bool,
    /// Fixed tmux session name; `None` derives the default.
    pub tmux_session: Option<String>,
}

impl ServerConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup. Keeps the
    /// parsing testable without mutating process-global state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let production = lookup("TERMINAL_ENV")
            .map(|v| v.trim() == "production")
            .unwrap_or(false);

        let port = lookup("PORT")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let ws_port = lookup("WS_PORT")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(port + 1);

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_ORIGIN.to_string()]);

        let master_token = lookup("TERMINAL_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| (!production).then(|| DEV_MASTER_TOKEN.to_string()));

        let link_token_ttl = lookup("TERMINAL_LINK_TOKEN_TTL_SECONDS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_LINK_TOKEN_TTL_SECS));

        let cookie_secure = lookup("TERMINAL_COOKIE_SECURE")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"));

        let shell = lookup("SHELL").filter(|s| !s.trim().is_empty());

        let ssh = lookup("TERMINAL_SSH_TARGET")
            .filter(|t| !t.trim().is_empty())
            .map(|target| SshTarget {
                target: target.trim().to_string(),
                key_path: lookup("TERMINAL_SSH_KEY").filter(|k| !k.trim().is_empty()),
            });

        let tmux_enabled = !matches!(
            lookup("TERMINAL_USE_TMUX")
                .unwrap_or_else(|| "true".to_string())
                .trim()
                .to_lowercase()
                .as_str(),
            "0" | "false" | "no"
        );

        let tmux_session = lookup("TERMINAL_TMUX_SESSION").filter(|s| !s.trim().is_empty());

        Self {
            port,
            ws_port,
            allowed_origins,
            master_token,
            link_token_ttl,
            cookie_secure,
            production,
            shell,
            ssh,
            tmux_enabled,
            tmux_session,
        }
    }

    /// Whether the session cookie carries the `Secure` flag: explicit
    /// override if present, else true in production.
    pub fn cookie_secure_flag(&self) -> bool {
        self.cookie_secure.unwrap_or(self.production)
    }

    /// The tmux session name announced to clients and used for
    /// attach-or-create; sanitized so it is always a valid tmux name.
    pub fn tmux_session_name(&self) -> String {
        sanitize_session_name(
            self.tmux_session
                .as_deref()
                .unwrap_or(DEFAULT_TMUX_SESSION),
        )
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
    }

    /// Spawn-time configuration for terminal sessions derived from this
    /// server configuration.
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            shell: self.shell.clone(),
            working_dir: None,
            env: Vec::new(),
            ssh: self.ssh.clone(),
            tmux: self.tmux_enabled.then(|| TmuxOptions {
                session_name: self.tmux_session_name(),
            }),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// Restrict a tmux session name to `[A-Za-z0-9_-]`.
pub fn sanitize_session_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.ws_port, 3002);
        assert_eq!(config.allowed_origins, vec![DEFAULT_ORIGIN.to_string()]);
        // Outside production a development master token is available.
        assert_eq!(config.master_token.as_deref(), Some(DEV_MASTER_TOKEN));
        assert_eq!(config.link_token_ttl, Duration::from_secs(300));
        assert!(!config.cookie_secure_flag());
        assert!(config.tmux_enabled);
        assert!(config.ssh.is_none());
    }

    #[test]
    fn test_production_has_no_dev_token() {
        let config = ServerConfig::from_lookup(lookup_from(&[("TERMINAL_ENV", "production")]));
        assert!(config.production);
        assert!(config.master_token.is_none());
        // Secure defaults to "true in production".
        assert!(config.cookie_secure_flag());
    }

    #[test]
    fn test_explicit_master_token_is_trimmed() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("TERMINAL_ENV", "production"),
            ("TERMINAL_TOKEN", "  secret  "),
        ]));
        assert_eq!(config.master_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_origins_list_parsing() {
        let config = ServerConfig::from_lookup(lookup_from(&[(
            "ALLOWED_ORIGINS",
            "https://a.example, https://b.example ,",
        )]));
        assert_eq!(config.allowed_origins.len(), 2);
        assert!(config.origin_allowed("https://a.example"));
        assert!(config.origin_allowed("https://b.example"));
        assert!(!config.origin_allowed("https://c.example"));
    }

    #[test]
    fn test_ws_port_defaults_to_port_plus_one() {
        let config = ServerConfig::from_lookup(lookup_from(&[("PORT", "8000")]));
        assert_eq!(config.port, 8000);
        assert_eq!(config.ws_port, 8001);

        let config =
            ServerConfig::from_lookup(lookup_from(&[("PORT", "8000"), ("WS_PORT", "9000")]));
        assert_eq!(config.ws_port, 9000);
    }

    #[test]
    fn test_invalid_link_token_ttl_uses_default() {
        for value in ["0", "-5", "abc", ""] {
            let config = ServerConfig::from_lookup(lookup_from(&[(
                "TERMINAL_LINK_TOKEN_TTL_SECONDS",
                value,
            )]));
            assert_eq!(config.link_token_ttl, Duration::from_secs(300), "for {value:?}");
        }

        let config =
            ServerConfig::from_lookup(lookup_from(&[("TERMINAL_LINK_TOKEN_TTL_SECONDS", "60")]));
        assert_eq!(config.link_token_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_cookie_secure_override_wins() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("TERMINAL_ENV", "production"),
            ("TERMINAL_COOKIE_SECURE", "no"),
        ]));
        assert!(!config.cookie_secure_flag());

        let config = ServerConfig::from_lookup(lookup_from(&[("TERMINAL_COOKIE_SECURE", "yes")]));
        assert!(config.cookie_secure_flag());
    }

    #[test]
    fn test_tmux_toggle() {
        for value in ["0", "false", "no", " FALSE "] {
            let config =
                ServerConfig::from_lookup(lookup_from(&[("TERMINAL_USE_TMUX", value)]));
            assert!(!config.tmux_enabled, "for {value:?}");
        }
        let config = ServerConfig::from_lookup(lookup_from(&[("TERMINAL_USE_TMUX", "true")]));
        assert!(config.tmux_enabled);
    }

    #[test]
    fn test_ssh_target_with_key() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("TERMINAL_SSH_TARGET", "user@gateway"),
            ("TERMINAL_SSH_KEY", "/home/user/.ssh/id_ed25519"),
        ]));
        let ssh = config.ssh.expect("ssh target should be set");
        assert_eq!(ssh.target, "user@gateway");
        assert_eq!(ssh.key_path.as_deref(), Some("/home/user/.ssh/id_ed25519"));
    }

    #[test]
    fn test_spawn_config_carries_tmux_and_ssh() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("TERMINAL_SSH_TARGET", "user@gateway"),
            ("TERMINAL_TMUX_SESSION", "dev"),
        ]));
        let spawn = config.spawn_config();
        assert_eq!(spawn.ssh.as_ref().map(|s| s.target.as_str()), Some("user@gateway"));
        assert_eq!(spawn.tmux.as_ref().map(|t| t.session_name.as_str()), Some("dev"));

        let config = ServerConfig::from_lookup(lookup_from(&[("TERMINAL_USE_TMUX", "0")]));
        assert!(config.spawn_config().tmux.is_none());
    }

    #[test]
    fn test_session_name_sanitized() {
        assert_eq!(sanitize_session_name("my session!"), "my-session-");
        assert_eq!(sanitize_session_name("ok_name-1"), "ok_name-1");

        let config = ServerConfig::from_lookup(lookup_from(&[(
            "TERMINAL_TMUX_SESSION",
            "dev env",
        )]));
        assert_eq!(config.tmux_session_name(), "dev-env");

        assert_eq!(ServerConfig::default().tmux_session_name(), "termlink-main");
    }
}
