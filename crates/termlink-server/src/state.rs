//! Shared application state threaded through both routers.

use std::sync::Arc;

use termlink_auth::{SessionStore, TokenStore};
use termlink_pty::{PtyManager, TmuxHelper};

use crate::config::ServerConfig;

/// Everything a handler needs, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub tokens: Arc<TokenStore>,
    pub sessions: Arc<SessionStore>,
    pub pty: Arc<PtyManager>,
    pub tmux: Arc<TmuxHelper>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let tokens = Arc::new(TokenStore::new(config.link_token_ttl));
        let sessions = Arc::new(SessionStore::default());
        let pty = Arc::new(PtyManager::new(config.spawn_config()));
        let tmux = Arc::new(TmuxHelper::new(Arc::clone(&pty)));

        Self {
            config: Arc::new(config),
            tokens,
            sessions,
            pty,
            tmux,
        }
    }
}
