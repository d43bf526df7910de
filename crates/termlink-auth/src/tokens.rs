//! One-time login tokens for out-of-band sharing (QR codes, share links).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::{now_ms, random_id};

/// Default lifetime for a one-time login token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

const TOKEN_ENTROPY_BYTES: usize = 24;

/// What an issued token is intended for. A personal token backs the
/// issuer's own device hand-off; a shared token is given to someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    Personal,
    Shared,
}

/// A freshly issued one-time login token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Expiry as epoch milliseconds, as sent to the client.
    pub expires_at_ms: u64,
    pub purpose: TokenPurpose,
}

struct TokenEntry {
    expires_at_ms: u64,
    #[allow(dead_code)]
    purpose: TokenPurpose,
}

/// Store for one-time login tokens.
///
/// Each token is consumable exactly once: [`TokenStore::consume`] checks
/// validity and deletes the entry under a single lock, so two concurrent
/// consumers of the same token cannot both succeed.
pub struct TokenStore {
    ttl: Duration,
    tokens: Mutex<HashMap<String, TokenEntry>>,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a new token valid for the configured TTL.
    pub fn issue(&self, purpose: TokenPurpose) -> IssuedToken {
        let token = random_id(TOKEN_ENTROPY_BYTES);
        let expires_at_ms = now_ms() + self.ttl.as_millis() as u64;

        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        sweep_expired(&mut tokens);
        tokens.insert(
            token.clone(),
            TokenEntry {
                expires_at_ms,
                purpose,
            },
        );

        log::debug!("issued one-time login token (expires {expires_at_ms})");
        IssuedToken {
            token,
            expires_at_ms,
            purpose,
        }
    }

    /// Consume a token. Returns `true` for the first valid use and deletes
    /// the entry; absent, expired, or blank tokens return `false`.
    pub fn consume(&self, token: &str) -> bool {
        if token.trim().is_empty() {
            return false;
        }

        // Check-and-delete in one step: remove() always deletes the entry,
        // and the expiry guard decides whether the use counts.
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        match tokens.remove(token) {
            Some(entry) if entry.expires_at_ms > now_ms() => true,
            _ => false,
        }
    }

    /// Number of live (unswept) tokens. Test and introspection aid.
    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sweep_expired(tokens: &mut HashMap<String, TokenEntry>) {
    let now = now_ms();
    tokens.retain(|_, entry| entry.expires_at_ms > now);
}
