//! Auth sessions backing the HTTP session cookie.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::{now_ms, random_id};

/// Default lifetime for a session created from a personal login.
pub const DEFAULT_NORMAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default lifetime for a session created from a shared one-time token.
/// Deliberately shorter: shared links are handed to other people.
pub const DEFAULT_SHARED_TTL: Duration = Duration::from_secs(60 * 60);

const SESSION_ENTROPY_BYTES: usize = 32;

/// How a session was established. The tier decides the TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTier {
    /// Authenticated with the fixed master credential.
    Normal,
    /// Authenticated by consuming a shared one-time token.
    Shared,
}

/// A freshly created auth session.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: String,
    /// Lifetime granted to the session, for the cookie `Max-Age`.
    pub ttl: Duration,
}

struct SessionEntry {
    expires_at_ms: u64,
    #[allow(dead_code)]
    tier: SessionTier,
}

/// Store for cookie-backed auth sessions.
///
/// The server never trusts anything from the client beyond the opaque id
/// looked up here. Expired entries are deleted lazily on the next
/// validity check rather than by a background sweep.
pub struct SessionStore {
    normal_ttl: Duration,
    shared_ttl: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new(normal_ttl: Duration, shared_ttl: Duration) -> Self {
        Self {
            normal_ttl,
            shared_ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a session with the TTL for `tier`.
    pub fn create(&self, tier: SessionTier) -> CreatedSession {
        let ttl = match tier {
            SessionTier::Normal => self.normal_ttl,
            SessionTier::Shared => self.shared_ttl,
        };
        let session_id = random_id(SESSION_ENTROPY_BYTES);
        let expires_at_ms = now_ms() + ttl.as_millis() as u64;

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(
            session_id.clone(),
            SessionEntry {
                expires_at_ms,
                tier,
            },
        );

        log::info!("created {tier:?} session (ttl {}s)", ttl.as_secs());
        CreatedSession { session_id, ttl }
    }

    /// `true` iff the session exists and has not expired. An expired entry
    /// is deleted as a side effect, so later lookups miss outright.
    pub fn is_valid(&self, session_id: &str) -> bool {
        if session_id.is_empty() {
            return false;
        }

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(session_id) {
            Some(entry) if entry.expires_at_ms > now_ms() => true,
            Some(_) => {
                sessions.remove(session_id);
                false
            }
            None => false,
        }
    }

    /// Delete a session. Idempotent; unknown ids are a no-op.
    pub fn revoke(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.remove(session_id).is_some() {
            log::info!("revoked session");
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_NORMAL_TTL, DEFAULT_SHARED_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_create_and_validate() {
        let store = SessionStore::default();
        let created = store.create(SessionTier::Normal);
        assert!(store.is_valid(&created.session_id));
    }

    #[test]
    fn test_unknown_session_invalid() {
        let store = SessionStore::default();
        assert!(!store.is_valid("nope"));
        assert!(!store.is_valid(""));
    }

    #[test]
    fn test_shared_tier_gets_shorter_ttl() {
        let store = SessionStore::default();
        let normal = store.create(SessionTier::Normal);
        let shared = store.create(SessionTier::Shared);
        assert!(shared.ttl < normal.ttl);
    }

    #[test]
    fn test_expiry_is_lazy_but_final() {
        let store = SessionStore::new(Duration::from_millis(10), Duration::from_millis(10));
        let created = store.create(SessionTier::Shared);

        thread::sleep(Duration::from_millis(30));

        // First check after expiry fails and deletes the entry.
        assert!(!store.is_valid(&created.session_id));
        // Re-querying still fails: the entry is gone, not just stale.
        assert!(!store.is_valid(&created.session_id));
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let store = SessionStore::default();
        let created = store.create(SessionTier::Normal);

        store.revoke(&created.session_id);
        assert!(!store.is_valid(&created.session_id));
        // Second revoke of the same id must not panic or error.
        store.revoke(&created.session_id);
    }

    #[test]
    fn test_sessions_are_independent() {
        let store = SessionStore::default();
        let a = store.create(SessionTier::Normal);
        let b = store.create(SessionTier::Normal);

        store.revoke(&a.session_id);
        assert!(!store.is_valid(&a.session_id));
        assert!(store.is_valid(&b.session_id));
    }
}
