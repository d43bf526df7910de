//! termlink-auth: in-memory credential state for the terminal server.
//!
//! Two stores, both keyed by opaque random strings:
//!
//! - [`TokenStore`] — short-lived one-time login tokens, good for exactly
//!   one successful authentication (QR / share-link logins).
//! - [`SessionStore`] — longer-lived auth sessions backing the HTTP cookie.
//!
//! Neither store runs background timers; expired entries are swept lazily
//! on the next mutation or lookup. All lookups that miss collapse to
//! `false` rather than errors.

pub mod sessions;
pub mod tokens;

use data_encoding::BASE64URL_NOPAD;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

pub use sessions::{CreatedSession, SessionStore, SessionTier};
pub use tokens::{IssuedToken, TokenPurpose, TokenStore};

/// Generate an opaque URL-safe identifier with `bytes` bytes of entropy.
///
/// Panics if the OS random source is unavailable; that is a fatal startup
/// condition, not a recoverable one.
pub fn random_id(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    BASE64URL_NOPAD.encode(&buf)
}

/// Current wall-clock time as epoch milliseconds.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
