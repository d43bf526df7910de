//! HTTP API: login, session cookie, link tokens, health.

use axum::extract::{Json, Request, State};
use axum::http::header::{HeaderValue, COOKIE, ORIGIN, SET_COOKIE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;

use termlink_auth::{SessionTier, TokenPurpose};

use crate::state::AppState;

pub const SESSION_COOKIE_NAME: &str = "termlink_session";

/// Build the HTTP API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/session", get(session_check))
        .route("/auth", post(auth))
        .route("/logout", post(logout))
        .route("/link-token", post(link_token))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state)
}

/// CORS with credentials. The wildcard origin is not allowed alongside
/// cookies, so the request origin is reflected back only when it is on
/// the allowlist. Preflights are answered here with 204.
async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let allowed = origin
        .as_deref()
        .map(|o| state.config.origin_allowed(o))
        .unwrap_or(false);

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    if allowed {
        if let Some(origin) = origin.and_then(|o| HeaderValue::from_str(&o).ok()) {
            let headers = response.headers_mut();
            headers.insert("access-control-allow-origin", origin);
            headers.insert(
                "access-control-allow-credentials",
                HeaderValue::from_static("true"),
            );
            headers.insert(
                "access-control-allow-methods",
                HeaderValue::from_static("GET,POST,OPTIONS"),
            );
            headers.insert(
                "access-control-allow-headers",
                HeaderValue::from_static("Content-Type"),
            );
            headers.insert("vary", HeaderValue::from_static("Origin"));
        }
    }

    response
}

/// Parse the `Cookie` header into name/value pairs.
pub fn parse_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|raw| {
            raw.split(';')
                .filter_map(|pair| {
                    let (name, value) = pair.split_once('=')?;
                    Some((name.trim().to_string(), value.trim().to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Extract the session id from the request cookies, if present.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    parse_cookies(headers)
        .into_iter()
        .find(|(name, _)| name == SESSION_COOKIE_NAME)
        .map(|(_, value)| value)
}

/// Compare two secrets in time independent of where they first differ.
/// Length is not secret here; a mismatch still returns early.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn session_cookie(session_id: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={session_id}; Max-Age={max_age_secs}; Path=/; HttpOnly; SameSite=Lax"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Report whether the caller holds a valid session cookie.
async fn session_check(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let valid = session_id_from_headers(&headers)
        .map(|id| state.sessions.is_valid(&id))
        .unwrap_or(false);

    if valid {
        Json(json!({ "authenticated": true })).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "authenticated": false })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct AuthRequest {
    token: Option<String>,
}

/// Exchange a credential for a session cookie.
///
/// Accepts either the fixed master token or a one-time link token; the
/// latter grants the shorter shared-tier session. A missing or malformed
/// body falls through to the same 401 as a bad token.
async fn auth(State(state): State<AppState>, body: Option<Json<AuthRequest>>) -> Response {
    let token = body
        .and_then(|Json(req)| req.token)
        .unwrap_or_default();

    let tier = if state
        .config
        .master_token
        .as_deref()
        .is_some_and(|master| !token.is_empty() && constant_time_eq(&token, master))
    {
        Some(SessionTier::Normal)
    } else if state.tokens.consume(&token) {
        Some(SessionTier::Shared)
    } else {
        None
    };

    let Some(tier) = tier else {
        log::warn!("auth attempt rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "message": "Invalid token" })),
        )
            .into_response();
    };

    let created = state.sessions.create(tier);
    let cookie = session_cookie(
        &created.session_id,
        created.ttl.as_secs(),
        state.config.cookie_secure_flag(),
    );

    let mut response = Json(json!({ "ok": true })).into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(SET_COOKIE, value);
    }
    response
}

/// Revoke the caller's session and clear the cookie. Always succeeds so
/// logout cannot be blocked by an already-dead session.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(session_id) = session_id_from_headers(&headers) {
        state.sessions.revoke(&session_id);
    }

    let clear = format!("{SESSION_COOKIE_NAME}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax");
    let mut response = Json(json!({ "ok": true })).into_response();
    if let Ok(value) = HeaderValue::from_str(&clear) {
        response.headers_mut().insert(SET_COOKIE, value);
    }
    response
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkTokenRequest {
    #[serde(default)]
    is_share: bool,
}

#[derive(Debug, Serialize)]
struct LinkTokenResponse {
    ok: bool,
    token: String,
    #[serde(rename = "expiresAt")]
    expires_at: u64,
}

/// Issue a one-time login token. Requires an authenticated session; the
/// token is meant for hand-off to another device or person.
async fn link_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<LinkTokenRequest>>,
) -> Response {
    let authenticated = session_id_from_headers(&headers)
        .map(|id| state.sessions.is_valid(&id))
        .unwrap_or(false);
    if !authenticated {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "message": "Authentication required" })),
        )
            .into_response();
    }

    let purpose = if body.map(|Json(req)| req.is_share).unwrap_or(false) {
        TokenPurpose::Shared
    } else {
        TokenPurpose::Personal
    };

    let issued = state.tokens.issue(purpose);
    Json(LinkTokenResponse {
        ok: true,
        token: issued.token,
        expires_at: issued.expires_at_ms,
    })
    .into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not found" })),
    )
        .into_response()
}
