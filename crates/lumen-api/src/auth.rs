//! Authentication: WebSocket token extraction and admin bearer middleware.
//!
//! WebSocket credentials are accepted over four transports, in this
//! priority order: `Authorization: Bearer` header, WebSocket subprotocol
//! pair (`chat, <token>`), `?token=` query parameter, `token` cookie. The
//! first transport that yields a token wins; later ones are not consulted.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

/// Token plus the subprotocol to echo back on accept, if the token came in
/// via the subprotocol list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WsCredentials {
    pub token: Option<String>,
    pub subprotocol: Option<String>,
}

/// Extract the WebSocket access token from the documented transports.
pub fn extract_ws_token(headers: &HeaderMap, query: Option<&str>) -> WsCredentials {
    if let Some(token) = token_from_auth_header(headers) {
        return WsCredentials {
            token: Some(token),
            subprotocol: None,
        };
    }
    if let Some((token, subprotocol)) = token_from_subprotocol(headers) {
        return WsCredentials {
            token: Some(token),
            subprotocol: Some(subprotocol),
        };
    }
    if let Some(token) = query.and_then(|q| query_param(q, "token")) {
        return WsCredentials {
            token: Some(token),
            subprotocol: None,
        };
    }
    if let Some(token) = token_from_cookie(headers) {
        return WsCredentials {
            token: Some(token),
            subprotocol: None,
        };
    }
    WsCredentials::default()
}

fn token_from_auth_header(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
            Some(token.to_string())
        }
        _ => None,
    }
}

/// Subprotocol transport: `Sec-WebSocket-Protocol: chat, <token>`.
///
/// The token entry may carry a `token:` prefix; only the part after the
/// last colon is the credential. The first entry is echoed back as the
/// accepted subprotocol.
fn token_from_subprotocol(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get("sec-websocket-protocol")?.to_str().ok()?;
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 2 {
        return None;
    }
    let token = parts[1].rsplit(':').next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some((token.to_string(), parts[0].to_string()))
}

fn token_from_cookie(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("cookie")?.to_str().ok()?;
    for pair in value.split(';') {
        let mut kv = pair.trim().splitn(2, '=');
        if kv.next() == Some("token") {
            let token = kv.next()?.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

/// First value of `key` in a raw query string. Tokens are expected to be
/// URL-safe, so no percent-decoding is applied.
fn query_param(query: &str, key: &str) -> Option<String> {
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        if kv.next() == Some(key) {
            let value = kv.next().unwrap_or("");
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Middleware guarding the admin surface with `ADMIN_API_KEY`.
pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let authorized = token_from_auth_header(req.headers())
        .map(|token| token == state.config.admin_api_key)
        .unwrap_or(false);

    if authorized {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "unauthorized",
                "message": "Missing or invalid bearer token"
            })),
        )
            .into_response()
    }
}
