//! HTTP Basic auth for the dashboard (single staff account).
//!
//! - Credentials come from `ECHOTRACE_ADMIN_USER` / `ECHOTRACE_ADMIN_PASS`
//! - When they are not configured every protected route fails closed with 500
//! - A failed check answers 401 with a `WWW-Authenticate` challenge so browsers prompt

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::routes::AppState;

const CHALLENGE: &str = "Basic realm=\"EchoTrace\", charset=\"UTF-8\"";

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a_bytes.len() {
        diff |= a_bytes[i] ^ b_bytes[i];
    }
    diff == 0
}

/// Extract `(user, password)` from an `Authorization: Basic ...` header value.
fn parse_basic(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value
        .strip_prefix("Basic ")
        .or_else(|| header_value.strip_prefix("basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn unauthorized(message: &'static str) -> Response {
    let mut response = (StatusCode::UNAUTHORIZED, message).into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE));
    response
}

pub async fn require_auth(State(state): State<Arc<AppState>>, req: Request<Body>, next: Next) -> Response {
    let Some(admin) = state.config.admin.as_ref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Dashboard credentials not configured",
        )
            .into_response();
    };

    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if header_value.is_empty() {
        return unauthorized("Missing Authorization header");
    }

    let Some((user, pass)) = parse_basic(header_value) else {
        return unauthorized("Malformed Authorization header");
    };

    // Evaluate both comparisons so timing does not reveal which half failed.
    let user_ok = constant_time_eq(&user, &admin.username);
    let pass_ok = constant_time_eq(&pass, &admin.password);
    if !(user_ok & pass_ok) {
        tracing::warn!("Rejected dashboard login attempt");
        return unauthorized("Invalid credentials");
    }

    next.run(req).await
}
