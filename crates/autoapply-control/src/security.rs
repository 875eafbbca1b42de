use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use tracing::Instrument;

use crate::auth::{self, CSRF_COOKIE_NAME};
use crate::request_meta::{REQUEST_ID_HEADER, RequestMeta};

const CSRF_HEADER_NAME: &str = "x-csrf-token";
const DEV_ORIGINS: &str = "http://localhost:5173,http://127.0.0.1:5173";

// Procedures reachable without a session.
const PUBLIC_PROCEDURES: &[&str] = &["control.ping"];

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

fn json_error(code: StatusCode, message: impl Into<String>) -> Response {
    (code, axum::Json(ErrorBody { message: message.into() })).into_response()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    OriginNotAllowed,
    CsrfMismatch,
}

impl Rejection {
    fn message(self) -> &'static str {
        match self {
            Rejection::OriginNotAllowed => "origin not allowed",
            Rejection::CsrfMismatch => "csrf invalid",
        }
    }
}

/// Browser-origin rules for state-changing requests: the `Origin` header, when
/// present, must be allowlisted, and cookie-bearing requests must echo the
/// `csrf` cookie in `x-csrf-token`.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed_origins: Vec<String>,
}

impl OriginPolicy {
    pub fn new(allowed_origins: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_origins: allowed_origins.into_iter().collect(),
        }
    }

    /// `AUTOAPPLY_ALLOWED_ORIGINS`, comma separated; local dev servers when unset.
    pub fn from_env() -> Self {
        let raw = std::env::var("AUTOAPPLY_ALLOWED_ORIGINS").unwrap_or_else(|_| DEV_ORIGINS.to_string());
        Self::new(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
    }

    pub fn check(&self, method: &Method, headers: &HeaderMap) -> Result<(), Rejection> {
        if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
            return Ok(());
        }
        // No Origin header: not a browser request.
        if let Some(origin) = headers.get(header::ORIGIN) {
            let allowed = origin
                .to_str()
                .is_ok_and(|o| self.allowed_origins.iter().any(|a| a == o));
            if !allowed {
                return Err(Rejection::OriginNotAllowed);
            }
        }
        let jar = CookieJar::from_headers(headers);
        if jar.iter().next().is_none() {
            return Ok(());
        }
        let echoed = headers.get(CSRF_HEADER_NAME).and_then(|v| v.to_str().ok());
        match (jar.get(CSRF_COOKIE_NAME), echoed) {
            (Some(cookie), Some(token)) if cookie.value() == token => Ok(()),
            _ => Err(Rejection::CsrfMismatch),
        }
    }
}

// Middleware: apply the origin policy before the request reaches a handler.
pub async fn csrf_and_origin(
    State(policy): State<Arc<OriginPolicy>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Err(rejection) = policy.check(req.method(), req.headers()) {
        tracing::debug!(method = %req.method(), ?rejection, "request rejected by origin policy");
        return json_error(StatusCode::FORBIDDEN, rejection.message());
    }
    next.run(req).await
}

fn procedure_key(path: &str) -> &str {
    let p = path.trim_start_matches('/');
    p.strip_prefix("rspc/").unwrap_or(p)
}

// Middleware: resolve the session for /rspc. Only allowlisted procedures may
// run without one.
pub async fn rspc_auth_guard(mut req: Request<Body>, next: Next) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    match auth::user_from_jar(&jar) {
        Some(user) => {
            req.extensions_mut().insert(user);
        }
        None => {
            if !PUBLIC_PROCEDURES.contains(&procedure_key(req.uri().path())) {
                return json_error(StatusCode::UNAUTHORIZED, "unauthorized");
            }
        }
    }
    next.run(req).await
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let ok = !raw.is_empty()
        && raw.len() <= 64
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    ok.then(|| raw.to_string())
}

// Middleware: honor a well-formed incoming request id or mint one, expose it to
// handlers and echo it back.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestMeta {
        request_id: request_id.clone(),
    });
    let span = tracing::info_span!("request", %request_id, method = %req.method(), path = %req.uri().path());

    let mut resp = next.run(req).instrument(span).await;
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    resp
}
