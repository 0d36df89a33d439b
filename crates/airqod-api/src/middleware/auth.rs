//! HTTP Basic authentication for the administrative API.
//!
//! Every /api route sits behind this middleware. Credentials come from
//! configuration, not the database; the admin surface has a single
//! operator identity.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::AppState;

/// Extracts the username/password pair from an Authorization header.
/// Supports the Basic scheme: "Basic base64(user:pass)".
fn extract_basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Basic "))?;

    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Errors that can occur during Basic authentication.
#[derive(Debug)]
pub enum AuthError {
    /// The supplied credentials do not match the configured operator.
    InvalidCredentials,
    /// The Authorization header is missing or not Basic.
    MissingHeader,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            Self::InvalidCredentials => "Invalid credentials",
            Self::MissingHeader => "Missing Authorization header",
        };

        let mut response = (StatusCode::UNAUTHORIZED, message).into_response();
        if let Ok(challenge) = "Basic realm=\"airqod\"".parse() {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

/// Axum middleware that authenticates requests with HTTP Basic auth.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let (username, password) =
        extract_basic_credentials(req.headers()).ok_or(AuthError::MissingHeader)?;

    if username != state.admin.username || password != state.admin.password {
        return Err(AuthError::InvalidCredentials);
    }

    Ok(next.run(req).await)
}
