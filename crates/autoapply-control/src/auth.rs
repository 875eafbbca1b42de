use axum::{Json, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::rpc::AuthUser;

// Sessions are issued by the account service; this service only verifies the
// access token it leaves in the cookie jar.
pub const CSRF_COOKIE_NAME: &str = "csrf";
pub const ACCESS_COOKIE_NAME: &str = "access";

const JWT_ISSUER: &str = "autoapply";
const JWT_AUDIENCE: &str = "autoapply-web";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

fn json_error(code: StatusCode, message: impl Into<String>) -> impl IntoResponse {
    (code, Json(ErrorBody { message: message.into() }))
}

fn jwt_secret() -> Vec<u8> {
    std::env::var("AUTOAPPLY_JWT_SECRET")
        .unwrap_or_else(|_| "dev-insecure-change-me".to_string())
        .into_bytes()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub is_admin: bool,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub aud: String,
}

pub fn validate_access_jwt(token: &str) -> anyhow::Result<AuthUser> {
    validate_access_jwt_with(token, &jwt_secret())
}

pub fn validate_access_jwt_with(token: &str, secret: &[u8]) -> anyhow::Result<AuthUser> {
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_audience(&[JWT_AUDIENCE]);
    validation.set_issuer(&[JWT_ISSUER]);

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret),
        &validation,
    )?;

    // Owner ids are UUIDs; anything else cannot own rules.
    uuid::Uuid::parse_str(&data.claims.sub)
        .map_err(|_| anyhow::anyhow!("subject is not a user id"))?;

    Ok(AuthUser {
        user_id: data.claims.sub,
        username: data.claims.username,
        is_admin: data.claims.is_admin,
    })
}

pub fn user_from_jar(jar: &CookieJar) -> Option<AuthUser> {
    let token = jar.get(ACCESS_COOKIE_NAME)?;
    validate_access_jwt(token.value()).ok()
}

pub async fn whoami(jar: CookieJar) -> impl IntoResponse {
    let token = match jar.get(ACCESS_COOKIE_NAME) {
        Some(c) => c.value().to_string(),
        None => return json_error(StatusCode::UNAUTHORIZED, "missing access token").into_response(),
    };

    match validate_access_jwt(&token) {
        Ok(me) => (StatusCode::OK, Json(me)).into_response(),
        Err(_) => json_error(StatusCode::UNAUTHORIZED, "invalid access token").into_response(),
    }
}
