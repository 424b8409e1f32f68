//! Authentication middleware.
//!
//! Clients send a shared bearer token. When `AUTH_SECRET` is unset the
//! server runs open and every request is treated as anonymous.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Authenticated caller extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The bearer token, or `anonymous` when auth is disabled
    #[allow(dead_code)]
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = check_token(state.config.auth_secret.as_deref(), auth_header)
            .map_err(|reason| (StatusCode::UNAUTHORIZED, reason))?;
        Ok(AuthUser { token })
    }
}

/// Validate an `Authorization` header against the configured secret.
fn check_token(secret: Option<&str>, header: Option<&str>) -> Result<String, &'static str> {
    match (secret, header) {
        (None, None) => Ok("anonymous".to_string()),
        (_, Some(header)) => {
            let token = header
                .strip_prefix("Bearer ")
                .ok_or("Invalid authorization header format")?;
            if token.is_empty() {
                return Err("Empty bearer token");
            }
            match secret {
                Some(secret) if !constant_time_eq(secret.as_bytes(), token.as_bytes()) => {
                    Err("Invalid bearer token")
                }
                _ => Ok(token.to_string()),
            }
        }
        (Some(_), None) => Err("Missing authorization header"),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_server_accepts_anonymous() {
        assert_eq!(check_token(None, None).unwrap(), "anonymous");
        assert_eq!(check_token(None, Some("Bearer abc")).unwrap(), "abc");
    }

    #[test]
    fn secret_must_match() {
        assert_eq!(check_token(Some("s3cret"), Some("Bearer s3cret")).unwrap(), "s3cret");
        assert!(check_token(Some("s3cret"), Some("Bearer nope")).is_err());
        assert!(check_token(Some("s3cret"), None).is_err());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(check_token(None, Some("Basic abc")).is_err());
        assert!(check_token(None, Some("Bearer ")).is_err());
    }
}
