//! Authorization header parsing.
//!
//! Turns `Authorization: Bearer <token>` and `Authorization: Basic <b64>`
//! into a [`Credential`]. Verification happens later in the pipeline.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::services::auth::{AuthError, Credential};

/// Extract the credential carried by a request's headers.
pub fn credential_from_headers(headers: &HeaderMap) -> Result<Credential, AuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Err(AuthError::MissingCredential);
    };
    let value = value.to_str().map_err(|_| AuthError::MalformedCredential)?;
    parse_authorization(value)
}

/// Parse the value of an `Authorization` header.
pub fn parse_authorization(value: &str) -> Result<Credential, AuthError> {
    let (scheme, rest) = value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedCredential)?;
    let rest = rest.trim();

    if scheme.eq_ignore_ascii_case("bearer") {
        if rest.is_empty() {
            return Err(AuthError::MalformedCredential);
        }
        return Ok(Credential::Token(rest.to_string()));
    }

    if scheme.eq_ignore_ascii_case("basic") {
        let decoded = STANDARD
            .decode(rest)
            .map_err(|_| AuthError::MalformedCredential)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::MalformedCredential)?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or(AuthError::MalformedCredential)?;
        return Ok(Credential::Basic {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    Err(AuthError::MalformedCredential)
}
