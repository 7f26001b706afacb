//! Credential verification and bearer token issuance.
//!
//! Two schemes are accepted: signed bearer tokens (HMAC-SHA256 JWTs) and a
//! single configured basic username/password pair. Both resolve to an
//! [`Identity`] through [`Authenticator::authenticate`].

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;

/// Issuer recorded on identities resolved from basic credentials.
pub const BASIC_ISSUER: &str = "basic";

/// Authentication failures. Each kind is reported separately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,

    #[error("malformed credential")]
    MalformedCredential,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token has expired")]
    ExpiredToken,

    #[error("token issuer mismatch")]
    IssuerMismatch,

    #[error("token audience mismatch")]
    AudienceMismatch,

    #[error("invalid credentials")]
    InvalidCredentials,
}

impl AuthError {
    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::MalformedCredential => "malformed_credential",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::ExpiredToken => "expired_token",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::InvalidCredentials => "invalid_credentials",
        }
    }
}

/// A credential presented by a client.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Signed bearer token.
    Token(String),
    /// Username/password pair.
    Basic { username: String, password: String },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Token(_) => f.write_str("Credential::Token(..)"),
            Credential::Basic { username, .. } => f
                .debug_struct("Credential::Basic")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Verified claim about who is making a request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub issuer: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Bearer token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    pub iss: String,
    /// Subject (owner identifier).
    pub sub: String,
    /// Audience.
    pub aud: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Not before (Unix timestamp).
    pub nbf: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Unique token ID.
    pub jti: String,
}

/// A freshly signed bearer token.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// Stateless verifier for both credential schemes.
#[derive(Clone)]
pub struct Authenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    token_ttl: Duration,
    basic: Option<BasicPair>,
}

/// SHA-256 digests of the configured basic pair, so comparisons run over
/// fixed-length inputs.
#[derive(Clone)]
struct BasicPair {
    username: [u8; 32],
    password: [u8; 32],
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let basic = match (&config.basic_user, &config.basic_pass) {
            (Some(user), Some(pass)) => Some(BasicPair {
                username: digest(user),
                password: digest(pass),
            }),
            _ => None,
        };

        Self {
            encoding_key: EncodingKey::from_secret(config.token_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.token_secret.as_bytes()),
            issuer: config.token_issuer.clone(),
            audience: config.token_audience.clone(),
            token_ttl: config.token_ttl,
            basic,
        }
    }

    /// Verify a credential and return the identity it proves.
    pub fn authenticate(&self, credential: &Credential) -> Result<Identity, AuthError> {
        match credential {
            Credential::Token(token) => self.verify_token(token),
            Credential::Basic { username, password } => self.verify_basic(username, password),
        }
    }

    /// Sign a new token for `subject` using the deployment's fixed TTL.
    pub fn issue_token(&self, subject: &str) -> anyhow::Result<IssuedToken> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.token_ttl.as_secs()).context("token TTL out of range")?;

        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: self.audience.clone(),
            iat: now,
            nbf: now,
            exp: now + ttl,
            jti: Uuid::now_v7().to_string(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode token")?;

        Ok(IssuedToken {
            token,
            token_type: "Bearer",
            expires_in: self.token_ttl.as_secs(),
        })
    }

    fn verify_token(&self, token: &str) -> Result<Identity, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
                ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
                _ => AuthError::MalformedCredential,
            })?;

        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::MalformedCredential);
        }

        Ok(Identity {
            subject: claims.sub,
            issuer: claims.iss,
            expires_at: DateTime::from_timestamp(claims.exp, 0),
        })
    }

    fn verify_basic(&self, username: &str, password: &str) -> Result<Identity, AuthError> {
        let Some(pair) = &self.basic else {
            return Err(AuthError::InvalidCredentials);
        };

        let user_ok = digest(username)[..].ct_eq(&pair.username[..]);
        let pass_ok = digest(password)[..].ct_eq(&pair.password[..]);

        if bool::from(user_ok & pass_ok) {
            Ok(Identity {
                subject: username.to_string(),
                issuer: BASIC_ISSUER.to_string(),
                expires_at: None,
            })
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("token_ttl", &self.token_ttl)
            .field("basic_enabled", &self.basic.is_some())
            .finish()
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}
