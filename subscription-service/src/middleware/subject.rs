//! Authenticated subject extraction.
//!
//! The hosted identity provider issues HS256 access tokens; the `sub` claim is
//! the subject id the client also sends to the payment provider as customer id.

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::sync::Arc;

use crate::config::AuthConfig;

/// Claims read from identity provider access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
}

/// Verifies bearer tokens issued by the identity provider.
#[derive(Clone)]
pub struct SubjectVerifier {
    decoding_key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl SubjectVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_audience(&[config.audience.as_str()]);

        Self {
            decoding_key: Arc::new(DecodingKey::from_secret(
                config.jwt_secret.expose_secret().as_bytes(),
            )),
            validation: Arc::new(validation),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;

        if token_data.claims.sub.trim().is_empty() {
            anyhow::bail!("Access token has no subject");
        }

        Ok(token_data.claims)
    }
}

/// Subject of a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedSubject {
    pub subject_id: String,
    pub email: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedSubject
where
    SubjectVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing bearer token")))?;

        let verifier = SubjectVerifier::from_ref(state);
        let claims = verifier.verify(token).map_err(AppError::Unauthorized)?;

        tracing::Span::current().record("subject_id", claims.sub.as_str());

        Ok(AuthenticatedSubject {
            subject_id: claims.sub,
            email: claims.email,
        })
    }
}
