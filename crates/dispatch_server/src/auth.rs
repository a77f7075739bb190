//! Bearer-token authentication. Tokens are HS256 JWTs issued by the account
//! service; this service only verifies them.

use std::time::Duration;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use dispatch_core::ids::ActorId;
use dispatch_core::ride::ActorRole;
use jsonwebtoken::{decode, encode, get_current_timestamp, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: ActorId,
    pub role: ActorRole,
    pub exp: u64,
}

pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Sign a token for `actor_id`. Used by tooling and tests.
    pub fn issue(
        &self,
        actor_id: ActorId,
        role: ActorRole,
        ttl: Duration,
    ) -> jsonwebtoken::errors::Result<String> {
        let claims = Claims {
            sub: actor_id,
            role,
            exp: get_current_timestamp() + ttl.as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedActor, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| AppError::Unauthenticated(format!("invalid token: {err}")))?;
        Ok(AuthenticatedActor {
            actor_id: data.claims.sub,
            role: data.claims.role,
        })
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedActor {
    pub actor_id: ActorId,
    pub role: ActorRole,
}

impl AuthenticatedActor {
    pub fn require(&self, role: ActorRole) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "route is for {} accounts",
                role_name(role)
            )))
        }
    }
}

fn role_name(role: ActorRole) -> &'static str {
    match role {
        ActorRole::Rider => "rider",
        ActorRole::Driver => "driver",
    }
}

impl FromRequestParts<AppState> for AuthenticatedActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthenticated("missing bearer token".to_string()))?;
        state.auth.verify(token)
    }
}
