use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use thiserror::Error;
use tower::{Layer, Service, ServiceExt};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("token rejected: {0}")]
    InvalidToken(String),
    #[error("token subject is not a user id")]
    InvalidSubject,
}

/// Resolves a bearer credential to the user it was issued for.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Uuid, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Verifies HS256 JWTs minted by the identity issuer.
pub struct JwtIdentityProvider {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_audience(&[audience]);
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, token: &str) -> Result<Uuid, IdentityError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| IdentityError::InvalidToken(e.to_string()))?;
        Uuid::parse_str(&data.claims.sub).map_err(|_| IdentityError::InvalidSubject)
    }
}

/// Authenticated user extracted from the `Authorization: Bearer <token>` header.
///
/// Two-phase resolution:
/// 1. Auth middleware (`InjectAuthLayer`) runs first: verifies the token, injects into extensions
/// 2. Handler extractor reads from extensions, or verifies directly as a fallback
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

// --- Tower Layer/Service for auth injection ---

/// Tower Layer that injects `AuthenticatedUser` into request extensions.
/// Silently continues on auth failure (unauthenticated endpoints like health).
#[derive(Clone)]
pub struct InjectAuthLayer {
    identity: Arc<dyn IdentityProvider>,
}

impl InjectAuthLayer {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }
}

impl<S> Layer<S> for InjectAuthLayer {
    type Service = InjectAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectAuthService {
            inner,
            identity: self.identity.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InjectAuthService<S> {
    inner: S,
    identity: Arc<dyn IdentityProvider>,
}

impl<S> Service<Request> for InjectAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let identity = self.identity.clone();

        // Extract token synchronously (headers are Send-safe, Body is not)
        let token = bearer_token(req.headers()).map(str::to_owned);

        Box::pin(async move {
            if let Some(token) = token {
                match identity.verify(&token).await {
                    Ok(user_id) => {
                        req.extensions_mut().insert(AuthenticatedUser { user_id });
                    }
                    Err(e) => tracing::debug!(error = %e, "bearer token rejected"),
                }
            }
            Ok(ready.oneshot(req).await.into_response())
        })
    }
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

// --- Extractor (used by handlers) ---

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Fast path: auth middleware already verified the token
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(*user);
        }

        if parts.headers.get("authorization").is_none() {
            return Err(AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
                docs_hint: Some("Include 'Authorization: Bearer <token>' header.".to_string()),
            });
        }
        let token = bearer_token(&parts.headers).ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header must use Bearer scheme".to_string(),
            docs_hint: Some("Format: 'Authorization: Bearer <token>'".to_string()),
        })?;

        let user_id = state.identity.verify(token).await.map_err(|e| {
            tracing::warn!(error = %e, "authentication failed");
            AppError::Unauthorized {
                message: "Invalid or expired access token".to_string(),
                docs_hint: Some("Obtain a fresh token from the identity provider.".to_string()),
            }
        })?;
        Ok(AuthenticatedUser { user_id })
    }
}
