use crate::AppState;
use crate::error::Error;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use super::claims::{UserClaims, UserContext};

/// Resolve the caller from a `Bearer` JWT and attach a [`UserContext`].
///
/// Without a token the request fails with 401 when JWT is required,
/// otherwise it continues as the configured development user, or with no
/// identity at all.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Error> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(token) = auth_header.and_then(|v| v.strip_prefix("Bearer ")) else {
        if state.config.security.jwt_required {
            return Err(Error::Unauthenticated);
        }
        if let Some(dev_user) = &state.config.security.dev_user {
            request
                .extensions_mut()
                .insert(UserContext::anonymous(dev_user.clone()));
        }
        return Ok(next.run(request).await);
    };

    let key = DecodingKey::from_secret(state.config.security.jwt_secret.as_bytes());
    let claims = decode::<UserClaims>(token, &key, &Validation::default())
        .map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            Error::Unauthenticated
        })?
        .claims;

    request
        .extensions_mut()
        .insert(UserContext::from_claims(claims));
    Ok(next.run(request).await)
}

impl<S: Send + Sync> FromRequestParts<S> for UserContext {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserContext>()
            .cloned()
            .ok_or(Error::Unauthenticated)
    }
}
