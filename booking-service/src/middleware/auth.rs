//! Caller identity extraction.
//!
//! The authenticated user id is taken from the `X-User-ID` header, set by
//! the upstream authentication layer after it has validated the caller's
//! session. Session and token handling live entirely outside this service.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use prohealth_core::error::AppError;

/// Authenticated caller context.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Not authenticated")))?;

        let span = tracing::Span::current();
        span.record("user_id", user_id);

        Ok(UserContext {
            user_id: user_id.to_string(),
        })
    }
}
