use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use uuid::Uuid;

/// Header carrying the caller's id. It is set by the identity layer in
/// front of this service, which has already authenticated the request.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let user_id = Uuid::parse_str(raw.trim()).map_err(|_| StatusCode::UNAUTHORIZED)?;
        if user_id.is_nil() {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(AuthUser { user_id })
    }
}
