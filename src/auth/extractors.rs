use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use super::services::{AuthService, AuthUser};
use crate::{error::AppError, state::AppState};

/// Reads the Authorization header and resolves it to a live account.
#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AppError::Auth("missing Authorization header"))?;

        AuthService::from_ref(state).authenticate(header).await
    }
}
