use axum::{
    body::Bytes,
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, LoginRequest, MessageResponse,
            PasswordResetConfirm, PasswordResetRequest, PublicUser, RegisterRequest,
            VerifyRequest, VerifyResponse,
        },
        repo_types::Role,
        services::{AuthService, AuthUser},
    },
    error::AppError,
    extract::AppJson,
    state::AppState,
};

const RESET_REQUESTED: &str = "if the email exists, reset instructions have been sent";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/verify", post(verify))
        .route("/auth/change-password", post(change_password))
        .route("/auth/password-reset/request", post(request_reset))
        .route("/auth/password-reset/confirm", post(confirm_reset))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let outcome = AuthService::from_ref(&state)
        .login(&payload.email, &payload.password)
        .await?;

    Ok(Json(AuthResponse {
        token: outcome.token.token,
        token_type: "Bearer",
        expires_at: outcome.token.expires_at,
        user: outcome.user.into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    caller: AuthUser,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<PublicUser>), AppError> {
    caller.require_role(&[Role::Admin])?;

    let user = AuthService::from_ref(&state)
        .register_user(&payload.name, &payload.email, &payload.password, &payload.role)
        .await?;

    info!(admin_id = %caller.id, user_id = %user.id, "account created by admin");
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Checks a token from the body or the Authorization header. An empty body
/// falls back to the header.
#[instrument(skip(state, headers, body))]
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<VerifyResponse>, AppError> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(Json::<VerifyRequest>::from_bytes(&body)?.0)
    };
    let from_body = payload.and_then(|p| p.token).filter(|t| !t.trim().is_empty());
    let credential = match from_body {
        Some(t) => t,
        None => headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::invalid_field("token", "token must be sent in the body or Authorization header")
            })?,
    };

    let (claims, user) = AuthService::from_ref(&state).resolve(&credential).await?;
    let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp)
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(Json(VerifyResponse {
        valid: true,
        user: user.into(),
        expires_at,
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let user = state
        .users
        .find_by_id(caller.id)
        .await?
        .ok_or_else(AppError::invalid_token)?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    caller: AuthUser,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    AuthService::from_ref(&state)
        .change_password(
            caller.id,
            &payload.current_password,
            &payload.new_password,
            &payload.confirm_password,
        )
        .await?;
    Ok(Json(MessageResponse {
        message: "password changed",
    }))
}

#[instrument(skip(state, payload))]
pub async fn request_reset(
    State(state): State<AppState>,
    AppJson(payload): AppJson<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    AuthService::from_ref(&state)
        .request_password_reset(&payload.email)
        .await?;
    Ok(Json(MessageResponse {
        message: RESET_REQUESTED,
    }))
}

#[instrument(skip(state, payload))]
pub async fn confirm_reset(
    State(state): State<AppState>,
    AppJson(payload): AppJson<PasswordResetConfirm>,
) -> Result<Json<MessageResponse>, AppError> {
    AuthService::from_ref(&state)
        .confirm_password_reset(
            &payload.email,
            &payload.code,
            &payload.new_password,
            &payload.confirm_password,
        )
        .await?;
    Ok(Json(MessageResponse {
        message: "password reset",
    }))
}
