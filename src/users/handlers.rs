use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{dto::UpdateUserRequest, services};
use crate::{
    auth::{repo_types::Role, services::AuthUser, PublicUser},
    error::AppError,
    extract::{AppJson, AppPath},
    state::AppState,
};

pub fn users_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    caller.require_role(&[Role::Admin])?;
    let users = state.users.list().await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    caller: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    caller.require_role(&[Role::Admin])?;
    let user = services::get_user(state.users.as_ref(), id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    caller: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateUserRequest>,
) -> Result<Json<PublicUser>, AppError> {
    caller.require_role(&[Role::Admin])?;
    let user = services::update_user(state.users.as_ref(), caller.id, id, payload).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    caller: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require_role(&[Role::Admin])?;
    services::delete_user(state.users.as_ref(), caller.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
