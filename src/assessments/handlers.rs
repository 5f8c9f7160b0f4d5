use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{AssessmentOptions, AssessmentQuery, AssessmentRequest, DeletedResponse},
    repo_types::Assessment,
    services,
};
use crate::{
    auth::services::AuthUser,
    error::AppError,
    extract::{AppJson, AppPath, AppQuery},
    state::AppState,
};

pub fn assessment_routes() -> Router<AppState> {
    Router::new()
        .route("/assessments", get(list_assessments).post(create_assessment))
        .route("/assessments/options", get(options))
        .route(
            "/assessments/:id",
            get(get_assessment)
                .put(update_assessment)
                .delete(delete_assessment),
        )
}

#[instrument(skip(state))]
pub async fn list_assessments(
    State(state): State<AppState>,
    _caller: AuthUser,
    AppQuery(q): AppQuery<AssessmentQuery>,
) -> Result<Json<Vec<Assessment>>, AppError> {
    let items = services::list_assessments(state.assessments.as_ref(), q).await?;
    Ok(Json(items))
}

#[instrument(skip(state, payload))]
pub async fn create_assessment(
    State(state): State<AppState>,
    caller: AuthUser,
    AppJson(payload): AppJson<AssessmentRequest>,
) -> Result<(StatusCode, HeaderMap, Json<Assessment>), AppError> {
    let created = services::create_assessment(state.assessments.as_ref(), &caller, payload).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = format!("/api/v1/assessments/{}", created.id).parse() {
        headers.insert(header::LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(created)))
}

pub async fn options(_caller: AuthUser) -> Json<AssessmentOptions> {
    Json(AssessmentOptions::all())
}

#[instrument(skip(state))]
pub async fn get_assessment(
    State(state): State<AppState>,
    _caller: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Assessment>, AppError> {
    let a = services::get_assessment(state.assessments.as_ref(), id).await?;
    Ok(Json(a))
}

#[instrument(skip(state, payload))]
pub async fn update_assessment(
    State(state): State<AppState>,
    caller: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<AssessmentRequest>,
) -> Result<Json<Assessment>, AppError> {
    let a = services::update_assessment(state.assessments.as_ref(), &caller, id, payload).await?;
    Ok(Json(a))
}

#[instrument(skip(state))]
pub async fn delete_assessment(
    State(state): State<AppState>,
    caller: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<DeletedResponse>, AppError> {
    services::delete_assessment(state.assessments.as_ref(), &caller, id).await?;
    Ok(Json(DeletedResponse {
        message: "assessment deleted",
    }))
}
