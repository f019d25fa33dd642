use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::extractors::AuthUser,
    courses::{
        dto::{CourseQuery, EnrollRequest, ProgressUpdate},
        repo_types::{Course, Enrollment, Module, ModuleProgress},
        services,
    },
    error::AppError,
    state::AppState,
};

pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/courses", get(list_courses))
        .route("/courses/:id", get(get_course))
        .route("/courses/:id/modules", get(list_modules))
}

pub fn learner_routes() -> Router<AppState> {
    Router::new()
        .route("/enrollments", post(enroll))
        .route("/enrollments/my", get(my_enrollments))
        .route("/progress", put(update_progress))
        .route("/progress/course/:id", get(course_progress))
}

#[instrument(skip(state))]
pub async fn list_courses(
    State(state): State<AppState>,
    Query(q): Query<CourseQuery>,
) -> Result<Json<Vec<Course>>, AppError> {
    let courses = state.courses.list_courses(q.category.as_deref()).await?;
    Ok(Json(courses))
}

#[instrument(skip(state))]
pub async fn get_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Course>, AppError> {
    let course = state.courses.get_course(&id)
        .await?
        .ok_or(AppError::NotFound("Course"))?;
    Ok(Json(course))
}

#[instrument(skip(state))]
pub async fn list_modules(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Module>>, AppError> {
    if state.courses.get_course(&id).await?.is_none() {
        return Err(AppError::NotFound("Course"));
    }
    let modules = state.courses.list_modules(&id).await?;
    Ok(Json(modules))
}

#[instrument(skip_all)]
pub async fn enroll(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<EnrollRequest>,
) -> Result<Json<Enrollment>, AppError> {
    let enrollment = services::enroll(
        state.courses.as_ref(),
        user.id,
        &body.course_id,
        body.terms_accepted,
    )
    .await?;
    Ok(Json(enrollment))
}

#[instrument(skip_all)]
pub async fn my_enrollments(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Enrollment>>, AppError> {
    let rows = state.courses.list_enrollments(user.id).await?;
    Ok(Json(rows))
}

#[instrument(skip_all)]
pub async fn update_progress(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<ProgressUpdate>,
) -> Result<Json<Enrollment>, AppError> {
    let enrollment =
        services::set_module_progress(state.courses.as_ref(), user.id, &body).await?;
    Ok(Json(enrollment))
}

#[instrument(skip_all)]
pub async fn course_progress(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<ModuleProgress>>, AppError> {
    let rows = state.courses.list_progress(user.id, &id).await?;
    Ok(Json(rows))
}
