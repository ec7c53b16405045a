use axum::Json;
use axum::extract::Path;
use axum::routing::{post, put};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::repository;
use crate::error::AppError;
use crate::models::*;
use crate::services::AttendanceLedger;
use crate::services::ledger::ensure_valid_id;
use crate::state::AppState;

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/", get(root))
        .route("/courses", get(list_courses).post(create_course))
        .route(
            "/courses/{id}",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/attendance", post(create_attendance))
        .route("/attendance/course/{id}", get(list_course_attendance))
        .route("/attendance/absences", get(list_absences))
        .route(
            "/attendance/{id}",
            put(update_attendance).delete(delete_attendance),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "University Calendar API".to_string(),
    })
}

fn validate_percentage(pct: f64) -> Result<(), AppError> {
    if !(0.0..=100.0).contains(&pct) {
        return Err(AppError::BadRequest(format!(
            "minAttendancePercentage must be between 0 and 100, got {pct}"
        )));
    }
    Ok(())
}

async fn list_courses(State(state): State<AppState>) -> Result<Json<Vec<Course>>, AppError> {
    let courses = repository::fetch_courses(&state.db).await?;
    Ok(Json(courses))
}

async fn create_course(
    State(state): State<AppState>,
    Json(req): Json<NewCourseRequest>,
) -> Result<Json<Course>, AppError> {
    validate_percentage(req.min_attendance_percentage)?;
    let course = repository::insert_course(&state.db, req).await?;
    Ok(Json(course))
}

async fn get_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Course>, AppError> {
    ensure_valid_id(&id)?;
    let course = repository::find_course_by_id(&state.db, &id)
        .await?
        .ok_or(AppError::NotFound("Course"))?;
    Ok(Json(course))
}

async fn update_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCourseRequest>,
) -> Result<Json<Course>, AppError> {
    ensure_valid_id(&id)?;
    if req.is_empty() {
        return Err(AppError::BadRequest("No data to update".to_string()));
    }
    if let Some(pct) = req.min_attendance_percentage {
        validate_percentage(pct)?;
    }

    let course = repository::update_course(&state.db, &id, req)
        .await?
        .ok_or(AppError::NotFound("Course"))?;
    Ok(Json(course))
}

async fn delete_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let ledger = AttendanceLedger::new(state.db.clone());
    ledger.delete_course(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_attendance(
    State(state): State<AppState>,
    Json(req): Json<NewAttendanceRequest>,
) -> Result<Json<AttendanceRecord>, AppError> {
    let ledger = AttendanceLedger::new(state.db.clone());
    let record = ledger.mark(req).await?;
    Ok(Json(record))
}

async fn list_course_attendance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AttendanceRecord>>, AppError> {
    let ledger = AttendanceLedger::new(state.db.clone());
    let records = ledger.list_for_course(&id).await?;
    Ok(Json(records))
}

async fn list_absences(
    State(state): State<AppState>,
) -> Result<Json<Vec<AbsenceWithCourse>>, AppError> {
    let ledger = AttendanceLedger::new(state.db.clone());
    let absences = ledger.list_absences().await?;
    Ok(Json(absences))
}

async fn update_attendance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateAttendanceRequest>,
) -> Result<Json<AttendanceRecord>, AppError> {
    let ledger = AttendanceLedger::new(state.db.clone());
    let record = ledger.update(&id, req).await?;
    Ok(Json(record))
}

async fn delete_attendance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let ledger = AttendanceLedger::new(state.db.clone());
    ledger.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
