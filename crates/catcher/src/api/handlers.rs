use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use catcher_domain::{
    briefing::BriefingResponse,
    command::CommandOutcome,
    event::{Event, EventFilter, EventId, IngestEvent},
    status::{ReviewFlag, SystemStatus},
    thread::{Thread, ThreadId},
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{api::ApiError, organizer::OrganizeReport, Catcher};

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Deserialize)]
pub struct CommandRequest {
    pub text: String,
}

fn path_id(path: Result<Path<u64>, PathRejection>) -> Result<u64, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|e| ApiError::new(StatusCode::NOT_FOUND, e.body_text()))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn status(State(catcher): State<Catcher>) -> ApiResult<SystemStatus> {
    Ok(Json(catcher.status().await?))
}

pub async fn create_event(
    State(catcher): State<Catcher>,
    body: Result<Json<IngestEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let Json(input) = body.map_err(|e| ApiError::new(e.status(), e.body_text()))?;
    let event = catcher.ingest(input).await?;

    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn list_events(
    State(catcher): State<Catcher>,
    query: Result<Query<EventFilter>, QueryRejection>,
) -> ApiResult<Vec<Event>> {
    let Query(filter) =
        query.map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.body_text()))?;

    Ok(Json(catcher.list_events(filter).await?))
}

pub async fn organize(State(catcher): State<Catcher>) -> ApiResult<OrganizeReport> {
    Ok(Json(catcher.organize().await?))
}

pub async fn list_threads(State(catcher): State<Catcher>) -> ApiResult<Vec<Thread>> {
    Ok(Json(catcher.list_threads().await?))
}

pub async fn get_thread(
    State(catcher): State<Catcher>,
    path: Result<Path<u64>, PathRejection>,
) -> ApiResult<Thread> {
    let thread_id = ThreadId(path_id(path)?);
    Ok(Json(catcher.get_thread(thread_id).await?))
}

pub async fn get_thread_events(
    State(catcher): State<Catcher>,
    path: Result<Path<u64>, PathRejection>,
) -> ApiResult<Vec<Event>> {
    let thread_id = ThreadId(path_id(path)?);
    Ok(Json(catcher.get_thread_events(thread_id).await?))
}

pub async fn yesterday_briefing(State(catcher): State<Catcher>) -> ApiResult<BriefingResponse> {
    Ok(Json(catcher.yesterday_recap().await?))
}

pub async fn today_briefing(State(catcher): State<Catcher>) -> ApiResult<BriefingResponse> {
    Ok(Json(catcher.today_plan().await?))
}

pub async fn command(
    State(catcher): State<Catcher>,
    body: Result<Json<CommandRequest>, JsonRejection>,
) -> ApiResult<CommandOutcome> {
    let Json(request) = body.map_err(|e| ApiError::new(e.status(), e.body_text()))?;
    Ok(Json(catcher.command(&request.text).await?))
}

pub async fn list_review(State(catcher): State<Catcher>) -> ApiResult<Vec<ReviewFlag>> {
    Ok(Json(catcher.list_review().await?))
}

pub async fn clear_review(
    State(catcher): State<Catcher>,
    path: Result<Path<u64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let event_id = EventId(path_id(path)?);
    if catcher.clear_review(event_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, "not found"))
    }
}
