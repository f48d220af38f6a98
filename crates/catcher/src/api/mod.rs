pub mod handlers;
pub mod routes;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use catcher_database::DatabaseError;
use serde_json::json;

use crate::error::CatcherError;

/// Error response rendered as `{ "error": message }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound => ApiError::new(StatusCode::NOT_FOUND, "not found"),
            DatabaseError::InvalidInput(message) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, message)
            }
            other => {
                tracing::error!("Store failure while serving request: {}", other);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl From<CatcherError> for ApiError {
    fn from(err: CatcherError) -> Self {
        match err {
            CatcherError::Store(err) => err.into(),
            CatcherError::Metadata(err) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            other => {
                tracing::error!("Request failed: {}", other);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{self, Request, StatusCode},
        Router,
    };
    use catcher_in_memory_database::CatcherInMemory;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{embedder::HashingEmbedder, testing::RecordingLauncher, Catcher};

    fn app() -> Router {
        Catcher::builder()
            .with_db(Arc::new(CatcherInMemory::new()))
            .with_embedder(Arc::new(HashingEmbedder::default()))
            .with_launcher(Arc::new(RecordingLauncher::default()))
            .with_organize_on_ingest(false)
            .build()
            .unwrap()
            .router()
    }

    async fn send(
        app: &Router,
        method: http::Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(http::header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref());
        let body = match body {
            Some(value) => Body::from(serde_json::to_vec(&value).unwrap()),
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, value)
    }

    #[tokio::test]
    async fn health_and_empty_status() {
        let app = app();

        let (status, body) = send(&app, http::Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app, http::Method::GET, "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_events"], 0);
        assert_eq!(body["status"], "running");
    }

    #[tokio::test]
    async fn events_are_ingested_listed_and_organized() {
        let app = app();

        let (status, created) = send(
            &app,
            http::Method::POST,
            "/events",
            Some(json!({
                "source": "gmail",
                "content": "URGENT: sign the vendor contract",
                "metadata": { "priority": "high", "subject": "Contract" },
                "timestamp": "2024-05-02T08:00:00Z"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["source"], "mail");
        assert_eq!(created["processed"], false);
        assert_eq!(created["metadata"]["priority"], "high");

        send(
            &app,
            http::Method::POST,
            "/events",
            Some(json!({ "source": "slack", "content": "deploy task" })),
        )
        .await;

        let (status, listed) = send(&app, http::Method::GET, "/events?source=mail", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, report) = send(&app, http::Method::POST, "/organize", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["processed"], 2);

        let (_, threads) = send(&app, http::Method::GET, "/threads", None).await;
        let thread_id = threads[0]["id"].as_u64().unwrap();

        let (status, thread) =
            send(&app, http::Method::GET, &format!("/threads/{thread_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(thread["status"], "active");

        let (status, members) = send(
            &app,
            http::Method::GET,
            &format!("/threads/{thread_id}/events"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!members.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_metadata_is_unprocessable() {
        let app = app();

        let (status, body) = send(
            &app,
            http::Method::POST,
            "/events",
            Some(json!({
                "source": "calendar",
                "content": "standup",
                "metadata": { "priority": "whenever" }
            })),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("whenever"));
    }

    #[tokio::test]
    async fn malformed_body_renders_json_error() {
        let app = app();

        let (status, body) = send(
            &app,
            http::Method::POST,
            "/events",
            Some(json!({ "source": "fax", "content": "hello" })),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn unknown_thread_is_not_found() {
        let app = app();

        let (status, body) = send(&app, http::Method::GET, "/threads/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "not found" }));
    }

    #[tokio::test]
    async fn briefings_return_text_and_type() {
        let app = app();

        let (status, body) = send(&app, http::Method::GET, "/briefing/yesterday", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "yesterday");
        assert_eq!(
            body["text"],
            "Yesterday was a quiet day with no recorded activities."
        );

        let (status, body) = send(&app, http::Method::GET, "/briefing/today", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "today");
    }

    #[tokio::test]
    async fn command_returns_outcome() {
        let app = app();

        let (status, body) = send(
            &app,
            http::Method::POST,
            "/command",
            Some(json!({ "text": "Search YouTube for lo-fi music" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["parsed_command"]["action"], "search_web");
        assert_eq!(body["parsed_command"]["provider"], "youtube");
        assert_eq!(body["parsed_command"]["query"], "lo-fi music");
        assert!(body["command_id"].is_string());
    }

    #[tokio::test]
    async fn review_queue_starts_empty() {
        let app = app();

        let (status, body) = send(&app, http::Method::GET, "/review", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, body) = send(&app, http::Method::DELETE, "/review/7", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }
}
