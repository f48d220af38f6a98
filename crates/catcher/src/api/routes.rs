use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::{api::handlers, Catcher};

pub fn router(catcher: Catcher) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/events", post(handlers::create_event))
        .route("/events", get(handlers::list_events))
        .route("/organize", post(handlers::organize))
        .route("/threads", get(handlers::list_threads))
        .route("/threads/:id", get(handlers::get_thread))
        .route("/threads/:id/events", get(handlers::get_thread_events))
        .route("/briefing/yesterday", get(handlers::yesterday_briefing))
        .route("/briefing/today", get(handlers::today_briefing))
        .route("/command", post(handlers::command))
        .route("/review", get(handlers::list_review))
        .route("/review/:id", delete(handlers::clear_review))
        .with_state(catcher)
}
