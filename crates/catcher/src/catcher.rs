pub mod api;
pub mod briefing;
pub mod command;
pub mod embedder;
pub mod error;
pub mod executor;
pub mod organizer;
pub mod similarity;
#[cfg(test)]
mod testing;
mod utils;

use std::{net::SocketAddr, sync::Arc};

use catcher_database::Db;
use catcher_domain::{
    briefing::BriefingResponse,
    command::CommandOutcome,
    event::{Event, EventFilter, EventId, IngestEvent},
    status::{ReviewFlag, SystemStatus},
    thread::{Thread, ThreadId},
};
use chrono::{FixedOffset, Offset, Utc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::{
    briefing::BriefingGenerator,
    command::{BrowserLauncher, CommandDispatcher, Launcher},
    embedder::Embedder,
    error::CatcherError,
    executor::{Executor, TokioExecutor},
    organizer::{OrganizeReport, Organizer, OrganizerConfig},
};

/// Personal context engine: collects events, threads related ones together
/// and turns the timeline into briefings.
#[derive(Clone)]
pub struct Catcher {
    db: Arc<dyn Db>,
    organizer: Organizer,
    briefings: BriefingGenerator,
    commands: CommandDispatcher,
    executor: Arc<dyn Executor>,
    organize_on_ingest: bool,
}

impl Catcher {
    pub fn builder() -> CatcherBuilder {
        CatcherBuilder {
            db: None,
            embedder: None,
            launcher: None,
            executor: None,
            organizer_config: OrganizerConfig::default(),
            offset: Utc.fix(),
            organize_on_ingest: true,
        }
    }

    pub async fn ingest(&self, input: IngestEvent) -> Result<Event, CatcherError> {
        let event = self.db.append_event(input.validate(Utc::now())?).await?;
        tracing::debug!("ingested {} event {}", event.source, event.id);

        if self.organize_on_ingest {
            self.schedule_organize();
        }

        Ok(event)
    }

    /// Runs a pass in the background unless one is already underway; events
    /// it misses are picked up by the next pass.
    fn schedule_organize(&self) {
        self.executor.spawn({
            let organizer = self.organizer.clone();

            Box::pin(async move {
                match organizer.try_organize().await {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => tracing::error!("Background organize failed: {}", e),
                    None => {
                        tracing::debug!("organize pass already running, not scheduling another")
                    }
                }
            })
        });
    }

    pub async fn get_event(&self, event_id: EventId) -> Result<Event, CatcherError> {
        Ok(self.db.get_event(event_id).await?)
    }

    pub async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>, CatcherError> {
        Ok(self.db.list_events(filter).await?)
    }

    pub async fn organize(&self) -> Result<OrganizeReport, CatcherError> {
        Ok(self.organizer.organize().await?)
    }

    pub async fn organize_until(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<OrganizeReport, CatcherError> {
        Ok(self.organizer.organize_until(shutdown).await?)
    }

    /// `None` when another pass is already running.
    pub async fn try_organize(&self) -> Option<Result<OrganizeReport, CatcherError>> {
        self.organizer
            .try_organize()
            .await
            .map(|result| result.map_err(CatcherError::from))
    }

    pub async fn list_threads(&self) -> Result<Vec<Thread>, CatcherError> {
        Ok(self.db.list_threads().await?)
    }

    pub async fn get_thread(&self, thread_id: ThreadId) -> Result<Thread, CatcherError> {
        Ok(self.db.get_thread(thread_id).await?)
    }

    pub async fn get_thread_events(&self, thread_id: ThreadId) -> Result<Vec<Event>, CatcherError> {
        Ok(self.db.get_thread_events(thread_id).await?)
    }

    pub async fn yesterday_recap(&self) -> Result<BriefingResponse, CatcherError> {
        Ok(self.briefings.yesterday_recap(Utc::now()).await?)
    }

    pub async fn today_plan(&self) -> Result<BriefingResponse, CatcherError> {
        Ok(self.briefings.today_plan(Utc::now()).await?)
    }

    pub fn briefings(&self) -> &BriefingGenerator {
        &self.briefings
    }

    pub async fn command(&self, text: &str) -> Result<CommandOutcome, CatcherError> {
        Ok(self.commands.process(text).await?)
    }

    pub async fn status(&self) -> Result<SystemStatus, CatcherError> {
        Ok(self.db.counts().await?.into())
    }

    pub async fn list_review(&self) -> Result<Vec<ReviewFlag>, CatcherError> {
        Ok(self.db.list_flagged().await?)
    }

    /// Puts a flagged event back in the organize queue.
    pub async fn clear_review(&self, event_id: EventId) -> Result<bool, CatcherError> {
        Ok(self.db.clear_flag(event_id).await?)
    }

    pub fn router(self) -> axum::Router {
        api::routes::router(self).layer(TraceLayer::new_for_http())
    }

    pub async fn listen(
        self,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), CatcherError> {
        let listener = TcpListener::bind(addr).await?;
        tracing::debug!("listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}

pub struct CatcherBuilder {
    db: Option<Arc<dyn Db>>,
    embedder: Option<Arc<dyn Embedder>>,
    launcher: Option<Arc<dyn Launcher>>,
    executor: Option<Arc<dyn Executor>>,
    organizer_config: OrganizerConfig,
    offset: FixedOffset,
    organize_on_ingest: bool,
}

impl CatcherBuilder {
    pub fn with_db(mut self, db: Arc<dyn Db>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_organizer_config(mut self, config: OrganizerConfig) -> Self {
        self.organizer_config = config;
        self
    }

    /// Offset used for briefing day boundaries and clock times.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_organize_on_ingest(mut self, enabled: bool) -> Self {
        self.organize_on_ingest = enabled;
        self
    }

    pub fn build(self) -> Result<Catcher, CatcherError> {
        let db = self
            .db
            .ok_or_else(|| CatcherError::Configuration("db is required".into()))?;
        let embedder = self
            .embedder
            .ok_or_else(|| CatcherError::Configuration("embedder is required".into()))?;

        let threshold = self.organizer_config.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(CatcherError::Configuration(format!(
                "similarity threshold must be within [-1, 1], got {threshold}"
            )));
        }
        if self.organizer_config.embed_timeout.is_zero() {
            return Err(CatcherError::Configuration(
                "embed timeout must be greater than zero".into(),
            ));
        }

        Ok(Catcher {
            organizer: Organizer::new(db.clone(), embedder, self.organizer_config),
            briefings: BriefingGenerator::new(db.clone(), self.offset),
            commands: CommandDispatcher::new(
                db.clone(),
                self.launcher.unwrap_or_else(|| Arc::new(BrowserLauncher)),
            ),
            executor: self.executor.unwrap_or_else(|| Arc::new(TokioExecutor)),
            organize_on_ingest: self.organize_on_ingest,
            db,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use catcher_domain::event::Source;
    use catcher_in_memory_database::CatcherInMemory;
    use serde_json::json;

    use super::*;
    use crate::{embedder::HashingEmbedder, testing::RecordingLauncher};

    fn ingest(source: Source, content: &str) -> IngestEvent {
        IngestEvent {
            source,
            content: content.to_string(),
            metadata: None,
            timestamp: None,
        }
    }

    fn catcher(organize_on_ingest: bool) -> Catcher {
        Catcher::builder()
            .with_db(Arc::new(CatcherInMemory::new()))
            .with_embedder(Arc::new(HashingEmbedder::default()))
            .with_launcher(Arc::new(RecordingLauncher::default()))
            .with_organize_on_ingest(organize_on_ingest)
            .build()
            .unwrap()
    }

    #[test]
    fn build_requires_a_store_and_an_embedder() {
        let err = Catcher::builder()
            .with_embedder(Arc::new(HashingEmbedder::default()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, CatcherError::Configuration(_)));

        let err = Catcher::builder()
            .with_db(Arc::new(CatcherInMemory::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, CatcherError::Configuration(_)));
    }

    #[test]
    fn build_rejects_out_of_range_threshold() {
        let result = Catcher::builder()
            .with_db(Arc::new(CatcherInMemory::new()))
            .with_embedder(Arc::new(HashingEmbedder::default()))
            .with_organizer_config(OrganizerConfig {
                similarity_threshold: 1.5,
                ..Default::default()
            })
            .build();
        assert!(matches!(result, Err(CatcherError::Configuration(_))));
    }

    #[tokio::test]
    async fn ingest_validates_metadata() {
        let catcher = catcher(false);
        let mut input = ingest(Source::Calendar, "standup");
        input.metadata = Some(json!({ "subject": "wrong source" }));

        let err = catcher.ingest(input).await.unwrap_err();
        assert!(matches!(err, CatcherError::Metadata(_)));
        assert_eq!(catcher.status().await.unwrap().counts.total_events, 0);
    }

    #[tokio::test]
    async fn ingest_then_organize_threads_related_events() {
        let catcher = catcher(false);
        for content in [
            "vendor pricing review for acme",
            "acme vendor pricing review follow up",
            "dentist appointment friday",
        ] {
            catcher.ingest(ingest(Source::Mail, content)).await.unwrap();
        }

        let status = catcher.status().await.unwrap();
        assert_eq!(status.counts.unprocessed_events, 3);

        let report = catcher.organize().await.unwrap();
        assert_eq!(report.processed, 3);

        let status = catcher.status().await.unwrap();
        assert_eq!(status.counts.unprocessed_events, 0);
        assert!(status.counts.total_threads >= 1);
        for thread in catcher.list_threads().await.unwrap() {
            assert!(!catcher.get_thread_events(thread.id).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn ingest_triggers_a_background_pass() {
        let catcher = catcher(true);
        let event = catcher
            .ingest(ingest(Source::Chat, "deploy task for friday"))
            .await
            .unwrap();

        let mut processed = false;
        for _ in 0..50 {
            if catcher.get_event(event.id).await.unwrap().processed {
                processed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(processed, "background pass should organize the event");
    }
}
