//! Test doubles shared by the unit tests of this crate.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use catcher_database::{Assignment, AssignmentOutcome, DatabaseError, Db};
use catcher_domain::{
    briefing::{Briefing, BriefingKind},
    command::CommandRecord,
    embedding::Embedding,
    event::{Event, EventFilter, EventId, NewEvent},
    status::{ReviewFlag, StoreCounts},
    thread::{CreateThread, Thread, ThreadId},
};
use chrono::{DateTime, Utc};

use crate::{
    command::{LaunchError, Launcher},
    embedder::{Embedder, EmbedderError},
};

#[derive(Clone, Default)]
struct Script {
    vector: Vec<f32>,
    delay: Option<Duration>,
    failures: usize,
    reported_dimensions: Option<usize>,
}

/// Answers with vectors registered per exact text. Unknown text fails like
/// an unreachable provider.
pub struct ScriptedEmbedder {
    model: String,
    dimensions: usize,
    scripts: Mutex<HashMap<String, Script>>,
    calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            model: "scripted".to_string(),
            dimensions,
            scripts: Mutex::default(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn set(&self, text: &str, vector: Vec<f32>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(text.to_string())
            .or_default()
            .vector = vector;
    }

    pub fn fail_once(&self, text: &str) {
        self.scripts
            .lock()
            .unwrap()
            .entry(text.to_string())
            .or_default()
            .failures += 1;
    }

    /// Makes the provider reject `text` with a dimension mismatch on every call.
    pub fn wrong_dimensions(&self, text: &str, actual: usize) {
        self.scripts
            .lock()
            .unwrap()
            .entry(text.to_string())
            .or_default()
            .reported_dimensions = Some(actual);
    }

    pub fn delay(&self, text: &str, delay: Duration) {
        self.scripts
            .lock()
            .unwrap()
            .entry(text.to_string())
            .or_default()
            .delay = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            let Some(script) = scripts.get_mut(text) else {
                return Err(EmbedderError::Unavailable(format!("no script for {text:?}")));
            };
            if script.failures > 0 {
                script.failures -= 1;
                return Err(EmbedderError::Unavailable("scripted outage".into()));
            }
            if let Some(actual) = script.reported_dimensions {
                return Err(EmbedderError::Dimensions {
                    expected: self.dimensions,
                    actual,
                });
            }
            script.clone()
        };

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        Ok(script.vector)
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    opened: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingLauncher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl Launcher for RecordingLauncher {
    fn open(&self, url: &str) -> Result<(), LaunchError> {
        if self.fail {
            return Err(LaunchError {
                url: url.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no browser"),
            });
        }
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// A store whose `get_embedding` answers from a preset table first, for
/// events that still carry a vector from an earlier embedding run.
pub struct PresetEmbeddings {
    inner: Arc<dyn Db>,
    preset: Mutex<HashMap<EventId, Embedding>>,
}

impl PresetEmbeddings {
    pub fn new(inner: Arc<dyn Db>) -> Self {
        Self {
            inner,
            preset: Mutex::default(),
        }
    }

    pub fn preset(&self, embedding: Embedding) {
        self.preset
            .lock()
            .unwrap()
            .insert(embedding.event_id, embedding);
    }
}

#[async_trait]
impl Db for PresetEmbeddings {
    async fn append_event(&self, input: NewEvent) -> Result<Event, DatabaseError> {
        self.inner.append_event(input).await
    }

    async fn get_event(&self, event_id: EventId) -> Result<Event, DatabaseError> {
        self.inner.get_event(event_id).await
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>, DatabaseError> {
        self.inner.list_events(filter).await
    }

    async fn list_unprocessed(&self, limit: Option<usize>) -> Result<Vec<Event>, DatabaseError> {
        self.inner.list_unprocessed(limit).await
    }

    async fn mark_processed(&self, event_id: EventId) -> Result<(), DatabaseError> {
        self.inner.mark_processed(event_id).await
    }

    async fn list_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, DatabaseError> {
        self.inner.list_in_window(start, end).await
    }

    async fn get_embedding(&self, event_id: EventId) -> Result<Option<Embedding>, DatabaseError> {
        let preset = self.preset.lock().unwrap().get(&event_id).cloned();
        match preset {
            Some(embedding) => Ok(Some(embedding)),
            None => self.inner.get_embedding(event_id).await,
        }
    }

    async fn list_embeddings(&self, model: &str) -> Result<Vec<Embedding>, DatabaseError> {
        self.inner.list_embeddings(model).await
    }

    async fn create_thread(&self, input: CreateThread) -> Result<Thread, DatabaseError> {
        self.inner.create_thread(input).await
    }

    async fn attach(&self, thread_id: ThreadId, event_id: EventId) -> Result<bool, DatabaseError> {
        self.inner.attach(thread_id, event_id).await
    }

    async fn thread_memberships(
        &self,
        event_ids: &[EventId],
    ) -> Result<BTreeMap<EventId, BTreeSet<ThreadId>>, DatabaseError> {
        self.inner.thread_memberships(event_ids).await
    }

    async fn commit_assignment(
        &self,
        assignment: Assignment,
    ) -> Result<AssignmentOutcome, DatabaseError> {
        self.inner.commit_assignment(assignment).await
    }

    async fn list_threads(&self) -> Result<Vec<Thread>, DatabaseError> {
        self.inner.list_threads().await
    }

    async fn get_thread(&self, thread_id: ThreadId) -> Result<Thread, DatabaseError> {
        self.inner.get_thread(thread_id).await
    }

    async fn get_thread_events(&self, thread_id: ThreadId) -> Result<Vec<Event>, DatabaseError> {
        self.inner.get_thread_events(thread_id).await
    }

    async fn flag_for_review(
        &self,
        event_id: EventId,
        reason: String,
    ) -> Result<(), DatabaseError> {
        self.inner.flag_for_review(event_id, reason).await
    }

    async fn list_flagged(&self) -> Result<Vec<ReviewFlag>, DatabaseError> {
        self.inner.list_flagged().await
    }

    async fn clear_flag(&self, event_id: EventId) -> Result<bool, DatabaseError> {
        self.inner.clear_flag(event_id).await
    }

    async fn store_briefing(
        &self,
        kind: BriefingKind,
        content: String,
    ) -> Result<Briefing, DatabaseError> {
        self.inner.store_briefing(kind, content).await
    }

    async fn list_briefings(&self, limit: Option<usize>) -> Result<Vec<Briefing>, DatabaseError> {
        self.inner.list_briefings(limit).await
    }

    async fn record_command(&self, record: CommandRecord) -> Result<(), DatabaseError> {
        self.inner.record_command(record).await
    }

    async fn counts(&self) -> Result<StoreCounts, DatabaseError> {
        self.inner.counts().await
    }
}
