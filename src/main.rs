use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use catcher::{
    embedder::{Embedder, HashingEmbedder, OpenAiEmbedder},
    error::CatcherError,
    organizer::OrganizerConfig,
    similarity::DEFAULT_SIMILARITY_THRESHOLD,
    Catcher,
};
use catcher_database::Db;
use catcher_heed_database::CatcherHeed;
use catcher_in_memory_database::CatcherInMemory;
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
struct Cli {
    #[clap(long, env = "CATCHER_HOST", default_value = "0.0.0.0")]
    host: String,
    #[clap(long, env = "CATCHER_PORT", default_value = "3000")]
    port: u16,
    /// Minimum cosine similarity for two events to share a thread.
    #[clap(long, env = "CATCHER_SIMILARITY_THRESHOLD", default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
    similarity_threshold: f32,
    #[clap(long, env = "CATCHER_EMBED_TIMEOUT_SECS", default_value = "10")]
    embed_timeout_secs: u64,
    /// Seconds between scheduled organize passes; 0 disables the schedule.
    #[clap(long, env = "CATCHER_ORGANIZE_INTERVAL_SECS", default_value = "60")]
    organize_interval_secs: u64,
    #[clap(long, env = "CATCHER_BATCH_LIMIT")]
    batch_limit: Option<usize>,
    #[clap(long, env = "CATCHER_EMBEDDER", value_enum, default_value = "hashing")]
    embedder: EmbedderKind,
    #[clap(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,
    #[clap(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,
    #[clap(long, env = "CATCHER_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,
    /// Defaults to 256 for the hashing embedder and 1536 for OpenAI.
    #[clap(long, env = "CATCHER_EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,
    #[clap(subcommand)]
    database: Option<Database>,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    Hashing,
    Openai,
}

#[derive(Default, Subcommand)]
enum Database {
    Heed {
        #[clap(long)]
        path: PathBuf,
    },
    #[default]
    InMemory,
}

impl Cli {
    fn embedder(&self) -> Result<Arc<dyn Embedder>, CatcherError> {
        Ok(match self.embedder {
            EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(
                self.embedding_dimensions.unwrap_or(256),
            )),
            EmbedderKind::Openai => {
                let api_key = self.openai_api_key.clone().ok_or_else(|| {
                    CatcherError::Configuration(
                        "--openai-api-key (or OPENAI_API_KEY) is required for the openai embedder"
                            .into(),
                    )
                })?;

                let mut embedder = OpenAiEmbedder::new(api_key).with_model(
                    self.embedding_model.clone(),
                    self.embedding_dimensions.unwrap_or(1536),
                );
                if let Some(base_url) = &self.openai_base_url {
                    embedder = embedder.with_base_url(base_url.clone());
                }
                Arc::new(embedder)
            }
        })
    }

    fn organizer_config(&self) -> OrganizerConfig {
        OrganizerConfig {
            similarity_threshold: self.similarity_threshold,
            embed_timeout: Duration::from_secs(self.embed_timeout_secs),
            batch_limit: self.batch_limit,
            ..Default::default()
        }
    }
}

fn spawn_organize_schedule(
    catcher: Catcher,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match catcher.organize_until(&shutdown).await {
                        Ok(report) if report.processed > 0 || !report.flagged.is_empty() => {
                            tracing::info!(
                                "scheduled pass organized {} events ({} flagged)",
                                report.processed,
                                report.flagged.len()
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Scheduled organize pass failed: {}", e),
                    }
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "{}=debug,catcher=debug,tower_http=debug",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut cli = Cli::parse();

    let db: Arc<dyn Db> = match cli.database.take().unwrap_or_default() {
        Database::Heed { path } => Arc::new(CatcherHeed::new(&path, true)?),
        Database::InMemory => Arc::new(CatcherInMemory::new()),
    };

    let catcher = Catcher::builder()
        .with_db(db)
        .with_embedder(cli.embedder()?)
        .with_organizer_config(cli.organizer_config())
        .with_offset(*Local::now().offset())
        .build()?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            tracing::info!("shutting down");
            shutdown.cancel();
        }
    });

    let schedule = (cli.organize_interval_secs > 0).then(|| {
        spawn_organize_schedule(
            catcher.clone(),
            Duration::from_secs(cli.organize_interval_secs),
            shutdown.clone(),
        )
    });

    catcher
        .listen(SocketAddr::new(cli.host.parse()?, cli.port), shutdown.clone())
        .await?;

    shutdown.cancel();
    if let Some(schedule) = schedule {
        schedule.await?;
    }

    Ok(())
}
