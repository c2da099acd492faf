//! sightline: follow an activity feed from the command line.
//!
//! Either shows the feed of one version or task, or follows a JSON file that
//! stands in for the host application's metadata bag and switches feeds
//! whenever it changes. Bus events are printed to stdout as JSON lines.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sightline_client::HttpBackend;
use sightline_sync::{
    ActivityFilter, Backends, EngineCommand, EngineConfig, EventBus, FeedEngine, FeedTarget,
    HostMetadata, HostNotification, HostView, ViewerTracker,
};

#[derive(Parser)]
#[command(name = "sightline")]
#[command(author, version, about = "Follow an activity feed")]
#[command(group(ArgGroup::new("entity").args(["version_id", "task_id", "follow"]).required(true)))]
struct Cli {
    /// Project name
    #[arg(short, long)]
    project: Option<String>,

    /// Version id to show
    #[arg(long = "version-id", requires = "project")]
    version_id: Option<String>,

    /// Task id to show
    #[arg(long = "task-id", requires = "project")]
    task_id: Option<String>,

    /// JSON file with `{"entityId", "projectId"}` to follow as the host view
    #[arg(short, long)]
    follow: Option<PathBuf>,

    /// Initial filter: all, comments, published, checklists
    #[arg(long, default_value = "all")]
    filter: ActivityFilter,
}

/// Host view backed by a JSON file on disk.
struct FileHostView {
    path: PathBuf,
}

impl HostView for FileHostView {
    fn active_metadata(&self) -> Option<HostMetadata> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Host file unreadable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Host file is not valid metadata");
                None
            }
        }
    }
}

fn init_tracing() {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   RUST_LOG    - standard env filter (default: "sightline=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sightline=info,sightline_sync=info,sightline_client=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    let backend = HttpBackend::from_env().context("Failed to connect to backend")?;
    let bus = Arc::new(EventBus::default());
    let mut events = bus.tap();

    let (engine, handle) = FeedEngine::new(
        config.clone(),
        Backends::from_backend(backend),
        Arc::clone(&bus),
    );
    let engine_task = tokio::spawn(engine.run());

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => match serde_json::to_string(&envelope) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to encode event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    handle.send(EngineCommand::SetFilter(cli.filter)).await?;

    let tracker = match (&cli.follow, &cli.project) {
        (Some(path), _) => {
            info!(path = %path.display(), "Following host file");
            let host = Arc::new(FileHostView { path: path.clone() });
            let tracker = ViewerTracker::new(host, config.debounce()).spawn(handle.sender());
            tracker.notify(HostNotification::ForceRecheck);
            Some(tracker)
        }
        (None, Some(project)) => {
            let target = match (&cli.version_id, &cli.task_id) {
                (Some(id), _) => FeedTarget::version(project, id),
                (None, Some(id)) => FeedTarget::task(project, id),
                (None, None) => anyhow::bail!("--version-id or --task-id is required"),
            };
            handle.send(EngineCommand::Select(target)).await?;
            None
        }
        (None, None) => anyhow::bail!("--project is required without --follow"),
    };

    // The file gives no change callbacks, so poke the tracker on a fixed
    // cadence. The period must exceed the debounce window or the timer never
    // settles.
    let mut poll = tokio::time::interval(config.debounce() * 2);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {
                if let Some(tracker) = &tracker {
                    if !tracker.notify(HostNotification::ViewChanged) {
                        break;
                    }
                }
            }
        }
    }

    info!("Shutting down");
    if let Some(tracker) = tracker {
        tracker.shutdown().await;
    }
    handle.shutdown().await.ok();
    engine_task.await.ok();
    Ok(())
}
