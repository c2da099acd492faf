//! Fetch coordination and the generation gate.
//!
//! Every feed request gets a fresh [`Generation`]. Background work is tagged
//! with the generation it was issued under and reports back over a channel;
//! [`Coordinator::accept`] is the only place results are checked for
//! staleness. Superseded work is not aborted, its results are simply dropped
//! on arrival.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sightline_core::{
    ActivityPage, ActivityWriter, AttachmentSource, EntityResolver, Error, FeedSource,
    FeedTarget, Generation, PageRequest, Result, StatusOption,
};

use crate::attachments::AttachmentDelivery;
use crate::pager::FeedQuery;

/// The backend seams the engine talks to.
#[derive(Clone)]
pub struct Backends {
    pub feed: Arc<dyn FeedSource>,
    pub files: Arc<dyn AttachmentSource>,
    pub writer: Arc<dyn ActivityWriter>,
    pub resolver: Arc<dyn EntityResolver>,
}

impl Backends {
    /// Use one value for every seam.
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: FeedSource + AttachmentSource + ActivityWriter + EntityResolver + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            feed: backend.clone(),
            files: backend.clone(),
            writer: backend.clone(),
            resolver: backend,
        }
    }
}

/// A resolved and fetched first page.
#[derive(Debug, Clone)]
pub struct LoadedFeed {
    pub query: FeedQuery,
    pub page: ActivityPage,
    pub statuses: Vec<StatusOption>,
}

/// Backend mutation requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    ToggleChecklist {
        project: String,
        activity_id: String,
        item_index: usize,
        body: String,
    },
    UpdateStatus {
        target: FeedTarget,
        status: String,
    },
    PostComment {
        target: FeedTarget,
        body: String,
    },
}

/// Result of background work, delivered to the engine.
#[derive(Debug)]
pub enum FeedMessage {
    FeedLoaded {
        generation: Generation,
        target: FeedTarget,
        result: Result<LoadedFeed>,
    },
    OlderLoaded {
        generation: Generation,
        result: Result<ActivityPage>,
    },
    Attachment(AttachmentDelivery),
    WriteFinished {
        op: WriteOp,
        result: Result<()>,
    },
}

impl From<AttachmentDelivery> for FeedMessage {
    fn from(delivery: AttachmentDelivery) -> Self {
        FeedMessage::Attachment(delivery)
    }
}

/// Issues background fetches and owns the current generation.
pub struct Coordinator {
    current: Generation,
    backends: Backends,
    page_size: usize,
    tx: mpsc::Sender<FeedMessage>,
}

impl Coordinator {
    pub fn new(backends: Backends, page_size: usize, tx: mpsc::Sender<FeedMessage>) -> Self {
        Self {
            current: Generation::default(),
            backends,
            page_size,
            tx,
        }
    }

    pub fn current(&self) -> Generation {
        self.current
    }

    /// Channel background work reports on.
    pub fn sender(&self) -> mpsc::Sender<FeedMessage> {
        self.tx.clone()
    }

    /// Gate for results tagged with `generation`.
    pub fn accept(&self, generation: Generation) -> Result<()> {
        if generation == self.current {
            Ok(())
        } else {
            debug!(
                generation = generation.value(),
                current = self.current.value(),
                "Discarding stale result"
            );
            Err(Error::StaleResultDiscarded {
                generation: generation.value(),
                current: self.current.value(),
            })
        }
    }

    /// Start loading `target` under a new generation, superseding the previous one.
    pub fn request_feed(&mut self, target: FeedTarget) -> (Generation, JoinHandle<()>) {
        self.current = self.current.next();
        let generation = self.current;
        let backends = self.backends.clone();
        let page_size = self.page_size;
        let tx = self.tx.clone();

        info!(
            generation = generation.value(),
            project = %target.project,
            entity_id = %target.entity_id,
            "Requesting feed"
        );

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = load_feed(&backends, &target, page_size).await;
            debug!(
                generation = generation.value(),
                duration_ms = started.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "Feed fetch finished"
            );
            let sent = tx
                .send(FeedMessage::FeedLoaded {
                    generation,
                    target,
                    result,
                })
                .await;
            if sent.is_err() {
                debug!(
                    generation = generation.value(),
                    "Engine gone, dropping feed result"
                );
            }
        });
        (generation, handle)
    }

    /// Fetch an older page under the current generation.
    pub fn request_older(&self, request: PageRequest) -> JoinHandle<()> {
        let generation = self.current;
        let feed = Arc::clone(&self.backends.feed);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let result = feed.fetch_page(&request).await;
            if tx
                .send(FeedMessage::OlderLoaded { generation, result })
                .await
                .is_err()
            {
                debug!(
                    generation = generation.value(),
                    "Engine gone, dropping older page"
                );
            }
        })
    }

    /// Run a backend mutation off the engine task.
    pub fn request_write(&self, op: WriteOp) -> JoinHandle<()> {
        let writer = Arc::clone(&self.backends.writer);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let result = match &op {
                WriteOp::ToggleChecklist {
                    project,
                    activity_id,
                    body,
                    ..
                } => writer.update_activity(project, activity_id, body).await,
                WriteOp::UpdateStatus { target, status } => {
                    writer.update_status(target, status).await
                }
                WriteOp::PostComment { target, body } => writer.create_comment(target, body).await,
            };
            if tx
                .send(FeedMessage::WriteFinished { op, result })
                .await
                .is_err()
            {
                debug!("Engine gone, dropping write result");
            }
        })
    }
}

/// Resolve the entity set, fetch the newest page, and the status catalogue.
async fn load_feed(
    backends: &Backends,
    target: &FeedTarget,
    page_size: usize,
) -> Result<LoadedFeed> {
    let entity_ids = backends.resolver.feed_entities(target).await?;
    let query = FeedQuery::new(&target.project, entity_ids, page_size);

    let first = query.page(None);
    let (page, statuses) = tokio::join!(
        backends.feed.fetch_page(&first),
        backends.resolver.statuses(&target.project, target.kind),
    );
    let page = page?;
    let statuses = statuses.unwrap_or_else(|e| {
        warn!(project = %target.project, error = %e, "Status catalogue unavailable");
        Vec::new()
    });

    Ok(LoadedFeed {
        query,
        page,
        statuses,
    })
}
