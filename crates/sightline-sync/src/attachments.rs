//! Bounded concurrent attachment downloads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use sightline_core::{Attachment, AttachmentRef, AttachmentSource, FileRef, Generation};

/// One finished download, addressed to the activity it belongs to.
#[derive(Debug, Clone)]
pub struct AttachmentDelivery {
    pub generation: Generation,
    pub activity_index: usize,
    pub activity_id: String,
    pub file_id: String,
    /// `None` when the download failed.
    pub attachment: Option<Attachment>,
}

/// Downloads attachments with at most `workers` requests in flight.
///
/// The cap is shared by every batch and every clone of the loader.
#[derive(Clone)]
pub struct AttachmentLoader {
    source: Arc<dyn AttachmentSource>,
    workers: usize,
    permits: Arc<Semaphore>,
}

impl AttachmentLoader {
    pub fn new(source: Arc<dyn AttachmentSource>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            source,
            workers,
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Download every ref and collect the results by file id.
    ///
    /// A failing item maps to `None`; it never fails the batch.
    pub async fn load_batch(
        &self,
        project: &str,
        refs: &[AttachmentRef],
    ) -> HashMap<String, Option<Attachment>> {
        let started = Instant::now();
        let results: HashMap<String, Option<Attachment>> = stream::iter(refs.iter().cloned())
            .map(|r| {
                let source = Arc::clone(&self.source);
                let permits = Arc::clone(&self.permits);
                let project = project.to_string();
                async move {
                    let attachment = fetch_one(source.as_ref(), &permits, &project, &r).await;
                    (r.file_id, attachment)
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        debug!(
            project = %project,
            requested = refs.len(),
            loaded = results.values().filter(|a| a.is_some()).count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Attachment batch complete"
        );
        results
    }

    /// Download `refs` in the background, sending each result as it completes.
    ///
    /// Stops early if the receiving side goes away.
    pub fn spawn_batch<M>(
        &self,
        project: String,
        generation: Generation,
        refs: Vec<AttachmentRef>,
        tx: mpsc::Sender<M>,
    ) -> JoinHandle<()>
    where
        M: From<AttachmentDelivery> + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        let permits = Arc::clone(&self.permits);
        let workers = self.workers;

        tokio::spawn(async move {
            let total = refs.len();
            let mut deliveries = stream::iter(refs)
                .map(|r| {
                    let source = Arc::clone(&source);
                    let permits = Arc::clone(&permits);
                    let project = project.clone();
                    async move {
                        let attachment =
                            fetch_one(source.as_ref(), &permits, &project, &r).await;
                        AttachmentDelivery {
                            generation,
                            activity_index: r.activity_index,
                            activity_id: r.activity_id,
                            file_id: r.file_id,
                            attachment,
                        }
                    }
                })
                .buffer_unordered(workers);

            let mut sent = 0;
            while let Some(delivery) = deliveries.next().await {
                if tx.send(M::from(delivery)).await.is_err() {
                    debug!(%generation, sent, total, "Attachment receiver closed, stopping batch");
                    return;
                }
                sent += 1;
            }
            trace!(%generation, total, "Attachment batch delivered");
        })
    }
}

async fn fetch_one(
    source: &dyn AttachmentSource,
    permits: &Semaphore,
    project: &str,
    r: &AttachmentRef,
) -> Option<Attachment> {
    let _permit = permits.acquire().await.ok()?;
    let file = FileRef {
        id: r.file_id.clone(),
        filename: r.filename.clone(),
    };
    match source.fetch_file(project, &file).await {
        Ok(attachment) => Some(attachment),
        Err(e) => {
            warn!(
                file_id = %r.file_id,
                activity_id = %r.activity_id,
                error = %e,
                "Attachment download failed"
            );
            None
        }
    }
}
