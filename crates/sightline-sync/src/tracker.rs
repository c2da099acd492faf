//! Viewer state tracking for host-synchronized feeds.
//!
//! Host applications fire many notifications while the user scrubs, switches
//! sources, or loads media. None of them are trusted. Each one (re)arms a
//! single-shot debounce timer; when it fires, the host's metadata is read
//! once and a [`ViewerContext`] is emitted only if it differs from the last
//! one seen.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

use sightline_core::{HostNotification, HostView, ViewerContext};

/// Debounce state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Pending { deadline: Instant },
}

/// Debounced host watcher. Pure state machine; [`ViewerTracker::spawn`] drives it.
pub struct ViewerTracker {
    host: Arc<dyn HostView>,
    debounce: Duration,
    state: TrackerState,
    last: Option<ViewerContext>,
    reads: u64,
}

impl ViewerTracker {
    pub fn new(host: Arc<dyn HostView>, debounce: Duration) -> Self {
        Self {
            host,
            debounce,
            state: TrackerState::Idle,
            last: None,
            reads: 0,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Last context emitted (or applied from `InitialLoad`).
    pub fn last_context(&self) -> Option<&ViewerContext> {
        self.last.as_ref()
    }

    /// Number of host reads performed so far.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            TrackerState::Idle => None,
            TrackerState::Pending { deadline } => Some(deadline),
        }
    }

    /// Handle a notification received at `now`.
    ///
    /// Only `InitialLoad` can produce a context immediately; everything else
    /// just (re)arms the timer.
    pub fn notify(&mut self, notification: HostNotification, now: Instant) -> Option<ViewerContext> {
        match notification {
            HostNotification::InitialLoad(context) => {
                trace!(entity_id = %context.entity_id, "Initial load notification");
                self.apply(context)
            }
            HostNotification::ForceRecheck => {
                self.force_recheck(now);
                None
            }
            other => {
                trace!(notification = ?other, "Host notification");
                self.arm(now);
                None
            }
        }
    }

    /// Forget the cached context and arm the timer, so the next read emits
    /// even if nothing changed.
    pub fn force_recheck(&mut self, now: Instant) {
        debug!("Forced viewer recheck");
        self.last = None;
        self.arm(now);
    }

    fn arm(&mut self, now: Instant) {
        self.state = TrackerState::Pending {
            deadline: now + self.debounce,
        };
    }

    /// Timer expiry: read the host once and emit if the context changed.
    pub fn fire(&mut self) -> Option<ViewerContext> {
        self.state = TrackerState::Idle;
        self.reads += 1;

        let Some(context) = self.host.active_metadata().and_then(|m| m.context()) else {
            debug!("Host has no complete viewer context");
            return None;
        };
        self.apply(context)
    }

    fn apply(&mut self, context: ViewerContext) -> Option<ViewerContext> {
        if self.last.as_ref() == Some(&context) {
            debug!(entity_id = %context.entity_id, "Viewer context unchanged");
            return None;
        }
        info!(
            entity_id = %context.entity_id,
            project = %context.project_id,
            "Viewer context changed"
        );
        self.last = Some(context.clone());
        Some(context)
    }

    /// Run the tracker on its own task, forwarding changed contexts to `sink`.
    ///
    /// The task ends when the returned handle is dropped or the sink closes.
    pub fn spawn<M>(mut self, sink: mpsc::Sender<M>) -> TrackerHandle
    where
        M: From<ViewerContext> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<HostNotification>();

        let task = tokio::spawn(async move {
            loop {
                let deadline = self.deadline();
                let changed = tokio::select! {
                    notification = rx.recv() => match notification {
                        Some(n) => self.notify(n, Instant::now()),
                        None => break,
                    },
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        self.fire()
                    }
                };

                if let Some(context) = changed {
                    if sink.send(M::from(context)).await.is_err() {
                        break;
                    }
                }
            }
            debug!("Viewer tracker stopped");
        });

        TrackerHandle { tx, task }
    }
}

/// Feeds host notifications into a running tracker.
pub struct TrackerHandle {
    tx: mpsc::UnboundedSender<HostNotification>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    /// Forward a notification. Never blocks, so it is safe to call from host
    /// callbacks. Returns `false` once the tracker has stopped.
    pub fn notify(&self, notification: HostNotification) -> bool {
        self.tx.send(notification).is_ok()
    }

    /// Stop the tracker and wait for its task to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_core::HostMetadata;
    use std::sync::Mutex;

    struct FakeHost {
        meta: Mutex<Option<HostMetadata>>,
    }

    impl FakeHost {
        fn showing(entity: &str) -> Arc<Self> {
            let host = Arc::new(Self {
                meta: Mutex::new(None),
            });
            host.show(entity);
            host
        }

        fn show(&self, entity: &str) {
            *self.meta.lock().unwrap() = Some(HostMetadata {
                entity_id: Some(entity.to_string()),
                project_id: Some("demo".to_string()),
                ..Default::default()
            });
        }

        fn clear(&self) {
            *self.meta.lock().unwrap() = None;
        }
    }

    impl HostView for FakeHost {
        fn active_metadata(&self) -> Option<HostMetadata> {
            self.meta.lock().unwrap().clone()
        }
    }

    fn tracker(host: Arc<FakeHost>) -> ViewerTracker {
        ViewerTracker::new(host, Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_arms_and_rearms() {
        let mut t = tracker(FakeHost::showing("v1"));
        let start = Instant::now();

        assert!(t.notify(HostNotification::ViewChanged, start).is_none());
        assert_eq!(t.deadline(), Some(start + Duration::from_millis(500)));

        let later = start + Duration::from_millis(300);
        t.notify(HostNotification::PlaybackPositionChanged, later);
        assert_eq!(t.deadline(), Some(later + Duration::from_millis(500)));
        assert_eq!(t.reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_emits_once_then_noop() {
        let mut t = tracker(FakeHost::showing("v1"));
        t.notify(HostNotification::SourceLoaded, Instant::now());

        assert_eq!(t.fire(), Some(ViewerContext::new("v1", "demo")));
        assert_eq!(t.state(), TrackerState::Idle);
        assert_eq!(t.fire(), None);
        assert_eq!(t.reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_metadata_is_noop() {
        let host = FakeHost::showing("v1");
        host.clear();
        let mut t = tracker(host.clone());
        assert_eq!(t.fire(), None);
        assert!(t.last_context().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_recheck_reemits_same_context() {
        let mut t = tracker(FakeHost::showing("v1"));
        assert!(t.fire().is_some());

        t.force_recheck(Instant::now());
        assert!(t.deadline().is_some());
        assert_eq!(t.fire(), Some(ViewerContext::new("v1", "demo")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_load_applies_directly() {
        let host = FakeHost::showing("v1");
        host.clear();
        let mut t = tracker(host);

        let ctx = ViewerContext::new("v9", "demo");
        assert_eq!(
            t.notify(HostNotification::InitialLoad(ctx.clone()), Instant::now()),
            Some(ctx.clone())
        );
        assert_eq!(t.reads(), 0);
        assert_eq!(t.state(), TrackerState::Idle);
        assert_eq!(t.notify(HostNotification::InitialLoad(ctx), Instant::now()), None);
    }
}
