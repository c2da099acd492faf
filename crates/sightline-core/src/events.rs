//! Feed event types, envelope schema, and the event bus.
//!
//! Components never call each other directly; they publish [`FeedEvent`]s on
//! the [`EventBus`]. Handlers subscribe to a single [`Topic`] and are invoked
//! synchronously on the publishing thread, in subscription order.
//!
//! Every envelope is also mirrored to a `tokio::sync::broadcast` tap so async
//! consumers (the CLI printer, tests) can follow the stream without
//! registering a handler.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::filter::ActivityFilter;
use crate::models::{Activity, Attachment, FeedTarget, Generation, StatusOption, ViewerContext};

// ============================================================================
// Topics
// ============================================================================

/// Named channel on the bus. Topics are exact; there are no wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Topic {
    #[serde(rename = "viewer.changed")]
    ViewerChanged,
    #[serde(rename = "feed.loading")]
    FeedLoading,
    #[serde(rename = "feed.replaced")]
    FeedReplaced,
    #[serde(rename = "feed.older_prepended")]
    FeedOlderPrepended,
    #[serde(rename = "feed.failed")]
    FeedFailed,
    #[serde(rename = "attachment.ready")]
    AttachmentReady,
    #[serde(rename = "attachment.failed")]
    AttachmentFailed,
    #[serde(rename = "filter.changed")]
    FilterChanged,
    #[serde(rename = "checklist.updated")]
    ChecklistUpdated,
    #[serde(rename = "checklist.update_failed")]
    ChecklistUpdateFailed,
    #[serde(rename = "status.updated")]
    StatusUpdated,
    #[serde(rename = "status.update_failed")]
    StatusUpdateFailed,
    #[serde(rename = "comment.posted")]
    CommentPosted,
    #[serde(rename = "comment.failed")]
    CommentFailed,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ViewerChanged => "viewer.changed",
            Topic::FeedLoading => "feed.loading",
            Topic::FeedReplaced => "feed.replaced",
            Topic::FeedOlderPrepended => "feed.older_prepended",
            Topic::FeedFailed => "feed.failed",
            Topic::AttachmentReady => "attachment.ready",
            Topic::AttachmentFailed => "attachment.failed",
            Topic::FilterChanged => "filter.changed",
            Topic::ChecklistUpdated => "checklist.updated",
            Topic::ChecklistUpdateFailed => "checklist.update_failed",
            Topic::StatusUpdated => "status.updated",
            Topic::StatusUpdateFailed => "status.update_failed",
            Topic::CommentPosted => "comment.posted",
            Topic::CommentFailed => "comment.failed",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Feed Event (payloads)
// ============================================================================

/// Payload carried by an [`EventEnvelope`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum FeedEvent {
    /// The host is now displaying a different entity.
    ViewerChanged { context: ViewerContext },
    /// A new feed request was issued.
    FeedLoading {
        generation: Generation,
        target: FeedTarget,
    },
    /// The feed was replaced wholesale by a fresh first page.
    FeedReplaced {
        generation: Generation,
        target: FeedTarget,
        activities: Vec<Activity>,
        has_older: bool,
        statuses: Vec<StatusOption>,
    },
    /// Older activities were prepended; views should shift by `prepended`.
    OlderPrepended {
        generation: Generation,
        prepended: usize,
        activities: Vec<Activity>,
        has_older: bool,
    },
    /// The feed could not be loaded at all.
    FeedFailed {
        #[serde(skip_serializing_if = "Option::is_none")]
        generation: Option<Generation>,
        error: String,
        fatal: bool,
    },
    AttachmentReady {
        generation: Generation,
        activity_index: usize,
        activity_id: String,
        attachment: Attachment,
    },
    AttachmentFailed {
        generation: Generation,
        activity_index: usize,
        activity_id: String,
        file_id: String,
    },
    /// Active filter changed; `visible` holds feed indices that pass it.
    FilterChanged {
        filter: ActivityFilter,
        visible: Vec<usize>,
    },
    ChecklistUpdated {
        activity_id: String,
        item_index: usize,
        body: String,
    },
    ChecklistUpdateFailed {
        activity_id: String,
        item_index: usize,
        error: String,
    },
    StatusUpdated { target: FeedTarget, status: String },
    StatusUpdateFailed {
        target: FeedTarget,
        status: String,
        error: String,
    },
    CommentPosted { target: FeedTarget },
    CommentFailed { target: FeedTarget, error: String },
}

impl FeedEvent {
    /// Topic this payload belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            FeedEvent::ViewerChanged { .. } => Topic::ViewerChanged,
            FeedEvent::FeedLoading { .. } => Topic::FeedLoading,
            FeedEvent::FeedReplaced { .. } => Topic::FeedReplaced,
            FeedEvent::OlderPrepended { .. } => Topic::FeedOlderPrepended,
            FeedEvent::FeedFailed { .. } => Topic::FeedFailed,
            FeedEvent::AttachmentReady { .. } => Topic::AttachmentReady,
            FeedEvent::AttachmentFailed { .. } => Topic::AttachmentFailed,
            FeedEvent::FilterChanged { .. } => Topic::FilterChanged,
            FeedEvent::ChecklistUpdated { .. } => Topic::ChecklistUpdated,
            FeedEvent::ChecklistUpdateFailed { .. } => Topic::ChecklistUpdateFailed,
            FeedEvent::StatusUpdated { .. } => Topic::StatusUpdated,
            FeedEvent::StatusUpdateFailed { .. } => Topic::StatusUpdateFailed,
            FeedEvent::CommentPosted { .. } => Topic::CommentPosted,
            FeedEvent::CommentFailed { .. } => Topic::CommentFailed,
        }
    }
}

// ============================================================================
// Event Envelope
// ============================================================================

/// Self-describing wrapper around a [`FeedEvent`].
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    pub topic: Topic,
    /// Component that published the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub payload: FeedEvent,
}

impl EventEnvelope {
    pub fn new(topic: Topic, payload: FeedEvent, source_id: Option<&str>) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            topic,
            source_id: source_id.map(String::from),
            occurred_at: Utc::now(),
            payload,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Handler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    handler: Handler,
}

/// Topic-based publish/subscribe bus.
///
/// The subscription list is only locked while it is read or edited; handlers
/// run without the lock held, so a handler may itself publish or (un)subscribe.
/// A panicking handler is logged and skipped; the remaining handlers still run.
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    tap: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus whose broadcast tap buffers `capacity` envelopes.
    pub fn new(capacity: usize) -> Self {
        let (tap, _) = broadcast::channel(capacity.max(1));
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            tap,
        }
    }

    /// Register `handler` for `topic`.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.push(Subscription {
            id,
            topic,
            handler: Arc::new(handler),
        });
        tracing::debug!(topic = %topic, subscription = %id, "EventBus subscribe");
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Deliver `payload` to every handler of `topic`, then mirror it to the tap.
    pub fn publish(&self, topic: Topic, payload: FeedEvent, source_id: Option<&str>) {
        if payload.topic() != topic {
            tracing::warn!(
                topic = %topic,
                payload_topic = %payload.topic(),
                "EventBus publish with mismatched payload"
            );
        }
        let envelope = EventEnvelope::new(topic, payload, source_id);

        let handlers: Vec<(SubscriptionId, Handler)> = {
            let subs = self
                .subscriptions
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subs.iter()
                .filter(|s| s.topic == topic)
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect()
        };

        tracing::trace!(
            topic = %topic,
            event_id = %envelope.event_id,
            handler_count = handlers.len(),
            "EventBus publish"
        );

        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&envelope))).is_err() {
                tracing::error!(
                    topic = %topic,
                    subscription = %id,
                    event_id = %envelope.event_id,
                    "Event handler panicked"
                );
            }
        }

        let _ = self.tap.send(envelope);
    }

    /// Publish `event` on its own topic.
    pub fn emit(&self, event: FeedEvent, source_id: Option<&str>) {
        self.publish(event.topic(), event, source_id);
    }

    /// Receive every envelope published from now on, across all topics.
    pub fn tap(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tap.subscribe()
    }

    /// Number of handlers registered for `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn viewer_event(entity: &str) -> FeedEvent {
        FeedEvent::ViewerChanged {
            context: ViewerContext::new(entity, "proj"),
        }
    }

    #[test]
    fn test_topic_strings_match_serde() {
        let json = serde_json::to_string(&Topic::FeedOlderPrepended).unwrap();
        assert_eq!(json, "\"feed.older_prepended\"");
        assert_eq!(Topic::ChecklistUpdateFailed.as_str(), "checklist.update_failed");
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new(8);
        let calls = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let calls = Arc::clone(&calls);
            bus.subscribe(Topic::ViewerChanged, move |_| calls.lock().unwrap().push(n));
        }

        bus.emit(viewer_event("v1"), None);
        assert_eq!(*calls.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_topics_are_exact() {
        let bus = EventBus::new(8);
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe(Topic::FeedFailed, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(viewer_event("v1"), None);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new(8);
        let hits = Arc::new(AtomicU64::new(0));

        bus.subscribe(Topic::ViewerChanged, |_| panic!("handler bug"));
        let h = Arc::clone(&hits);
        bus.subscribe(Topic::ViewerChanged, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(viewer_event("v1"), None);
        bus.emit(viewer_event("v2"), None);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new(8);
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        let id = bus.subscribe(Topic::ViewerChanged, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.subscriber_count(Topic::ViewerChanged), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(viewer_event("v1"), None);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_may_publish_reentrantly() {
        let bus = Arc::new(EventBus::new(8));
        let hits = Arc::new(AtomicU64::new(0));

        let inner = Arc::clone(&bus);
        bus.subscribe(Topic::ViewerChanged, move |_| {
            inner.emit(
                FeedEvent::CommentPosted {
                    target: FeedTarget::version("p", "v"),
                },
                Some("test"),
            );
        });
        let h = Arc::clone(&hits);
        bus.subscribe(Topic::CommentPosted, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(viewer_event("v1"), None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tap_mirrors_envelopes() {
        let bus = EventBus::new(8);
        let mut rx = bus.tap();

        bus.emit(viewer_event("v7"), Some("tracker"));

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.topic, Topic::ViewerChanged);
        assert_eq!(envelope.source_id.as_deref(), Some("tracker"));
        assert_eq!(envelope.event_id.get_version_num(), 7);
    }

    #[test]
    fn test_publish_without_tap_receivers_is_fine() {
        let bus = EventBus::default();
        bus.emit(viewer_event("v1"), None);
    }

    #[test]
    fn test_envelope_serializes_topic_and_payload() {
        let env = EventEnvelope::new(Topic::ViewerChanged, viewer_event("v3"), None);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["topic"], "viewer.changed");
        assert_eq!(json["payload"]["type"], "ViewerChanged");
        assert_eq!(json["payload"]["context"]["entity_id"], "v3");
        assert!(json.get("source_id").is_none());
    }
}
