//! Component-level scenarios: paging, generation gating, attachment batches
//! and debounce coalescing.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::FakeBackend;
use sightline_sync::{
    AttachmentDelivery, AttachmentLoader, AttachmentRef, Coordinator, FeedMessage, FeedQuery,
    FeedTarget, Generation, HostMetadata, HostNotification, HostView, Pager, ViewerContext,
    ViewerTracker,
};
use tokio::sync::mpsc;

// ============================================================================
// PAGER
// ============================================================================

#[tokio::test]
async fn test_fifty_then_fifty_more() {
    let fake = FakeBackend::with_history(&[("v1", 100)]);
    let mut pager = Pager::new();

    let first = pager
        .load_initial(&fake, FeedQuery::new("demo", vec!["v1".into()], 50))
        .await
        .unwrap();
    assert_eq!(first.len(), 50);
    assert!(pager.has_older());

    let outcome = pager.load_older(&fake).await.unwrap();
    assert_eq!(outcome.prepended, 50);
    assert!(!outcome.has_older);
    assert!(!outcome.resorted);

    let ids: HashSet<_> = pager.activities().iter().map(|a| a.id.clone()).collect();
    assert_eq!(ids.len(), 100);
    assert!(pager
        .activities()
        .windows(2)
        .all(|w| w[0].created_at <= w[1].created_at));

    // Exhausted: a further call fetches nothing.
    let before = fake.page_fetches.load(Ordering::SeqCst);
    let outcome = pager.load_older(&fake).await.unwrap();
    assert_eq!(outcome.prepended, 0);
    assert_eq!(fake.page_fetches.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn test_uneven_pages_stay_unique_and_ordered() {
    let fake = FakeBackend::with_history(&[("v1", 23)]);
    let mut pager = Pager::new();
    pager
        .load_initial(&fake, FeedQuery::new("demo", vec!["v1".into()], 7))
        .await
        .unwrap();

    let mut total_prepended = 0;
    while pager.has_older() {
        total_prepended += pager.load_older(&fake).await.unwrap().prepended;
    }
    assert_eq!(total_prepended, 16);
    assert_eq!(pager.len(), 23);
    assert_eq!(pager.activity(0).unwrap().id, "v1-0");
    assert_eq!(pager.activity(22).unwrap().id, "v1-22");
}

#[tokio::test]
async fn test_load_initial_replaces_previous_feed() {
    let fake = FakeBackend::with_history(&[("v1", 10), ("v2", 4)]);
    let mut pager = Pager::new();
    pager
        .load_initial(&fake, FeedQuery::new("demo", vec!["v1".into()], 50))
        .await
        .unwrap();
    pager
        .load_initial(&fake, FeedQuery::new("demo", vec!["v2".into()], 50))
        .await
        .unwrap();
    assert_eq!(pager.len(), 4);
    assert!(pager.activities().iter().all(|a| a.id.starts_with("v2-")));
}

// ============================================================================
// COORDINATOR
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_generation_three_superseded_by_four() {
    let fake = Arc::new(FakeBackend::with_history(&[("slow", 5), ("fast", 5)]));
    fake.delay_entity("slow", Duration::from_millis(300));
    let (tx, mut rx) = mpsc::channel(16);
    let mut coordinator = Coordinator::new(fake.backends(), 50, tx);

    let _ = coordinator.request_feed(FeedTarget::version("demo", "warmup"));
    let _ = coordinator.request_feed(FeedTarget::version("demo", "warmup"));
    let (g3, _) = coordinator.request_feed(FeedTarget::version("demo", "slow"));
    let (g4, _) = coordinator.request_feed(FeedTarget::version("demo", "fast"));
    assert_eq!(g3, Generation::new(3));
    assert_eq!(g4, Generation::new(4));
    assert_eq!(coordinator.current(), g4);

    let mut applied = Vec::new();
    for _ in 0..4 {
        let Some(FeedMessage::FeedLoaded {
            generation, target, ..
        }) = rx.recv().await
        else {
            panic!("expected feed result");
        };
        if coordinator.accept(generation).is_ok() {
            applied.push(target.entity_id);
        }
    }
    assert_eq!(applied, vec!["fast".to_string()]);

    let stale = coordinator.accept(g3).unwrap_err();
    assert!(!stale.is_user_visible());
}

// ============================================================================
// ATTACHMENT LOADER
// ============================================================================

fn refs(n: usize) -> Vec<AttachmentRef> {
    (0..n)
        .map(|i| AttachmentRef {
            activity_index: i,
            activity_id: format!("a{}", i),
            file_id: format!("f{}", i),
            filename: format!("f{}.png", i),
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_batch_of_five_with_one_failure() {
    let fake = Arc::new(FakeBackend {
        file_delay: Duration::from_millis(50),
        ..Default::default()
    });
    fake.fail_file("f2");
    let loader = AttachmentLoader::new(fake.clone(), 5);
    let (tx, mut rx) = mpsc::channel::<AttachmentDelivery>(16);

    loader
        .spawn_batch("demo".into(), Generation::new(7), refs(5), tx)
        .await
        .unwrap();

    let mut delivered = Vec::new();
    while let Some(d) = rx.recv().await {
        assert_eq!(d.generation, Generation::new(7));
        assert_eq!(d.activity_id, format!("a{}", d.activity_index));
        delivered.push((d.activity_index, d.attachment.is_some()));
    }
    delivered.sort();
    assert_eq!(
        delivered,
        vec![(0, true), (1, true), (2, false), (3, true), (4, true)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_worker_cap_bounds_concurrency() {
    let fake = Arc::new(FakeBackend {
        file_delay: Duration::from_millis(100),
        ..Default::default()
    });
    let loader = AttachmentLoader::new(fake.clone(), 2);

    let results = loader.load_batch("demo", &refs(6)).await;
    assert_eq!(results.len(), 6);
    assert!(results.values().all(Option::is_some));
    assert_eq!(fake.max_in_flight_files.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_worker_cap_spans_overlapping_batches() {
    let fake = Arc::new(FakeBackend {
        file_delay: Duration::from_millis(100),
        ..Default::default()
    });
    let loader = AttachmentLoader::new(fake.clone(), 5);
    let (tx, mut rx) = mpsc::channel::<AttachmentDelivery>(64);

    let batches: Vec<_> = (1..=3)
        .map(|g| {
            loader
                .clone()
                .spawn_batch("demo".into(), Generation::new(g), refs(5), tx.clone())
        })
        .collect();
    drop(tx);
    for batch in batches {
        batch.await.unwrap();
    }

    let mut delivered = 0;
    while let Some(d) = rx.recv().await {
        assert!(d.attachment.is_some());
        delivered += 1;
    }
    assert_eq!(delivered, 15);
    assert_eq!(fake.max_in_flight_files.load(Ordering::SeqCst), 5);
}

// ============================================================================
// VIEWER TRACKER
// ============================================================================

struct CountingHost {
    reads: AtomicU64,
}

impl HostView for CountingHost {
    fn active_metadata(&self) -> Option<HostMetadata> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Some(HostMetadata {
            entity_id: Some("v1".into()),
            project_id: Some("demo".into()),
            ..Default::default()
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_burst_coalesces_into_one_read() {
    let host = Arc::new(CountingHost {
        reads: AtomicU64::new(0),
    });
    let (tx, mut rx) = mpsc::channel::<ViewerContext>(8);
    let tracker = ViewerTracker::new(host.clone(), Duration::from_millis(500)).spawn(tx);

    for n in [
        HostNotification::ViewChanged,
        HostNotification::SourceLoaded,
        HostNotification::PlaybackPositionChanged,
        HostNotification::PlaybackPositionChanged,
        HostNotification::ViewChanged,
    ] {
        assert!(tracker.notify(n));
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert_eq!(host.reads.load(Ordering::SeqCst), 0);

    let context = rx.recv().await.unwrap();
    assert_eq!(context, ViewerContext::new("v1", "demo"));
    assert_eq!(host.reads.load(Ordering::SeqCst), 1);

    // Unchanged context: the host is read again but nothing is emitted.
    tracker.notify(HostNotification::ViewChanged);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(host.reads.load(Ordering::SeqCst), 2);
    assert!(rx.try_recv().is_err());

    // A forced recheck re-emits the same context.
    tracker.notify(HostNotification::ForceRecheck);
    assert_eq!(rx.recv().await.unwrap(), context);

    tracker.shutdown().await;
}
