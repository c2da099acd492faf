//! In-memory backend shared by the sync integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::broadcast;

use sightline_sync::{
    Activity, ActivityKind, ActivityPage, ActivityPayload, ActivityWriter, Attachment,
    AttachmentSource, Backends, Cursor, EntityKind, EntityResolver, Error, EventEnvelope,
    FeedSource, FeedTarget, FileRef, PageRequest, Result, StatusOption, Topic,
};

/// Activity `i` of `entity`: a checklist comment, every tenth one with a file.
pub fn activity(entity: &str, i: usize) -> Activity {
    let files = if i % 10 == 0 {
        vec![FileRef {
            id: format!("{}-file-{}", entity, i),
            filename: format!("frame{}.png", i),
        }]
    } else {
        vec![]
    };
    Activity {
        id: format!("{}-{}", entity, i),
        kind: ActivityKind::Comment,
        author_name: "ana".into(),
        created_at: Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap(),
        payload: ActivityPayload::Comment {
            body: format!("* [ ] review {}\n* [x] export", i),
            files,
        },
    }
}

/// Backend with a fixed per-entity history, paged newest-first by index cursor.
#[derive(Default)]
pub struct FakeBackend {
    pub history_len: HashMap<String, usize>,
    pub fetch_delay: Mutex<HashMap<String, Duration>>,
    pub failing_files: Mutex<HashSet<String>>,
    pub resolver_error: Mutex<Option<Error>>,
    pub writer_error: Mutex<Option<Error>>,
    pub file_delay: Duration,
    pub write_delay: Duration,
    pub page_fetches: AtomicUsize,
    pub in_flight_files: AtomicUsize,
    pub max_in_flight_files: AtomicUsize,
    pub writes: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn with_history(entries: &[(&str, usize)]) -> Self {
        Self {
            history_len: entries.iter().map(|(e, n)| (e.to_string(), *n)).collect(),
            ..Default::default()
        }
    }

    pub fn backends(self: &Arc<Self>) -> Backends {
        Backends {
            feed: self.clone(),
            files: self.clone(),
            writer: self.clone(),
            resolver: self.clone(),
        }
    }

    pub fn delay_entity(&self, entity: &str, delay: Duration) {
        self.fetch_delay
            .lock()
            .unwrap()
            .insert(entity.to_string(), delay);
    }

    pub fn fail_file(&self, file_id: &str) {
        self.failing_files
            .lock()
            .unwrap()
            .insert(file_id.to_string());
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for FakeBackend {
    async fn fetch_page(&self, request: &PageRequest) -> Result<ActivityPage> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        let entity = request.entity_ids.first().cloned().unwrap_or_default();

        let delay = self.fetch_delay.lock().unwrap().get(&entity).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let total = self
            .history_len
            .get(&entity)
            .copied()
            .ok_or_else(|| Error::NotFound(entity.clone()))?;
        let end = match &request.before {
            Some(cursor) => cursor
                .as_str()
                .parse::<usize>()
                .map_err(|e| Error::InvalidInput(e.to_string()))?,
            None => total,
        };
        let start = end.saturating_sub(request.page_size);

        // Newest first, like the backend's edge order.
        let activities = (start..end).rev().map(|i| activity(&entity, i)).collect();
        Ok(ActivityPage {
            activities,
            has_older: start > 0,
            oldest_cursor: Some(Cursor::new(start.to_string())),
            newest_cursor: Some(Cursor::new(end.to_string())),
        })
    }
}

#[async_trait]
impl AttachmentSource for FakeBackend {
    async fn fetch_file(&self, _project: &str, file: &FileRef) -> Result<Attachment> {
        let now = self.in_flight_files.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight_files.fetch_max(now, Ordering::SeqCst);

        if !self.file_delay.is_zero() {
            tokio::time::sleep(self.file_delay).await;
        }
        self.in_flight_files.fetch_sub(1, Ordering::SeqCst);

        if self.failing_files.lock().unwrap().contains(&file.id) {
            return Err(Error::Http {
                status: 500,
                message: "boom".into(),
            });
        }
        Ok(Attachment {
            file_id: file.id.clone(),
            filename: file.filename.clone(),
            mime_type: "image/png".into(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        })
    }
}

#[async_trait]
impl ActivityWriter for FakeBackend {
    async fn update_activity(&self, _project: &str, activity_id: &str, body: &str) -> Result<()> {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        if let Some(e) = self.writer_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.writes
            .lock()
            .unwrap()
            .push(format!("activity {} {}", activity_id, body));
        Ok(())
    }

    async fn update_status(&self, target: &FeedTarget, status: &str) -> Result<()> {
        if let Some(e) = self.writer_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.writes
            .lock()
            .unwrap()
            .push(format!("status {} {}", target.entity_id, status));
        Ok(())
    }

    async fn create_comment(&self, target: &FeedTarget, body: &str) -> Result<()> {
        if let Some(e) = self.writer_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.writes
            .lock()
            .unwrap()
            .push(format!("comment {} {}", target.entity_id, body));
        Ok(())
    }
}

#[async_trait]
impl EntityResolver for FakeBackend {
    async fn feed_entities(&self, target: &FeedTarget) -> Result<Vec<String>> {
        if let Some(e) = self.resolver_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(vec![target.entity_id.clone()])
    }

    async fn statuses(&self, _project: &str, _kind: EntityKind) -> Result<Vec<StatusOption>> {
        Ok(vec![StatusOption {
            value: "approved".into(),
            color: "#00ff00".into(),
        }])
    }
}

/// Receive tap events until one on `topic` arrives, returning everything seen.
pub async fn recv_until(
    rx: &mut broadcast::Receiver<EventEnvelope>,
    topic: Topic,
) -> Vec<EventEnvelope> {
    let mut seen = Vec::new();
    let wait = async {
        loop {
            let envelope = rx.recv().await.expect("bus closed");
            let done = envelope.topic == topic;
            seen.push(envelope);
            if done {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", topic));
    seen
}

/// Drain whatever is currently buffered on the tap.
pub fn drain(rx: &mut broadcast::Receiver<EventEnvelope>) -> Vec<EventEnvelope> {
    let mut seen = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        seen.push(envelope);
    }
    seen
}
