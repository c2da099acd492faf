//! # sightline-core
//!
//! Core types, traits, and the event bus for the sightline activity feed.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the client and sync crates depend on.
//!
//! ## Logging
//!
//! All crates log through `tracing` with a shared set of structured fields:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `generation` | feed generation the work belongs to |
//! | `entity_id` | version or task id |
//! | `project` | project name |
//! | `file_id` | attachment id |
//! | `activity_count` | activities in a page or feed |
//! | `prepended` | activities added by an older-page load |
//! | `duration_ms` | elapsed wall time |
//! | `attempt` | 1-based request attempt |
//! | `status` | HTTP status code |
//! | `error` | error display string |
//!
//! Levels: ERROR for degraded operation, WARN for recoverable failures, INFO
//! for lifecycle, DEBUG for decisions (stale drops, no-op rechecks), TRACE for
//! per-item detail.

pub mod checklist;
pub mod defaults;
pub mod error;
pub mod events;
pub mod filter;
pub mod media;
pub mod models;
pub mod tags;
pub mod temporal;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, FeedEvent, SubscriptionId, Topic};
pub use filter::ActivityFilter;
pub use media::detect_mime;
pub use models::*;
pub use tags::{compose_comment, Reference, ReferenceKind, Segment, TagTarget};
pub use temporal::format_relative;
pub use traits::*;
