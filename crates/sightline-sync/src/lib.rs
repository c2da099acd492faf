//! # sightline-sync
//!
//! Keeps an activity feed in step with whatever the host application is
//! showing.
//!
//! This crate provides:
//! - [`Pager`]: deduplicated, time-ordered activity cache with backward paging
//! - [`AttachmentLoader`]: bounded concurrent attachment downloads
//! - [`Coordinator`]: generation-gated background fetches and writes
//! - [`ViewerTracker`]: debounced host watcher
//! - [`FeedEngine`]: the task that owns feed state and publishes bus events
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sightline_client::HttpBackend;
//! use sightline_sync::{Backends, EngineCommand, EngineConfig, EventBus, FeedEngine, FeedTarget};
//!
//! let backend = HttpBackend::from_env()?;
//!
//! let bus = Arc::new(EventBus::default());
//! let mut events = bus.tap();
//!
//! let (engine, handle) = FeedEngine::new(
//!     EngineConfig::from_env(),
//!     Backends::from_backend(backend),
//!     bus.clone(),
//! );
//! tokio::spawn(engine.run());
//!
//! handle.send(EngineCommand::Select(FeedTarget::version("demo", "v1"))).await?;
//! while let Ok(envelope) = events.recv().await {
//!     println!("{}: {:?}", envelope.topic, envelope.payload);
//! }
//! ```

pub mod attachments;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod pager;
pub mod tracker;

// Re-export core types
pub use sightline_core::*;

pub use attachments::{AttachmentDelivery, AttachmentLoader};
pub use config::EngineConfig;
pub use coordinator::{Backends, Coordinator, FeedMessage, LoadedFeed, WriteOp};
pub use engine::{EngineCommand, EngineHandle, FeedEngine};
pub use pager::{FeedQuery, Pager, PrependOutcome};
pub use tracker::{TrackerHandle, TrackerState, ViewerTracker};
