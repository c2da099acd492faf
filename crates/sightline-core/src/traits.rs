//! Core traits for sightline's backend and host seams.
//!
//! The HTTP implementations live in `sightline-client`; tests and embedders
//! substitute their own.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// BACKEND TRAITS
// =============================================================================

/// Source of activity pages.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch one page.
    ///
    /// With `request.before` unset this is the newest page; otherwise the page
    /// immediately older than that cursor. Returned pages need not be sorted.
    async fn fetch_page(&self, request: &PageRequest) -> Result<ActivityPage>;
}

/// Source of attachment bytes.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    /// Download one attached file. An empty body is an error.
    async fn fetch_file(&self, project: &str, file: &FileRef) -> Result<Attachment>;
}

/// Mutations against the activity log and entity statuses.
#[async_trait]
pub trait ActivityWriter: Send + Sync {
    /// Replace the body of an existing activity.
    async fn update_activity(&self, project: &str, activity_id: &str, body: &str) -> Result<()>;

    /// Set the status of a version or task.
    async fn update_status(&self, target: &FeedTarget, status: &str) -> Result<()>;

    /// Post a new comment on a version or task.
    async fn create_comment(&self, target: &FeedTarget, body: &str) -> Result<()>;
}

/// Resolves what a feed covers and the project's status catalogue.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Entity ids whose activities make up the feed of `target`.
    ///
    /// A version's feed also includes its task, when it has one.
    async fn feed_entities(&self, target: &FeedTarget) -> Result<Vec<String>>;

    /// Statuses of `project` that apply to entities of `kind`.
    async fn statuses(&self, project: &str, kind: EntityKind) -> Result<Vec<StatusOption>>;
}

// =============================================================================
// HOST
// =============================================================================

/// Change notification from the host application.
///
/// Except for `InitialLoad`, payloads are never trusted: a notification only
/// means "something may have changed", and the tracker reads the host's
/// metadata itself once things settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostNotification {
    ViewChanged,
    SourceLoaded,
    PlaybackPositionChanged,
    /// The host announced what it opened with a complete context.
    InitialLoad(ViewerContext),
    /// Forget the cached context so the next read always emits.
    ForceRecheck,
}

/// Read access to the host's notion of what is on screen.
pub trait HostView: Send + Sync {
    /// Metadata bag of the active item, or `None` when nothing is active.
    fn active_metadata(&self) -> Option<HostMetadata>;
}

impl<F> HostView for F
where
    F: Fn() -> Option<HostMetadata> + Send + Sync,
{
    fn active_metadata(&self) -> Option<HostMetadata> {
        self()
    }
}
