//! Core data models for sightline.
//!
//! These types are shared across all sightline crates and represent the
//! activity feed domain: activities, pages, cursors, and the identities the
//! engine tracks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::Error;

// =============================================================================
// ACTIVITY TYPES
// =============================================================================

/// Kind of a feed activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Comment,
    StatusChange,
    Publish,
}

impl ActivityKind {
    /// All kinds, in the order the feed requests them.
    pub const ALL: [ActivityKind; 3] = [
        ActivityKind::Comment,
        ActivityKind::StatusChange,
        ActivityKind::Publish,
    ];

    /// Name used by the backend's `activityType` field.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::StatusChange => "status.change",
            Self::Publish => "version.publish",
        }
    }

    /// Parse a backend `activityType` value.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "comment" => Some(Self::Comment),
            "status.change" => Some(Self::StatusChange),
            "version.publish" => Some(Self::Publish),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A file attached to a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    #[serde(default)]
    pub filename: String,
}

/// Entity a status change originated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Entity type, e.g. `"task"` or `"version"`.
    pub kind: String,
    pub name: String,
    pub label: Option<String>,
}

impl Origin {
    /// Task origins render as task status changes.
    pub fn is_task(&self) -> bool {
        self.kind == "task"
    }

    /// Label if present, otherwise the name.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// Kind-specific content of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityPayload {
    Comment {
        body: String,
        files: Vec<FileRef>,
    },
    StatusChange {
        old_status: String,
        new_status: String,
        origin: Option<Origin>,
        /// Product the changed version belongs to, when the backend reports it.
        product_name: Option<String>,
    },
    Publish {
        product_name: Option<String>,
        version_name: Option<String>,
    },
}

/// One entry of the remote activity log.
///
/// Identity is `id`. Activities are immutable once fetched; edits arrive as a
/// fresh representation through a refetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub kind: ActivityKind,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub payload: ActivityPayload,
}

impl Activity {
    /// Comment body, if this is a comment.
    pub fn body(&self) -> Option<&str> {
        match &self.payload {
            ActivityPayload::Comment { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Attached files (empty for non-comments).
    pub fn files(&self) -> &[FileRef] {
        match &self.payload {
            ActivityPayload::Comment { files, .. } => files,
            _ => &[],
        }
    }

    /// Whether this is a comment whose body contains a task list.
    pub fn is_checklist(&self) -> bool {
        self.body().is_some_and(crate::checklist::is_checklist)
    }
}

// =============================================================================
// PAGINATION
// =============================================================================

/// Opaque pagination token issued by the backend.
///
/// Never parsed; only threaded back into subsequent "before" requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A page of activities plus its cursors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPage {
    /// Activities in ascending `created_at` order once normalized.
    pub activities: Vec<Activity>,
    pub has_older: bool,
    pub oldest_cursor: Option<Cursor>,
    pub newest_cursor: Option<Cursor>,
}

impl ActivityPage {
    /// Empty page with no older history.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Sort ascending by time and drop repeated ids, keeping the first occurrence.
    ///
    /// The sort is stable, so activities sharing a timestamp keep the order
    /// the backend returned them in.
    pub fn normalize(mut self) -> Self {
        let mut seen = HashSet::with_capacity(self.activities.len());
        self.activities.retain(|a| seen.insert(a.id.clone()));
        self.activities.sort_by_key(|a| a.created_at);
        self
    }
}

/// Monotonic tag identifying one feed request and its follow-up work.
///
/// Only results carrying the current generation are ever applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The generation that supersedes this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters of one page request against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub project: String,
    pub entity_ids: Vec<String>,
    pub kinds: Vec<ActivityKind>,
    pub page_size: usize,
    /// Fetch the page immediately older than this cursor.
    pub before: Option<Cursor>,
}

// =============================================================================
// ENTITIES AND VIEWER CONTEXT
// =============================================================================

/// Type of entity a feed is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Version,
    Task,
}

impl EntityKind {
    /// Plural REST path segment.
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Version => "versions",
            Self::Task => "tasks",
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "version" => Ok(Self::Version),
            "task" => Ok(Self::Task),
            _ => Err(Error::InvalidInput(format!("Invalid entity kind: {}", s))),
        }
    }
}

/// Entity whose feed should be displayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedTarget {
    pub project: String,
    pub entity_id: String,
    pub kind: EntityKind,
}

impl FeedTarget {
    pub fn version(project: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            entity_id: entity_id.into(),
            kind: EntityKind::Version,
        }
    }

    pub fn task(project: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            entity_id: entity_id.into(),
            kind: EntityKind::Task,
        }
    }
}

/// Identity the host application is believed to display.
///
/// Compared by value; consumers receive clones, never a live reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewerContext {
    pub entity_id: String,
    pub project_id: String,
}

impl ViewerContext {
    pub fn new(entity_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            project_id: project_id.into(),
        }
    }

    /// Host-synchronized feeds are always anchored to a version.
    pub fn target(&self) -> FeedTarget {
        FeedTarget::version(&self.project_id, &self.entity_id)
    }
}

/// Metadata bag the host attaches to whatever it currently considers active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetadata {
    pub entity_id: Option<String>,
    pub project_id: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl HostMetadata {
    /// The viewer context, if both identity fields are present and non-empty.
    pub fn context(&self) -> Option<ViewerContext> {
        let entity_id = self.entity_id.as_deref().filter(|s| !s.is_empty())?;
        let project_id = self.project_id.as_deref().filter(|s| !s.is_empty())?;
        Some(ViewerContext::new(entity_id, project_id))
    }
}

// =============================================================================
// ATTACHMENTS
// =============================================================================

/// A pending attachment, addressed by its activity's position in the current
/// rendering.
///
/// Only valid within the generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub activity_index: usize,
    /// Used to re-resolve the position if older pages were prepended meanwhile.
    pub activity_id: String,
    pub file_id: String,
    pub filename: String,
}

impl AttachmentRef {
    /// All attachment refs of `activities`, indexed by position.
    pub fn collect(activities: &[Activity], offset: usize) -> Vec<AttachmentRef> {
        activities
            .iter()
            .enumerate()
            .flat_map(|(idx, activity)| {
                activity.files().iter().map(move |file| AttachmentRef {
                    activity_index: idx + offset,
                    activity_id: activity.id.clone(),
                    file_id: file.id.clone(),
                    filename: file.filename.clone(),
                })
            })
            .collect()
    }
}

/// A downloaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub file_id: String,
    pub filename: String,
    pub mime_type: String,
    #[serde(serialize_with = "crate::media::serialize_base64")]
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Base64 `data:` URI for presentation layers that need text-safe embedding.
    pub fn to_data_uri(&self) -> String {
        crate::media::data_uri(&self.mime_type, &self.bytes)
    }
}

// =============================================================================
// STATUSES
// =============================================================================

/// An entry of the project's status catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOption {
    pub value: String,
    pub color: String,
}

/// Lookup colour for a status name, falling back to the default colour.
pub fn status_color<'a>(statuses: &'a [StatusOption], value: &str) -> &'a str {
    statuses
        .iter()
        .find(|s| s.value == value)
        .map(|s| s.color.as_str())
        .unwrap_or(crate::defaults::STATUS_FALLBACK_COLOR)
}
