//! Inline reference tags in comment bodies.
//!
//! Comments link to users and entities with markdown-style tags of the form
//! `[label](kind:id)`. Known kinds are `user`, `version` and `task`; any other
//! kind degrades to a styled text segment so raw markup never reaches the
//! presentation layer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^:)]+):([^)]+)\)").expect("valid tag regex"));

static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").expect("valid mention regex"));

// =============================================================================
// TYPES
// =============================================================================

/// Entity kinds a tag can link to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    User,
    Version,
    Task,
}

impl ReferenceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "version" => Some(Self::Version),
            "task" => Some(Self::Task),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Version => "version",
            Self::Task => "task",
        }
    }
}

/// A resolved reference tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub label: String,
    pub id: String,
}

impl Reference {
    /// Text shown for the reference; users render as `@label`.
    pub fn display(&self) -> String {
        match self.kind {
            ReferenceKind::User => format!("@{}", self.label),
            _ => self.label.clone(),
        }
    }
}

/// A piece of a parsed comment body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    Reference(Reference),
    /// Tag with an unrecognized kind, shown as its label only.
    Styled { label: String },
}

// =============================================================================
// PARSING
// =============================================================================

/// Split `body` into text, reference and styled segments.
pub fn parse_segments(body: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in TAG_RE.captures_iter(body) {
        let (Some(whole), Some(label), Some(kind), Some(id)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        if whole.start() > last {
            segments.push(Segment::Text {
                text: body[last..whole.start()].to_string(),
            });
        }
        let segment = match ReferenceKind::parse(kind.as_str()) {
            Some(kind) => Segment::Reference(Reference {
                kind,
                label: label.as_str().to_string(),
                id: id.as_str().to_string(),
            }),
            None => Segment::Styled {
                label: label.as_str().to_string(),
            },
        };
        segments.push(segment);
        last = whole.end();
    }

    if last < body.len() {
        segments.push(Segment::Text {
            text: body[last..].to_string(),
        });
    }
    segments
}

/// Known references in `body`, in order of appearance.
pub fn extract_references(body: &str) -> Vec<Reference> {
    parse_segments(body)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Reference(r) => Some(r),
            _ => None,
        })
        .collect()
}

/// Body with every tag replaced by its display text.
pub fn plain_text(body: &str) -> String {
    parse_segments(body)
        .into_iter()
        .map(|s| match s {
            Segment::Text { text } => text,
            Segment::Reference(r) => r.display(),
            Segment::Styled { label } => label,
        })
        .collect()
}

// =============================================================================
// COMPOSITION
// =============================================================================

/// Named entity to tag in a new comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagTarget {
    pub name: String,
    pub id: String,
}

impl TagTarget {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// Rewrite `@name` mentions as user tags.
pub fn expand_mentions(message: &str) -> String {
    MENTION_RE
        .replace_all(message, "[$1](user:$1)")
        .into_owned()
}

/// Build a comment body that links the version, task and author on its first
/// line, followed by `message`.
///
/// Without any tag the message is returned as-is.
pub fn compose_comment(
    message: &str,
    version: Option<&TagTarget>,
    task: Option<&TagTarget>,
    user: Option<&str>,
) -> String {
    let mut tags = Vec::new();
    if let Some(v) = version.filter(|v| !v.name.is_empty() && !v.id.is_empty()) {
        tags.push(format!("[{}](version:{})", v.name, v.id));
    }
    if let Some(t) = task.filter(|t| !t.name.is_empty() && !t.id.is_empty()) {
        tags.push(format!("[{}](task:{})", t.name, t.id));
    }
    if let Some(u) = user.filter(|u| !u.is_empty()) {
        tags.push(format!("[{}](user:{})", u, u));
    }

    if tags.is_empty() {
        message.to_string()
    } else {
        format!("{}\n{}", tags.join(" "), message)
    }
}
