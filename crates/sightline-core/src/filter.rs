//! Client-side feed filters.
//!
//! Filters only select from the activities already fetched; changing the
//! active filter never triggers a refetch.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::{Activity, ActivityKind};

/// View filter over the fetched feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityFilter {
    #[default]
    All,
    /// Comments that are not checklists.
    Comments,
    /// Publish events.
    Published,
    /// Comments containing at least one task item.
    Checklists,
}

impl ActivityFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Comments => "comments",
            Self::Published => "published",
            Self::Checklists => "checklists",
        }
    }

    /// Whether `activity` is visible under this filter.
    pub fn matches(&self, activity: &Activity) -> bool {
        match self {
            Self::All => true,
            Self::Comments => activity.kind == ActivityKind::Comment && !activity.is_checklist(),
            Self::Published => activity.kind == ActivityKind::Publish,
            Self::Checklists => activity.is_checklist(),
        }
    }

    /// Visible activities paired with their index in the full feed.
    ///
    /// Indices refer to `activities`, not to the filtered view, so attachment
    /// bookkeeping keyed by feed position stays valid under any filter.
    pub fn apply<'a>(&self, activities: &'a [Activity]) -> Vec<(usize, &'a Activity)> {
        activities
            .iter()
            .enumerate()
            .filter(|(_, a)| self.matches(a))
            .collect()
    }
}

impl std::fmt::Display for ActivityFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "comments" => Ok(Self::Comments),
            "published" => Ok(Self::Published),
            "checklists" => Ok(Self::Checklists),
            _ => Err(Error::InvalidInput(format!("Unknown filter: {}", s))),
        }
    }
}
