//! Activity cache and backward pagination.
//!
//! The [`Pager`] owns the activities fetched for the current feed. A fresh
//! first page replaces everything; older pages are deduplicated against what
//! is already held and prepended. The caller learns how many items were
//! prepended so it can keep the reader's scroll position and shift any state
//! keyed by feed index.

use std::collections::HashSet;

use tracing::{debug, warn};

use sightline_core::{
    checklist, Activity, ActivityFilter, ActivityKind, ActivityPage, ActivityPayload, Cursor,
    FeedSource, PageRequest, Result,
};

/// What a feed is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub project: String,
    pub entity_ids: Vec<String>,
    pub kinds: Vec<ActivityKind>,
    pub page_size: usize,
}

impl FeedQuery {
    pub fn new(project: impl Into<String>, entity_ids: Vec<String>, page_size: usize) -> Self {
        Self {
            project: project.into(),
            entity_ids,
            kinds: ActivityKind::ALL.to_vec(),
            page_size,
        }
    }

    /// Page request, optionally before `cursor`.
    pub fn page(&self, before: Option<Cursor>) -> PageRequest {
        PageRequest {
            project: self.project.clone(),
            entity_ids: self.entity_ids.clone(),
            kinds: self.kinds.clone(),
            page_size: self.page_size,
            before,
        }
    }
}

/// Result of applying an older page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrependOutcome {
    /// Number of previously unseen activities added at the front.
    pub prepended: usize,
    pub has_older: bool,
    pub oldest_cursor: Option<Cursor>,
    /// The page overlapped the held activities in time and the whole feed had
    /// to be re-sorted, so existing indices moved by more than `prepended`.
    pub resorted: bool,
    /// Ids of the activities that were added.
    pub added_ids: Vec<String>,
}

/// Fetched activities for one feed.
#[derive(Debug, Default)]
pub struct Pager {
    query: Option<FeedQuery>,
    activities: Vec<Activity>,
    seen: HashSet<String>,
    has_older: bool,
    oldest_cursor: Option<Cursor>,
    loading_older: bool,
}

impl Pager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> Option<&FeedQuery> {
        self.query.as_ref()
    }

    /// Activities in ascending time order.
    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn activity(&self, index: usize) -> Option<&Activity> {
        self.activities.get(index)
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn has_older(&self) -> bool {
        self.has_older
    }

    pub fn oldest_cursor(&self) -> Option<&Cursor> {
        self.oldest_cursor.as_ref()
    }

    pub fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    /// Current index of the activity with `id`.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.activities.iter().position(|a| a.id == id)
    }

    /// Visible activities under `filter`, paired with their feed index.
    pub fn visible(&self, filter: ActivityFilter) -> Vec<(usize, &Activity)> {
        filter.apply(&self.activities)
    }

    /// Drop everything, e.g. when a new feed is requested.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Replace the whole state with a fresh first page.
    pub fn replace(&mut self, query: FeedQuery, page: ActivityPage) {
        let page = page.normalize();
        self.seen = page.activities.iter().map(|a| a.id.clone()).collect();
        self.activities = page.activities;
        self.has_older = page.has_older;
        self.oldest_cursor = page.oldest_cursor;
        self.loading_older = false;
        self.query = Some(query);
        debug!(
            activity_count = self.activities.len(),
            has_older = self.has_older,
            "Feed replaced"
        );
    }

    /// Claim the older-page slot.
    ///
    /// Returns `None` when there is nothing older, no cursor, or a load is
    /// already in flight.
    pub fn begin_older(&mut self) -> Option<PageRequest> {
        if !self.has_older || self.loading_older {
            return None;
        }
        let query = self.query.as_ref()?;
        let cursor = self.oldest_cursor.clone()?;
        self.loading_older = true;
        Some(query.page(Some(cursor)))
    }

    /// Release the older-page slot after a failed load.
    pub fn fail_older(&mut self) {
        self.loading_older = false;
    }

    /// Merge an older page: drop seen ids, prepend survivors.
    pub fn apply_older(&mut self, page: ActivityPage) -> PrependOutcome {
        self.loading_older = false;
        let page = page.normalize();

        let fresh: Vec<Activity> = page
            .activities
            .into_iter()
            .filter(|a| !self.seen.contains(&a.id))
            .collect();
        let prepended = fresh.len();
        let added_ids: Vec<String> = fresh.iter().map(|a| a.id.clone()).collect();
        self.seen.extend(added_ids.iter().cloned());

        let overlaps = match (fresh.last(), self.activities.first()) {
            (Some(newest_fresh), Some(oldest_held)) => {
                newest_fresh.created_at > oldest_held.created_at
            }
            _ => false,
        };

        let mut merged = fresh;
        merged.append(&mut self.activities);
        if overlaps {
            warn!(
                prepended,
                "Older page overlaps held activities, re-sorting feed"
            );
            merged.sort_by_key(|a| a.created_at);
        }
        self.activities = merged;

        self.has_older = page.has_older;
        if page.oldest_cursor.is_some() {
            self.oldest_cursor = page.oldest_cursor;
        }
        debug!(
            prepended,
            activity_count = self.activities.len(),
            has_older = self.has_older,
            "Older page applied"
        );
        PrependOutcome {
            prepended,
            has_older: self.has_older,
            oldest_cursor: self.oldest_cursor.clone(),
            resorted: overlaps,
            added_ids,
        }
    }

    /// Replace the body of a held comment. Returns `false` if it is not held.
    pub fn update_body(&mut self, activity_id: &str, new_body: &str) -> bool {
        let Some(activity) = self.activities.iter_mut().find(|a| a.id == activity_id) else {
            return false;
        };
        match &mut activity.payload {
            ActivityPayload::Comment { body, .. } => {
                *body = new_body.to_string();
                true
            }
            _ => false,
        }
    }

    /// Body of held activity `activity_id` with checklist item `item_index` flipped.
    pub fn toggled_body(&self, activity_id: &str, item_index: usize) -> Result<String> {
        let body = self
            .activities
            .iter()
            .find(|a| a.id == activity_id)
            .and_then(Activity::body)
            .ok_or_else(|| {
                sightline_core::Error::NotFound(format!("Comment {} not in feed", activity_id))
            })?;
        checklist::toggle(body, item_index)
    }

    /// Fetch the newest page for `query` and replace the state with it.
    pub async fn load_initial(
        &mut self,
        source: &dyn FeedSource,
        query: FeedQuery,
    ) -> Result<&[Activity]> {
        let page = source.fetch_page(&query.page(None)).await?;
        self.replace(query, page);
        Ok(&self.activities)
    }

    /// Fetch and prepend the next older page. A no-op when there is none.
    pub async fn load_older(&mut self, source: &dyn FeedSource) -> Result<PrependOutcome> {
        let Some(request) = self.begin_older() else {
            return Ok(PrependOutcome {
                prepended: 0,
                has_older: self.has_older,
                oldest_cursor: self.oldest_cursor.clone(),
                resorted: false,
                added_ids: Vec::new(),
            });
        };
        match source.fetch_page(&request).await {
            Ok(page) => Ok(self.apply_older(page)),
            Err(e) => {
                self.fail_older();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn comment(id: &str, secs: i64) -> Activity {
        Activity {
            id: id.to_string(),
            kind: ActivityKind::Comment,
            author_name: "ana".into(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            payload: ActivityPayload::Comment {
                body: "* [ ] check".into(),
                files: vec![],
            },
        }
    }

    fn page(ids: &[(&str, i64)], has_older: bool, cursor: Option<&str>) -> ActivityPage {
        ActivityPage {
            activities: ids.iter().map(|(id, t)| comment(id, *t)).collect(),
            has_older,
            oldest_cursor: cursor.map(Cursor::new),
            newest_cursor: None,
        }
    }

    fn query() -> FeedQuery {
        FeedQuery::new("demo", vec!["v1".into()], 2)
    }

    fn ids(pager: &Pager) -> Vec<&str> {
        pager.activities().iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn test_replace_sorts_and_dedups() {
        let mut pager = Pager::new();
        pager.replace(query(), page(&[("b", 20), ("a", 10), ("b", 20)], true, Some("c1")));
        assert_eq!(ids(&pager), vec!["a", "b"]);
        assert!(pager.has_older());
    }

    #[test]
    fn test_older_prepends_unseen_only() {
        let mut pager = Pager::new();
        pager.replace(query(), page(&[("c", 30), ("d", 40)], true, Some("c1")));

        let req = pager.begin_older().unwrap();
        assert_eq!(req.before, Some(Cursor::new("c1")));
        assert!(pager.is_loading_older());

        let outcome = pager.apply_older(page(&[("a", 10), ("c", 30)], false, Some("c0")));
        assert_eq!(outcome.prepended, 1);
        assert!(!outcome.resorted);
        assert_eq!(outcome.added_ids, vec!["a".to_string()]);
        assert_eq!(ids(&pager), vec!["a", "c", "d"]);
        assert!(!pager.has_older());
        assert!(!pager.is_loading_older());
    }

    #[test]
    fn test_begin_older_noop_without_history() {
        let mut pager = Pager::new();
        pager.replace(query(), page(&[("a", 1)], false, Some("c1")));
        assert!(pager.begin_older().is_none());
    }

    #[test]
    fn test_begin_older_noop_while_loading() {
        let mut pager = Pager::new();
        pager.replace(query(), page(&[("a", 1)], true, Some("c1")));
        assert!(pager.begin_older().is_some());
        assert!(pager.begin_older().is_none());
        pager.fail_older();
        assert!(pager.begin_older().is_some());
    }

    #[test]
    fn test_overlapping_page_is_resorted() {
        let mut pager = Pager::new();
        pager.replace(query(), page(&[("b", 20), ("d", 40)], true, Some("c1")));
        let outcome = pager.apply_older(page(&[("a", 10), ("c", 30)], true, Some("c0")));
        assert!(outcome.resorted);
        assert_eq!(ids(&pager), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_cursor_kept_when_page_has_none() {
        let mut pager = Pager::new();
        pager.replace(query(), page(&[("b", 20)], true, Some("c1")));
        pager.begin_older();
        pager.apply_older(page(&[], true, None));
        assert_eq!(pager.oldest_cursor(), Some(&Cursor::new("c1")));
    }

    #[test]
    fn test_update_body_and_toggle() {
        let mut pager = Pager::new();
        pager.replace(query(), page(&[("a", 1)], false, None));

        let toggled = pager.toggled_body("a", 0).unwrap();
        assert_eq!(toggled, "* [x] check");
        assert_eq!(pager.activity(0).unwrap().body(), Some("* [ ] check"));

        assert!(pager.update_body("a", &toggled));
        assert_eq!(pager.activity(0).unwrap().body(), Some("* [x] check"));
        assert!(!pager.update_body("zz", "x"));
        assert!(pager.toggled_body("zz", 0).is_err());
    }

    #[test]
    fn test_visible_keeps_feed_indices() {
        let mut pager = Pager::new();
        pager.replace(query(), page(&[("a", 1), ("b", 2)], false, None));
        let visible = pager.visible(ActivityFilter::Checklists);
        assert_eq!(visible.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1]);
        assert!(pager.visible(ActivityFilter::Published).is_empty());
    }
}
