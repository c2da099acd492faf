//! Activity pages over GraphQL.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use sightline_core::{ActivityPage, Cursor, Error, FeedSource, PageRequest, Result};

use crate::graphql::{self, ActivitiesProject, ProjectRoot, ACTIVITIES_QUERY};
use crate::HttpBackend;

#[async_trait]
impl FeedSource for HttpBackend {
    async fn fetch_page(&self, request: &PageRequest) -> Result<ActivityPage> {
        if request.entity_ids.is_empty() {
            return Ok(ActivityPage::empty());
        }

        let kinds: Vec<&str> = request.kinds.iter().map(|k| k.wire_name()).collect();
        let variables = json!({
            "projectName": request.project,
            "entityIds": request.entity_ids,
            "activityTypes": kinds,
            "last": request.page_size,
            "before": request.before.as_ref().map(Cursor::as_str),
        });

        let root: ProjectRoot<ActivitiesProject> =
            graphql::execute(&self.pool, ACTIVITIES_QUERY, variables).await?;
        let connection = root
            .project
            .ok_or_else(|| Error::NotFound(format!("Project {}", request.project)))?
            .activities;

        let edge_count = connection.edges.len();
        let activities: Vec<_> = connection
            .edges
            .into_iter()
            .filter_map(|edge| edge.node)
            .filter_map(|node| node.into_activity())
            .collect();

        debug!(
            project = %request.project,
            activity_count = activities.len(),
            skipped = edge_count - activities.len(),
            has_older = connection.page_info.has_previous_page,
            "Fetched activity page"
        );

        Ok(ActivityPage {
            activities,
            has_older: connection.page_info.has_previous_page,
            oldest_cursor: connection.page_info.start_cursor.map(Cursor::new),
            newest_cursor: connection.page_info.end_cursor.map(Cursor::new),
        }
        .normalize())
    }
}
