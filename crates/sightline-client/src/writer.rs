//! REST mutations: activity bodies, statuses and new comments.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use sightline_core::{ActivityWriter, FeedTarget, Result};

use crate::pool::Request;
use crate::HttpBackend;

fn entity_path(target: &FeedTarget) -> String {
    format!(
        "/api/projects/{}/{}/{}",
        target.project,
        target.kind.path_segment(),
        target.entity_id
    )
}

#[async_trait]
impl ActivityWriter for HttpBackend {
    async fn update_activity(&self, project: &str, activity_id: &str, body: &str) -> Result<()> {
        let path = format!("/api/projects/{}/activities/{}", project, activity_id);
        self.pool
            .execute(Request::patch(path, json!({ "body": body })))
            .await?;
        info!(project = %project, activity_id = %activity_id, "Activity updated");
        Ok(())
    }

    async fn update_status(&self, target: &FeedTarget, status: &str) -> Result<()> {
        self.pool
            .execute(Request::patch(
                entity_path(target),
                json!({ "status": status }),
            ))
            .await?;
        info!(
            project = %target.project,
            entity_id = %target.entity_id,
            new_status = %status,
            "Status updated"
        );
        Ok(())
    }

    async fn create_comment(&self, target: &FeedTarget, body: &str) -> Result<()> {
        let path = format!("{}/activities", entity_path(target));
        self.pool
            .execute(
                Request::post(path, json!({ "activityType": "comment", "body": body })).once(),
            )
            .await?;
        info!(
            project = %target.project,
            entity_id = %target.entity_id,
            "Comment posted"
        );
        Ok(())
    }
}
