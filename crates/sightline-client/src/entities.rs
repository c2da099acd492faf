//! Entity resolution and status catalogue.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use sightline_core::{EntityKind, EntityResolver, Error, FeedTarget, Result, StatusOption};

use crate::graphql::{
    self, ProjectRoot, StatusesProject, VersionProject, STATUSES_QUERY, VERSION_TASK_QUERY,
};
use crate::HttpBackend;

#[async_trait]
impl EntityResolver for HttpBackend {
    async fn feed_entities(&self, target: &FeedTarget) -> Result<Vec<String>> {
        if target.kind == EntityKind::Task {
            return Ok(vec![target.entity_id.clone()]);
        }

        let root: ProjectRoot<VersionProject> = graphql::execute(
            &self.pool,
            VERSION_TASK_QUERY,
            json!({ "projectName": target.project, "versionId": target.entity_id }),
        )
        .await?;
        let version = root
            .project
            .and_then(|p| p.version)
            .ok_or_else(|| Error::NotFound(format!("Version {}", target.entity_id)))?;

        let mut ids = vec![version.id];
        if let Some(task_id) = version.task_id.filter(|t| !t.is_empty()) {
            ids.push(task_id);
        }
        debug!(entity_id = %target.entity_id, entity_ids = ?ids, "Resolved feed entities");
        Ok(ids)
    }

    async fn statuses(&self, project: &str, kind: EntityKind) -> Result<Vec<StatusOption>> {
        let root: ProjectRoot<StatusesProject> =
            graphql::execute(&self.pool, STATUSES_QUERY, json!({ "projectName": project }))
                .await?;
        let scope = match kind {
            EntityKind::Version => "version",
            EntityKind::Task => "task",
        };
        Ok(root
            .project
            .map(|p| p.statuses)
            .unwrap_or_default()
            .into_iter()
            .filter(|s| s.applies_to(scope))
            .map(|s| s.into_option())
            .collect())
    }
}
