//! GraphQL transport and wire types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use sightline_core::{
    Activity, ActivityKind, ActivityPayload, Error, FileRef, Origin, Result, StatusOption,
};

use crate::pool::{ConnectionPool, Request};

pub const GRAPHQL_PATH: &str = "/graphql";

pub const ACTIVITIES_QUERY: &str = r#"
query Activities($projectName: String!, $entityIds: [String!]!, $activityTypes: [String!]!, $last: Int, $before: String) {
  project(name: $projectName) {
    activities(entityIds: $entityIds, activityTypes: $activityTypes, last: $last, before: $before) {
      pageInfo { hasPreviousPage startCursor endCursor }
      edges {
        cursor
        node { activityId activityType body createdAt author { name } activityData }
      }
    }
  }
}"#;

pub const VERSION_TASK_QUERY: &str = r#"
query VersionTask($projectName: String!, $versionId: String!) {
  project(name: $projectName) {
    version(id: $versionId) { id taskId }
  }
}"#;

pub const STATUSES_QUERY: &str = r#"
query Statuses($projectName: String!) {
  project(name: $projectName) {
    statuses { name color scope }
  }
}"#;

// =============================================================================
// ENVELOPE
// =============================================================================

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: JsonValue,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// `{"project": ...}` root shared by every query here.
#[derive(Debug, Deserialize)]
pub struct ProjectRoot<T> {
    pub project: Option<T>,
}

/// Run `query` and decode its `data` member.
pub async fn execute<T: DeserializeOwned>(
    pool: &ConnectionPool,
    query: &str,
    variables: JsonValue,
) -> Result<T> {
    let body = serde_json::to_value(GraphQlRequest { query, variables })?;
    let response: GraphQlResponse<T> = pool.execute_json(Request::post(GRAPHQL_PATH, body)).await?;

    if let Some(first) = response.errors.first() {
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        if response.data.is_none() {
            return Err(Error::Http {
                status: 200,
                message: format!("GraphQL error: {}", messages.join("; ")),
            });
        }
        tracing::warn!(error = %first.message, "GraphQL returned partial data");
    }

    response
        .data
        .ok_or_else(|| Error::Serialization("GraphQL response without data".to_string()))
}

// =============================================================================
// ACTIVITIES
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ActivitiesProject {
    pub activities: ActivityConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityConnection {
    pub page_info: PageInfo,
    #[serde(default)]
    pub edges: Vec<ActivityEdge>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityEdge {
    pub cursor: Option<String>,
    pub node: Option<ActivityNode>,
}

#[derive(Debug, Deserialize)]
pub struct Author {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityNode {
    pub activity_id: String,
    pub activity_type: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    pub author: Option<Author>,
    /// Object, JSON-encoded string, or null depending on the server version.
    #[serde(default, deserialize_with = "deserialize_activity_data")]
    pub activity_data: JsonValue,
}

impl ActivityNode {
    /// Convert to the domain model. Unknown activity types yield `None`.
    pub fn into_activity(self) -> Option<Activity> {
        let kind = ActivityKind::from_wire(&self.activity_type)?;
        let data = &self.activity_data;

        let payload = match kind {
            ActivityKind::Comment => ActivityPayload::Comment {
                body: self.body.unwrap_or_default(),
                files: data
                    .get("files")
                    .and_then(|f| serde_json::from_value::<Vec<FileRef>>(f.clone()).ok())
                    .unwrap_or_default(),
            },
            ActivityKind::StatusChange => ActivityPayload::StatusChange {
                old_status: str_field(data, "oldValue").unwrap_or("N/A").to_string(),
                new_status: str_field(data, "newValue").unwrap_or("N/A").to_string(),
                origin: origin(data),
                product_name: data
                    .get("parents")
                    .and_then(|p| p.get(1))
                    .and_then(|p| str_field(p, "name"))
                    .map(String::from),
            },
            ActivityKind::Publish => ActivityPayload::Publish {
                product_name: data
                    .get("context")
                    .and_then(|c| str_field(c, "productName"))
                    .map(String::from),
                version_name: data
                    .get("origin")
                    .and_then(|o| str_field(o, "name"))
                    .map(String::from),
            },
        };

        Some(Activity {
            id: self.activity_id,
            kind,
            author_name: self
                .author
                .and_then(|a| a.name)
                .unwrap_or_else(|| "Unknown".to_string()),
            created_at: self.created_at,
            payload,
        })
    }
}

fn str_field<'a>(value: &'a JsonValue, key: &str) -> Option<&'a str> {
    value.get(key).and_then(JsonValue::as_str)
}

fn origin(data: &JsonValue) -> Option<Origin> {
    let origin = data.get("origin")?;
    Some(Origin {
        kind: str_field(origin, "type").unwrap_or_default().to_string(),
        name: str_field(origin, "name").unwrap_or_default().to_string(),
        label: str_field(origin, "label").map(String::from),
    })
}

fn deserialize_activity_data<'de, D>(deserializer: D) -> std::result::Result<JsonValue, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = JsonValue::deserialize(deserializer)?;
    Ok(match raw {
        JsonValue::String(s) => serde_json::from_str(&s).unwrap_or(JsonValue::Null),
        other => other,
    })
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

// =============================================================================
// ENTITIES AND STATUSES
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct VersionProject {
    pub version: Option<VersionNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionNode {
    pub id: String,
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusesProject {
    #[serde(default)]
    pub statuses: Vec<StatusNode>,
}

#[derive(Debug, Deserialize)]
pub struct StatusNode {
    pub name: String,
    pub color: Option<String>,
    /// Entity types the status applies to. Absent means all.
    pub scope: Option<Vec<String>>,
}

impl StatusNode {
    pub fn applies_to(&self, kind: &str) -> bool {
        self.scope
            .as_ref()
            .map_or(true, |scope| scope.iter().any(|s| s == kind))
    }

    pub fn into_option(self) -> StatusOption {
        StatusOption {
            value: self.name,
            color: self
                .color
                .unwrap_or_else(|| sightline_core::defaults::STATUS_FALLBACK_COLOR.to_string()),
        }
    }
}
