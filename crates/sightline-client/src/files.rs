//! Attachment downloads.

use async_trait::async_trait;
use tracing::trace;

use sightline_core::{detect_mime, Attachment, AttachmentSource, Error, FileRef, Result};

use crate::pool::Request;
use crate::HttpBackend;

/// REST path of a project file.
pub fn file_path(project: &str, file_id: &str) -> String {
    format!("/api/projects/{}/files/{}", project, file_id)
}

#[async_trait]
impl AttachmentSource for HttpBackend {
    async fn fetch_file(&self, project: &str, file: &FileRef) -> Result<Attachment> {
        let response = self
            .pool
            .execute(Request::get(file_path(project, &file.id)))
            .await?;

        if response.body.is_empty() {
            return Err(Error::NotFound(format!("File {} has no content", file.id)));
        }

        let mime_type = detect_mime(
            response.content_type.as_deref(),
            &file.filename,
            &response.body,
        );
        trace!(
            file_id = %file.id,
            mime_type = %mime_type,
            bytes = response.body.len(),
            "Downloaded attachment"
        );

        Ok(Attachment {
            file_id: file.id.clone(),
            filename: file.filename.clone(),
            mime_type,
            bytes: response.body,
        })
    }
}
