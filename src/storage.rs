use crate::error::*;
use crate::init::AppState;
use crate::models::{Attachment, Dimensions, FileSource, ImageFile};
use crate::types::{FileSize, MimeType};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const PREVIEW_ROUTE_PREFIX: &str = "/api/previews/";

// ============================================================================
// Preview Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct Preview {
    pub media_type: MimeType,
    pub bytes: Bytes,
}

/// Client-local preview references for attachment images. A reference lives
/// until it is released, either on explicit removal or never once it has
/// been handed to a sent message.
#[derive(Default)]
pub struct PreviewStore {
    previews: RwLock<HashMap<Uuid, Preview>>,
}

impl PreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uri_for(id: &Uuid) -> String {
        format!("{}{}", PREVIEW_ROUTE_PREFIX, id)
    }

    pub fn id_from_uri(uri: &str) -> Option<Uuid> {
        uri.strip_prefix(PREVIEW_ROUTE_PREFIX)
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    /// Stores the bytes and returns the renderable reference.
    pub async fn allocate(&self, id: Uuid, media_type: MimeType, bytes: Bytes) -> String {
        self.previews
            .write()
            .await
            .insert(id, Preview { media_type, bytes });
        Self::uri_for(&id)
    }

    pub async fn get(&self, id: &Uuid) -> Option<Preview> {
        self.previews.read().await.get(id).cloned()
    }

    pub async fn release(&self, uri: &str) -> bool {
        match Self::id_from_uri(uri) {
            Some(id) => self.previews.write().await.remove(&id).is_some(),
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.previews.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// ============================================================================
// Image Processor
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ImageProcessor {
    max_size: FileSize,
}

impl ImageProcessor {
    pub fn new(max_size: FileSize) -> Self {
        Self { max_size }
    }

    /// Checks the size bound and that the bytes decode as an image.
    pub fn validate_image(&self, data: &Bytes) -> ServiceResult<Dimensions> {
        let size = FileSize::bytes(data.len() as u64);
        if size > self.max_size {
            return Err(ServiceError::local_io(format!(
                "image too large ({}, max {})",
                size, self.max_size
            )));
        }
        if data.is_empty() {
            return Err(ServiceError::local_io("file is empty"));
        }

        let img = image::load_from_memory(data)
            .map_err(|e| ServiceError::local_io(format!("invalid image: {}", e)))?;

        Ok(Dimensions {
            width: img.width(),
            height: img.height(),
        })
    }
}

// ============================================================================
// HTTP Handlers
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct UploadParams {
    #[serde(default)]
    pub source: FileSource,
}

/// POST /api/attachments?source=picker|drop
///
/// Multipart field `image` (or `file`). Returns the new attachment in
/// `analyzing` status, or 204 when a non-image drop was ignored.
pub async fn upload_attachment_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<Response> {
    while let Some(field) = multipart.next_field().await? {
        if !matches!(field.name(), Some("image") | Some("file")) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("image").to_string();
        let media_type = MimeType::resolve(field.content_type(), &file_name);
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::from(ServiceError::local_io(format!("read: {}", e))))?;

        let file = ImageFile::new(file_name, media_type, data);
        return match state.preprocessor.select_file(file, params.source).await? {
            Some(attachment) => Ok((StatusCode::CREATED, Json(attachment)).into_response()),
            None => Ok(StatusCode::NO_CONTENT.into_response()),
        };
    }

    Err(AppError::bad_request("No image field"))
}

/// DELETE /api/attachments
pub async fn remove_attachment_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Attachment>> {
    state
        .preprocessor
        .remove_attachment()
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found("Attachment"))
}

/// GET /api/previews/{id}
pub async fn get_preview_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let preview = state
        .previews
        .get(&id)
        .await
        .ok_or_else(|| AppError::not_found("Preview"))?;

    Ok((
        [(header::CONTENT_TYPE, preview.media_type.to_string())],
        preview.bytes,
    )
        .into_response())
}
