/**
 * Upload helpers
 * Multipart image intake shared by property photos and agent avatars
 */
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::access::Viewer;
use crate::error::{ApiError, ApiResult};
use crate::storage::{self, ObjectStore, MAX_IMAGE_BYTES};

/// Body cap for routes that accept several images at once
pub const UPLOAD_BODY_LIMIT: usize = 10 * MAX_IMAGE_BYTES;

/// One validated image from a multipart request
#[derive(Debug, Clone)]
pub struct IncomingImage {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Bytes,
}

impl IncomingImage {
    pub fn extension(&self) -> &'static str {
        storage::extension_for(self.content_type)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub size: usize,
    pub mime_type: String,
}

fn multipart_error(e: MultipartError) -> ApiError {
    tracing::warn!("Multipart error: {}", e);
    ApiError::BadRequest("Invalid multipart data".to_string())
}

/// Checks size and magic bytes of one file part.
pub fn validate_image(file_name: &str, bytes: Bytes) -> ApiResult<IncomingImage> {
    if bytes.is_empty() {
        return Err(ApiError::BadRequest(format!("{}: empty file", file_name)));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::BadRequest(format!(
            "{}: file too large. Maximum size is 5MB.",
            file_name
        )));
    }
    let content_type = storage::detect_image_type(&bytes).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "{}: unsupported file type. Allowed: JPEG, PNG, WebP, GIF.",
            file_name
        ))
    })?;

    Ok(IncomingImage {
        file_name: file_name.to_string(),
        content_type,
        bytes,
    })
}

/// Reads every file part; text parts are ignored.
///
/// The whole batch is rejected when any file is not an acceptable image,
/// so nothing is stored for a request that fails validation.
pub async fn read_images(multipart: &mut Multipart) -> ApiResult<Vec<IncomingImage>> {
    let mut images = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(multipart_error)?;
        images.push(validate_image(&file_name, bytes)?);
    }

    if images.is_empty() {
        return Err(ApiError::BadRequest("No file provided".to_string()));
    }
    Ok(images)
}

/// POST /api/dashboard/uploads/avatar
/// Stores the first image as `<uuid>.<ext>` in the avatars bucket.
pub async fn upload_avatar(
    viewer: Viewer,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let image = read_images(&mut multipart)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::BadRequest("No file provided".to_string()))?;

    let path = storage::avatar_path(image.extension());
    let url = storage::AVATARS
        .upload(&path, &image.bytes, image.content_type)
        .await?;

    tracing::info!(agent_id = %viewer.agent_id, "Avatar uploaded: {}", path);

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url,
            size: image.bytes.len(),
            mime_type: image.content_type.to_string(),
        }),
    ))
}
