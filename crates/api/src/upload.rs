//! Video upload validation and spooling to disk.

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use kinetrack_core::streaming::TransientFile;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// File extensions accepted regardless of the declared content type.
pub const SUPPORTED_VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4", "webm", "m4v", "avi"];

/// Extension used when the upload has no usable file name.
pub const DEFAULT_VIDEO_EXTENSION: &str = ".mp4";

/// Whether an upload looks like a video.
///
/// Accepts a `video/*` or `application/octet-stream` content type, or a file
/// name ending in one of [`SUPPORTED_VIDEO_EXTENSIONS`].
pub fn is_video_upload(content_type: Option<&str>, file_name: Option<&str>) -> bool {
    let content_type = content_type.unwrap_or("").trim().to_ascii_lowercase();
    if content_type.starts_with("video/") || content_type == "application/octet-stream" {
        return true;
    }
    file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| SUPPORTED_VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Extension (with leading dot) for the spooled file, taken from the
/// client's file name. Only short alphanumeric extensions are kept.
pub fn upload_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| DEFAULT_VIDEO_EXTENSION.to_string())
}

/// A fresh, collision-free path inside `upload_dir`.
pub fn upload_path(upload_dir: &Path, file_name: Option<&str>) -> PathBuf {
    upload_dir.join(format!(
        "{}{}",
        Uuid::new_v4().simple(),
        upload_extension(file_name)
    ))
}

/// Validate a multipart video field and write it to `upload_dir` chunk by
/// chunk.
///
/// The returned guard owns the file; a failed write leaves nothing behind.
pub async fn save_video(mut field: Field<'_>, upload_dir: &Path) -> AppResult<TransientFile> {
    let content_type = field.content_type().map(str::to_string);
    let file_name = field.file_name().map(str::to_string);

    if !is_video_upload(content_type.as_deref(), file_name.as_deref()) {
        return Err(AppError::BadRequest(
            "File must be a video (e.g. .mov, .mp4).".into(),
        ));
    }

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    let input = TransientFile::new(upload_path(upload_dir, file_name.as_deref()));
    let mut file = tokio::fs::File::create(input.path())
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::InternalError(e.to_string()))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    tracing::debug!(
        path = %input.path().display(),
        bytes = written,
        content_type = content_type.as_deref().unwrap_or(""),
        "Saved video upload",
    );
    Ok(input)
}
