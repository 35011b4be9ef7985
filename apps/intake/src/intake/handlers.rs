use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{FileInfo, Stage, SubmittedFields, UploadRecord};
use super::validation::{
    clean_filename, normalize_field, reject_multipart, resolve_mime, validate_file,
};
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAccepted {
    pub success: bool,
    pub upload_id: String,
    pub file_info: FileInfo,
    pub fields: SubmittedFields,
}

#[derive(Deserialize)]
pub struct StatusQuery {
    pub id: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub status: UploadRecord,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeResponse {
    pub success: bool,
    pub upload_id: String,
    pub stage: Stage,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    pub upload_id: String,
    pub cancelled: bool,
}

struct UploadedFile {
    filename: String,
    declared_mime: Option<String>,
    bytes: Bytes,
}

/// POST /upload
///
/// Accepts a multipart form with a `file` part and optional `name`, `email`
/// and `phone` fields. The upload is validated and acknowledged here; all
/// processing happens in a supervised background run.
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAccepted>), AppError> {
    let limit = state.config.max_upload_bytes;
    let mut file: Option<UploadedFile> = None;
    let mut fields = SubmittedFields::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| reject_multipart(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if file.is_some() {
                    warn!("Ignoring extra file part in upload");
                    continue;
                }
                let filename = clean_filename(field.file_name());
                let declared_mime = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| reject_multipart(e, limit))?;
                file = Some(UploadedFile {
                    filename,
                    declared_mime,
                    bytes,
                });
            }
            "name" | "email" | "phone" => {
                let value = field.text().await.map_err(|e| reject_multipart(e, limit))?;
                let value = normalize_field(&value);
                match name.as_str() {
                    "name" => fields.name = value,
                    "email" => fields.email = value,
                    _ => fields.phone = value,
                }
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::Validation("No file uploaded".into()))?;
    let mime = resolve_mime(file.declared_mime.as_deref(), &file.filename);
    let format = validate_file(file.bytes.len(), limit, &mime)?;

    let id = Uuid::new_v4().simple().to_string();
    let file_info = FileInfo {
        name: file.filename,
        mime_type: mime,
        size: file.bytes.len(),
    };
    let record = UploadRecord::received(id.clone(), file_info.clone(), fields.clone());

    // Payload first: a record must never exist without its file.
    state.tracker.store().put_payload(&id, &file.bytes).await?;
    state.tracker.create(&record).await?;
    state.supervisor.spawn(&id, file.bytes)?;

    info!(
        "Upload {id}: accepted {} ({}, {} bytes)",
        file_info.name,
        format.label(),
        file_info.size
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAccepted {
            success: true,
            upload_id: id,
            file_info,
            fields,
        }),
    ))
}

/// GET /upload?id=
pub async fn handle_status(
    State(state): State<AppState>,
    Query(params): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, AppError> {
    let id = params
        .id
        .as_deref()
        .and_then(normalize_field)
        .ok_or_else(|| AppError::Validation("Missing upload id".into()))?;
    let status = state.tracker.get(&id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

/// POST /upload/:id/resume
pub async fn handle_resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ResumeResponse>), AppError> {
    let stage = state.supervisor.resume(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ResumeResponse {
            success: true,
            upload_id: id,
            stage,
        }),
    ))
}

/// POST /upload/:id/cancel
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let cancelled = state.supervisor.cancel(&id).await?;
    Ok(Json(CancelResponse {
        success: true,
        upload_id: id,
        cancelled,
    }))
}
