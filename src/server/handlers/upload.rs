// src/server/handlers/upload.rs

//! `/api/upload/*`: the chunked upload surface. `chunk` accepts
//! one multipart-encoded chunk at a time; `status`/`cancel` are keyed by
//! the `upload_id` the client received from its first chunk response.

use super::require_permission;
use crate::core::DPlaneError;
use crate::core::auth::AuthenticatedUser;
use crate::core::upload::upload_id as compute_upload_id;
use crate::server::context::Core;
use axum::Json;
use axum::extract::{Multipart, Query, State};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

struct ChunkFields {
    filename: String,
    path: String,
    chunk_index: usize,
    total_chunks: usize,
    total_size: u64,
    data: Vec<u8>,
}

async fn parse_multipart(mut multipart: Multipart) -> Result<ChunkFields, DPlaneError> {
    let mut filename = None;
    let mut path = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut total_size = None;
    let mut data = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| DPlaneError::InvalidInput(e.to_string()))? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "chunk" => {
                let bytes = field.bytes().await.map_err(|e| DPlaneError::InvalidInput(e.to_string()))?;
                data = Some(bytes.to_vec());
            }
            "filename" => filename = Some(text_field(field).await?),
            "path" => path = Some(text_field(field).await?),
            "chunkIndex" => chunk_index = Some(text_field(field).await?.parse().map_err(|_| DPlaneError::InvalidInput("chunkIndex must be numeric".to_string()))?),
            "totalChunks" => total_chunks = Some(text_field(field).await?.parse().map_err(|_| DPlaneError::InvalidInput("totalChunks must be numeric".to_string()))?),
            "fileSize" => total_size = Some(text_field(field).await?.parse().map_err(|_| DPlaneError::InvalidInput("fileSize must be numeric".to_string()))?),
            _ => {}
        }
    }

    Ok(ChunkFields {
        filename: filename.ok_or_else(|| DPlaneError::InvalidInput("missing field 'filename'".to_string()))?,
        path: path.ok_or_else(|| DPlaneError::InvalidInput("missing field 'path'".to_string()))?,
        chunk_index: chunk_index.ok_or_else(|| DPlaneError::InvalidInput("missing field 'chunkIndex'".to_string()))?,
        total_chunks: total_chunks.ok_or_else(|| DPlaneError::InvalidInput("missing field 'totalChunks'".to_string()))?,
        total_size: total_size.ok_or_else(|| DPlaneError::InvalidInput("missing field 'fileSize'".to_string()))?,
        data: data.ok_or_else(|| DPlaneError::InvalidInput("missing field 'chunk'".to_string()))?,
    })
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, DPlaneError> {
    field.text().await.map_err(|e| DPlaneError::InvalidInput(e.to_string()))
}

pub async fn upload_chunk(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "upload", "write").await?;
    let fields = parse_multipart(multipart).await?;

    let id = compute_upload_id(&fields.filename, fields.total_size);
    let destination = PathBuf::from(&fields.path);

    let result = core
        .upload
        .receive_chunk(
            &fields.filename,
            destination,
            fields.chunk_index,
            fields.total_chunks,
            fields.total_size,
            &fields.data,
        )
        .await?;

    // Every chunk is in; assemble in the background so this response
    // doesn't wait on the final copy. The session stays present (and
    // reports `complete: true`) until assembly actually finishes.
    if result.is_some() {
        let manager = core.upload.clone();
        let audit = core.audit.clone();
        let assembling_id = id.clone();
        tokio::spawn(async move { manager.assemble_and_finish(assembling_id, audit).await });
    }

    let status = core.upload.status(&id).await;
    let (received, total) = status
        .as_ref()
        .map(|s| (s.received_chunks, s.total_chunks))
        .unwrap_or((fields.chunk_index + 1, fields.total_chunks));
    let progress = (received as f64 / total.max(1) as f64) * 100.0;

    Ok(Json(json!({
        "success": true,
        "complete": result.is_some(),
        "upload_id": id,
        "progress": progress,
    })))
}

pub async fn upload_status(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "upload", "read").await?;
    let id = params.get("upload_id").ok_or_else(|| DPlaneError::InvalidInput("missing query param 'upload_id'".to_string()))?;
    match core.upload.status(id).await {
        Some(status) => Ok(Json(json!({"success": true, "status": status}))),
        None => Err(DPlaneError::NotFound(format!("upload '{id}'"))),
    }
}

pub async fn cancel_upload(
    State(core): State<Arc<Core>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, DPlaneError> {
    require_permission(&core.store, &core.audit, &user, "upload", "delete").await?;
    let id = params.get("upload_id").ok_or_else(|| DPlaneError::InvalidInput("missing query param 'upload_id'".to_string()))?;
    core.upload.cancel(id).await?;
    Ok(Json(json!({"success": true})))
}
