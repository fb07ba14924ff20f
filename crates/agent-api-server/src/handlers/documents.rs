use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::document::IngestError;
use crate::models::{ApiResponse, MessageResponse};
use crate::services::{DocumentService, IngestReport};
use crate::state::AppState;
use crate::utils::error::ApiError;

struct UploadForm {
    filename: String,
    bytes: Vec<u8>,
    document_id: Option<String>,
}

fn multipart_error(e: MultipartError, limit: usize) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!("File too large. Maximum size is {} bytes", limit))
    } else {
        ApiError::BadRequest(format!("Failed to read upload: {}", e.body_text()))
    }
}

/// Parse the multipart form. The extension is checked before the file body is read.
async fn read_upload(
    state: &AppState,
    documents: &DocumentService,
    mut multipart: Multipart,
) -> Result<UploadForm, ApiError> {
    let limit = documents.upload_config().max_file_size_bytes;
    let expose = state.expose_error_details();

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut document_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let field_name = field.name().unwrap_or_default().to_string();

        match field_name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_owned)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| ApiError::BadRequest("Uploaded file has no filename".to_string()))?;

                documents
                    .check_filename(&filename)
                    .map_err(|e| ApiError::from_service(e.into(), expose))?;

                let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                file = Some((filename, bytes.to_vec()));
            }
            "documentId" => {
                let text = field.text().await.map_err(|e| multipart_error(e, limit))?;
                document_id = Some(text.trim().to_string()).filter(|id| !id.is_empty());
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| ApiError::from_service(IngestError::MissingFile.into(), expose))?;

    Ok(UploadForm {
        filename,
        bytes,
        document_id,
    })
}

/// Upload and index a document
pub async fn upload_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<IngestReport>>, ApiError> {
    info!("File upload request received");

    let form = read_upload(&state, &state.documents, multipart).await?;
    info!("Processing document: {} ({} bytes)", form.filename, form.bytes.len());

    let report = state
        .documents
        .ingest(&form.filename, form.bytes, form.document_id)
        .await
        .map_err(|e| ApiError::from_service(e, state.expose_error_details()))?;

    Ok(Json(ApiResponse::ok(report)))
}

pub async fn delete_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .documents
        .delete(&document_id)
        .await
        .map_err(|e| ApiError::from_service(e, state.expose_error_details()))?;

    Ok(Json(MessageResponse::ok(format!("Document {} deleted", document_id))))
}

pub async fn reindex_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<IngestReport>>, ApiError> {
    let form = read_upload(&state, &state.documents, multipart).await?;
    info!("Reindexing document {} from {}", document_id, form.filename);

    let report = state
        .documents
        .reindex(&document_id, &form.filename, form.bytes)
        .await
        .map_err(|e| ApiError::from_service(e, state.expose_error_details()))?;

    Ok(Json(ApiResponse::ok(report)))
}
