use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

use crate::rooms::{RoomRegistry, RoomSummary};
use crate::storage::{DocumentStore, StorageError, StoredDocument};

pub type SharedStorage = Arc<DocumentStore>;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub storage: SharedStorage,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    service: &'static str,
    active_rooms: usize,
    version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RoomsResponse {
    rooms: Vec<RoomSummary>,
}

#[derive(Debug, Serialize)]
pub struct SaveDocumentResponse {
    status: &'static str,
    doc_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteDocumentResponse {
    status: &'static str,
    doc_id: String,
}

#[derive(Debug, Serialize)]
struct DocumentErrorBody {
    error: &'static str,
}

#[derive(Debug)]
pub struct DocumentErrorResponse {
    status: StatusCode,
    body: DocumentErrorBody,
}

impl DocumentErrorResponse {
    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: DocumentErrorBody {
                error: "Document not found",
            },
        }
    }

    fn invalid_id() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: DocumentErrorBody {
                error: "Invalid document id",
            },
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: DocumentErrorBody {
                error: "Internal storage error",
            },
        }
    }
}

impl IntoResponse for DocumentErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<StorageError> for DocumentErrorResponse {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => Self::not_found(),
            StorageError::InvalidId(_) => Self::invalid_id(),
            other => {
                error!("Storage error: {}", other);
                Self::internal()
            }
        }
    }
}

/// GET /api/health - Process status and live room count
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        service: "Cove Collaboration Relay",
        active_rooms: state.registry.room_count(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api/rooms - List all live rooms
pub async fn list_rooms(State(state): State<AppState>) -> Json<RoomsResponse> {
    Json(RoomsResponse {
        rooms: state.registry.list(),
    })
}

/// POST /api/documents/{doc_id}/save - Persist a document
pub async fn save_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Json(content): Json<Value>,
) -> Result<Json<SaveDocumentResponse>, DocumentErrorResponse> {
    state.storage.save(&doc_id, content).await?;
    Ok(Json(SaveDocumentResponse {
        status: "saved",
        doc_id,
    }))
}

/// GET /api/documents/{doc_id} - Load a persisted document
pub async fn get_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<StoredDocument>, DocumentErrorResponse> {
    let document = state.storage.load(&doc_id).await?;
    Ok(Json(document))
}

/// DELETE /api/documents/{doc_id} - Delete a persisted document
pub async fn delete_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<DeleteDocumentResponse>, DocumentErrorResponse> {
    state.storage.delete(&doc_id).await?;
    Ok(Json(DeleteDocumentResponse {
        status: "deleted",
        doc_id,
    }))
}
