//! Admin HTTP surface: prompt editing, document CRUD, reload, and
//! conversation management.
//!
//! Every route here sits behind the bearer-token middleware in
//! [`crate::auth::require_admin`].

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use lumen_core::error::LumenError;
use lumen_retrieval::{DocumentInfo, ReloadReport, RetrievalError};
use lumen_storage::{ConversationExport, ConversationListRow};

use crate::error::ApiError;
use crate::state::AppState;

const PROMPT_KEY: &str = "prompt";

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptBody {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentsResponse {
    pub documents: Vec<DocumentInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub document: DocumentInfo,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationsResponse {
    pub total: i64,
    pub conversations: Vec<ConversationListRow>,
}

/// `GET /admin/prompt`
pub async fn get_prompt(State(state): State<AppState>) -> Result<Json<PromptBody>, ApiError> {
    let prompt = state.store.get_setting(PROMPT_KEY)?.unwrap_or_default();
    Ok(Json(PromptBody { prompt }))
}

/// `POST /admin/prompt`
///
/// The new prompt takes effect on the next turn of every conversation.
pub async fn set_prompt(
    State(state): State<AppState>,
    Json(body): Json<PromptBody>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.store.set_setting(PROMPT_KEY, &body.prompt)?;
    info!(length = body.prompt.len(), "System prompt updated");
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

/// `GET /admin/documents`
pub async fn list_documents(State(state): State<AppState>) -> Json<DocumentsResponse> {
    let mut documents = state.retrieval.list_documents();
    documents.sort_by(|a, b| a.name.cmp(&b.name));
    Json(DocumentsResponse { documents })
}

/// `POST /admin/documents` (multipart file upload)
pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        let Some(filename) = field.file_name().map(ToString::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {}", e)))?;

        let document = match state.retrieval.add_document(&filename, &bytes).await {
            Ok(document) => document,
            Err(RetrievalError::Extraction(msg)) => return Err(ApiError::BadRequest(msg)),
            Err(RetrievalError::InvalidName(name)) => {
                return Err(ApiError::BadRequest(format!("invalid document name: {}", name)))
            }
            Err(e) => return Err(LumenError::from(e).into()),
        };
        return Ok(Json(UploadResponse {
            status: "ok".to_string(),
            document,
        }));
    }
    Err(ApiError::BadRequest(
        "multipart body contained no file".to_string(),
    ))
}

/// `DELETE /admin/documents/{name}`
pub async fn delete_document(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .retrieval
        .delete_document(&name)
        .await
        .map_err(LumenError::from)?;
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

/// `POST /admin/reload`
pub async fn reload(State(state): State<AppState>) -> Result<Json<ReloadReport>, ApiError> {
    let report = state.retrieval.reload().await.map_err(LumenError::from)?;
    Ok(Json(report))
}

/// `GET /admin/conversations?limit&offset`
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let (total, conversations) = state.store.list(params.limit, params.offset)?;
    Ok(Json(ConversationsResponse {
        total,
        conversations,
    }))
}

/// `GET /admin/conversations/{id}/download`
pub async fn download_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationExport>, ApiError> {
    let id = parse_conversation_id(&id)?;
    let export = state.store.export(id)?;
    Ok(Json(export))
}

/// `DELETE /admin/conversations/{id}`
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = parse_conversation_id(&id)?;
    state.store.delete(id)?;
    info!(conversation_id = %id, "Conversation deleted by admin");
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

fn parse_conversation_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("conversation {}", raw)))
}
