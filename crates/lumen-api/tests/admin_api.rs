//! Integration tests for the HTTP surface: health, admin auth, prompt,
//! documents, reload, and conversation management. Each test builds an
//! independent state with an in-memory store and a scripted LLM.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

use lumen_api::admin::{
    ConversationsResponse, DocumentsResponse, PromptBody, StatusResponse, UploadResponse,
};
use lumen_api::{create_router, AppState};
use lumen_core::config::Config;
use lumen_core::types::{Emotion, Role};
use lumen_engine::ConversationEngine;
use lumen_llm::{LlmGateway, MockProvider};
use lumen_retrieval::{Chunker, HashEmbedding, ReloadReport, RetrievalStore};
use lumen_storage::{ConversationExport, ConversationStore, Database, NewMessage};

const ADMIN_TOKEN: &str = "admin-token-12345";

struct TestApp {
    state: AppState,
    docs_dir: tempfile::TempDir,
    _index_dir: tempfile::TempDir,
}

fn make_app() -> TestApp {
    let mut vars = HashMap::new();
    vars.insert("CHAT_API_KEY".to_string(), "chat-key".to_string());
    vars.insert("ADMIN_API_KEY".to_string(), ADMIN_TOKEN.to_string());
    let config = Arc::new(Config::from_vars(&vars).unwrap());

    let store = Arc::new(ConversationStore::new(Arc::new(
        Database::in_memory().unwrap(),
    )));
    let docs_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    let retrieval = Arc::new(
        RetrievalStore::open(
            Arc::new(HashEmbedding::new()),
            docs_dir.path(),
            index_dir.path(),
            Chunker::new(500, 50),
            0.0,
        )
        .unwrap(),
    );
    let gateway = Arc::new(MockProvider::scripted(["ok"])) as Arc<dyn LlmGateway>;
    let engine = Arc::new(ConversationEngine::new(
        Arc::clone(&store),
        Arc::clone(&retrieval),
        gateway,
        Arc::clone(&config),
    ));

    let state = AppState::new(config, store, retrieval, engine, CancellationToken::new());
    TestApp {
        state,
        docs_dir,
        _index_dir: index_dir,
    }
}

fn router(app: &TestApp) -> axum::Router {
    create_router(app.state.clone())
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
        .body(Body::empty())
        .unwrap()
}

fn authed_post_json(uri: &str, json: &str) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn authed_post_empty(uri: &str) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
        .body(Body::empty())
        .unwrap()
}

fn authed_delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
        .body(Body::empty())
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// Health (public)
// =============================================================================

#[tokio::test]
async fn test_health_endpoints_public() {
    let app = make_app();
    for uri in ["/health", "/healthz"] {
        let resp = router(&app)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "uri: {}", uri);
        let body: serde_json::Value = body_json(resp).await;
        assert_eq!(body["status"], "ok");
    }
}

// =============================================================================
// Admin auth
// =============================================================================

#[tokio::test]
async fn test_admin_requires_token() {
    let app = make_app();
    let resp = router(&app)
        .oneshot(Request::get("/admin/prompt").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_rejects_wrong_token() {
    let app = make_app();
    let resp = router(&app)
        .oneshot(
            Request::get("/admin/prompt")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_rejects_non_bearer_scheme() {
    let app = make_app();
    let resp = router(&app)
        .oneshot(
            Request::get("/admin/prompt")
                .header("authorization", format!("Basic {}", ADMIN_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Prompt
// =============================================================================

#[tokio::test]
async fn test_prompt_get_default_empty() {
    let app = make_app();
    let resp = router(&app).oneshot(authed_get("/admin/prompt")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: PromptBody = body_json(resp).await;
    assert_eq!(body.prompt, "");
}

#[tokio::test]
async fn test_prompt_set_and_get_round_trip() {
    let app = make_app();
    let resp = router(&app)
        .oneshot(authed_post_json(
            "/admin/prompt",
            r#"{"prompt":"You are terse."}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: StatusResponse = body_json(resp).await;
    assert_eq!(body.status, "ok");

    let resp = router(&app).oneshot(authed_get("/admin/prompt")).await.unwrap();
    let body: PromptBody = body_json(resp).await;
    assert_eq!(body.prompt, "You are terse.");
}

// =============================================================================
// Documents
// =============================================================================

#[tokio::test]
async fn test_documents_list_empty() {
    let app = make_app();
    let resp = router(&app)
        .oneshot(authed_get("/admin/documents"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: DocumentsResponse = body_json(resp).await;
    assert!(body.documents.is_empty());
}

fn multipart_upload(uri: &str, filename: &str, content: &str) -> Request<Body> {
    let boundary = "lumen-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         {content}\r\n\
         --{boundary}--\r\n"
    );
    Request::post(uri)
        .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_document_upload_then_listed() {
    let app = make_app();
    let resp = router(&app)
        .oneshot(multipart_upload(
            "/admin/documents",
            "docA.txt",
            "Paris is the capital of France",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: UploadResponse = body_json(resp).await;
    assert_eq!(body.document.name, "docA.txt");
    assert!(body.document.chunk_count >= 1);

    let resp = router(&app)
        .oneshot(authed_get("/admin/documents"))
        .await
        .unwrap();
    let body: DocumentsResponse = body_json(resp).await;
    assert_eq!(body.documents.len(), 1);
    assert_eq!(body.documents[0].name, "docA.txt");

    // The file landed in the documents folder.
    assert!(app.docs_dir.path().join("docA.txt").exists());
}

#[tokio::test]
async fn test_document_upload_unsupported_format_rejected() {
    let app = make_app();
    let resp = router(&app)
        .oneshot(multipart_upload("/admin/documents", "image.png", "bytes"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_document_delete() {
    let app = make_app();
    router(&app)
        .oneshot(multipart_upload("/admin/documents", "gone.txt", "temp"))
        .await
        .unwrap();

    let resp = router(&app)
        .oneshot(authed_delete("/admin/documents/gone.txt"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = router(&app)
        .oneshot(authed_get("/admin/documents"))
        .await
        .unwrap();
    let body: DocumentsResponse = body_json(resp).await;
    assert!(body.documents.is_empty());
}

#[tokio::test]
async fn test_document_delete_missing_is_404() {
    let app = make_app();
    let resp = router(&app)
        .oneshot(authed_delete("/admin/documents/never.txt"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reload_picks_up_folder_changes() {
    let app = make_app();
    std::fs::write(
        app.docs_dir.path().join("fresh.txt"),
        "newly dropped document",
    )
    .unwrap();

    let resp = router(&app)
        .oneshot(authed_post_empty("/admin/reload"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let report: ReloadReport = body_json(resp).await;
    assert_eq!(report.ingested, 1);

    // Second reload with no changes is a no-op.
    let resp = router(&app)
        .oneshot(authed_post_empty("/admin/reload"))
        .await
        .unwrap();
    let report: ReloadReport = body_json(resp).await;
    assert_eq!(report.ingested, 0);
    assert_eq!(report.unchanged, 1);
}

// =============================================================================
// Conversations
// =============================================================================

fn seed_conversation(state: &AppState) -> Uuid {
    let conv = state.store.create_conversation().unwrap();
    state
        .store
        .append_message(conv, &NewMessage::user("hello"))
        .unwrap();
    state
        .store
        .append_message(
            conv,
            &NewMessage::assistant("hi there", Emotion::Happy, vec![], Uuid::new_v4()),
        )
        .unwrap();
    conv
}

#[tokio::test]
async fn test_conversations_list_with_pagination() {
    let app = make_app();
    for _ in 0..3 {
        seed_conversation(&app.state);
    }

    let resp = router(&app)
        .oneshot(authed_get("/admin/conversations?limit=2&offset=0"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: ConversationsResponse = body_json(resp).await;
    assert_eq!(body.total, 3);
    assert_eq!(body.conversations.len(), 2);
    assert_eq!(body.conversations[0].message_count, 2);
}

#[tokio::test]
async fn test_conversation_download() {
    let app = make_app();
    let conv = seed_conversation(&app.state);

    let resp = router(&app)
        .oneshot(authed_get(&format!(
            "/admin/conversations/{}/download",
            conv
        )))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let export: ConversationExport = body_json(resp).await;
    assert_eq!(export.id, conv);
    assert_eq!(export.messages.len(), 2);
    assert_eq!(export.messages[0].role, Role::User);
    assert_eq!(export.messages[0].content, "hello");
    assert_eq!(export.messages[1].content, "hi there");
}

#[tokio::test]
async fn test_conversation_download_missing_is_404() {
    let app = make_app();
    let resp = router(&app)
        .oneshot(authed_get(&format!(
            "/admin/conversations/{}/download",
            Uuid::new_v4()
        )))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_conversation_delete() {
    let app = make_app();
    let conv = seed_conversation(&app.state);

    let resp = router(&app)
        .oneshot(authed_delete(&format!("/admin/conversations/{}", conv)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(app.state.store.get(conv).unwrap().is_none());

    let resp = router(&app)
        .oneshot(authed_delete(&format!("/admin/conversations/{}", conv)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_conversation_delete_garbage_id_is_404() {
    let app = make_app();
    let resp = router(&app)
        .oneshot(authed_delete("/admin/conversations/not-a-uuid"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
