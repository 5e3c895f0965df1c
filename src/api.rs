//! HTTP and WebSocket Surface
//!
//! Routes the real-time channel (`/ws`) into the chat hub and exposes the
//! token and file endpoints under `/api`.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::auth::{Authenticator, Identity};
use crate::files::{FileError, FileExchange};
use crate::hub::{Connection, Hub};
use crate::tokens::{TokenService, Verification};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub tokens: Arc<TokenService>,
    pub files: FileExchange,
    pub auth: Arc<dyn Authenticator>,
}

/// Build the application router
pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/ws", get(chat_socket))
        .route("/api/health", get(healthcheck))
        .route("/api/generate-token", post(generate_token))
        .route("/api/verify-token", post(verify_token))
        .route("/api/files", get(list_files).post(upload_file))
        .route("/api/files/:id", get(fetch_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Errors surfaced to HTTP callers as `{"message": ...}`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    InvalidToken(&'static str),
    #[error("File not found")]
    NotFound,
    #[error("Failed to store or load file")]
    Persistence,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Unauthenticated | ApiError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

impl From<FileError> for ApiError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::NotFound(_) => ApiError::NotFound,
            FileError::InvalidRequest(reason) => ApiError::BadRequest(reason.to_string()),
            FileError::Persistence(inner) => {
                log::error!("File persistence failure: {}", inner);
                ApiError::Persistence
            }
        }
    }
}

fn identify(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    state
        .auth
        .authenticate(headers)
        .ok_or(ApiError::Unauthenticated)
}

async fn healthcheck(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.hub.connection_count(),
    }))
}

async fn generate_token(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "token": state.tokens.issue() }))
}

#[derive(Deserialize)]
struct VerifyRequest {
    token: Option<String>,
}

async fn verify_token(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let token = serde_json::from_slice::<VerifyRequest>(&body)
        .ok()
        .and_then(|req| req.token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Token is required".to_string()))?;

    match state.tokens.verify(&token) {
        Verification::Valid => Ok(Json(json!({ "valid": true }))),
        Verification::Unknown => Err(ApiError::InvalidToken("Invalid token")),
        Verification::Expired => Err(ApiError::InvalidToken("Token expired")),
    }
}

#[derive(Deserialize)]
struct UploadRequest {
    name: String,
    data: String,
}

async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identify(&state, &headers)?;
    let request: UploadRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid upload body: {}", e)))?;

    let share = state
        .files
        .upload(&identity, request.name, request.data)
        .await?;
    Ok((StatusCode::CREATED, Json(share)))
}

async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    identify(&state, &headers)?;
    Ok(Json(state.files.list_all().await?))
}

async fn fetch_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    identify(&state, &headers)?;
    let data = state.files.fetch_body(&id).await?;
    Ok(Json(json!({ "data": data })))
}

async fn chat_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, hub))
}

/// Drive one WebSocket connection until either side goes away
async fn serve_socket(socket: WebSocket, hub: Arc<Hub>) {
    let Connection { id, mut frames } = hub.connect();
    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    log::error!("Failed to serialize frame: {}", e);
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_hub = hub.clone();
    let recv_id = id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(WsMessage::Text(text)) => {
                    recv_hub.handle_text(&recv_id, &text);
                }
                Ok(WsMessage::Binary(bytes)) => {
                    recv_hub.handle_bytes(&recv_id, &bytes);
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("WebSocket error on {}: {}", recv_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    hub.disconnect(&id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticKeyAuthenticator;
    use crate::config::UserCredential;
    use crate::files::store::{
        ContentId, ContentStore, MemoryContentStore, MemoryMetadataStore, StoreError,
    };
    use crate::protocol::ServerFrame;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as TungMessage;
    use tower::ServiceExt;

    const KEY: &str = "alice-key";

    fn state_with(content: Arc<dyn ContentStore>) -> AppState {
        AppState {
            hub: Arc::new(Hub::default()),
            tokens: Arc::new(TokenService::new(Duration::from_secs(1800))),
            files: FileExchange::new(Arc::new(MemoryMetadataStore::new()), content),
            auth: Arc::new(StaticKeyAuthenticator::new(&[UserCredential {
                username: "alice".to_string(),
                api_key: KEY.to_string(),
            }])),
        }
    }

    fn test_app() -> Router {
        app(state_with(Arc::new(MemoryContentStore::new())), 1024 * 1024)
    }

    fn request(method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {}", key));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        builder.body(body).unwrap()
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    struct OfflineContentStore;

    #[async_trait]
    impl ContentStore for OfflineContentStore {
        async fn put(&self, _bytes: Vec<u8>) -> Result<ContentId, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        async fn get(&self, _id: &ContentId) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_token_issue_and_verify() {
        let app = test_app();

        let (status, body) = call(&app, request("POST", "/api/generate-token", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            request("POST", "/api/verify-token", None, Some(json!({ "token": token }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "valid": true }));
    }

    #[tokio::test]
    async fn test_verify_token_failures() {
        let app = test_app();

        let (status, body) =
            call(&app, request("POST", "/api/verify-token", None, Some(json!({})))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Token is required");

        let (status, _) = call(&app, request("POST", "/api/verify-token", None, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            request("POST", "/api/verify-token", None, Some(json!({ "token": "nope" }))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid token");
    }

    #[tokio::test]
    async fn test_file_routes_require_identity() {
        let app = test_app();
        for req in [
            request("GET", "/api/files", None, None),
            request("GET", "/api/files/abc", Some("wrong"), None),
            request(
                "POST",
                "/api/files",
                None,
                Some(json!({ "name": "a", "data": "b" })),
            ),
        ] {
            let (status, body) = call(&app, req).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["message"], "Not authenticated");
        }
    }

    #[tokio::test]
    async fn test_upload_list_fetch() {
        let app = test_app();
        let envelope = crate::crypto::envelope::encode(b"file body").unwrap();

        let (status, share) = call(
            &app,
            request(
                "POST",
                "/api/files",
                Some(KEY),
                Some(json!({ "name": "notes.txt", "data": envelope })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(share["username"], "alice");
        assert_eq!(share["data"], envelope.as_str());
        let id = share["id"].as_str().unwrap().to_string();

        let (status, listed) = call(&app, request("GET", "/api/files", Some(KEY), None)).await;
        assert_eq!(status, StatusCode::OK);
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["id"], id.as_str());
        assert!(listed[0].get("data").is_none());

        let (status, body) = call(
            &app,
            request("GET", &format!("/api/files/{}", id), Some(KEY), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], envelope.as_str());
    }

    #[tokio::test]
    async fn test_fetch_unknown_file() {
        let app = test_app();
        let (status, body) = call(
            &app,
            request("GET", "/api/files/does-not-exist", Some(KEY), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "File not found");
    }

    #[tokio::test]
    async fn test_upload_bad_body_and_store_failure() {
        let app = test_app();
        let (status, _) = call(
            &app,
            request("POST", "/api/files", Some(KEY), Some(json!({ "name": "x" }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let app = app_with_offline_store();
        let (status, body) = call(
            &app,
            request(
                "POST",
                "/api/files",
                Some(KEY),
                Some(json!({ "name": "x", "data": "AAAA" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to store or load file");
    }

    fn app_with_offline_store() -> Router {
        app(state_with(Arc::new(OfflineContentStore)), 1024 * 1024)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&test_app(), request("GET", "/api/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
    }

    async fn next_frame<S>(stream: &mut S) -> ServerFrame
    where
        S: futures_util::Stream<Item = Result<TungMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let TungMessage::Text(text) = message {
                return ServerFrame::from_json(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_chat_flow() {
        let state = state_with(Arc::new(MemoryContentStore::new()));
        let hub = state.hub.clone();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(state, 1024 * 1024)).await.unwrap();
        });

        let url = format!("ws://{}/ws", addr);
        let (mut alice, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (mut bob, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        assert_eq!(
            next_frame(&mut alice).await,
            ServerFrame::History { messages: vec![] }
        );
        assert_eq!(
            next_frame(&mut bob).await,
            ServerFrame::History { messages: vec![] }
        );

        alice
            .send(TungMessage::Text("garbage".to_string()))
            .await
            .unwrap();
        assert!(matches!(
            next_frame(&mut alice).await,
            ServerFrame::Error { .. }
        ));

        let frame = json!({
            "type": "chat",
            "username": "alice",
            "content": "hello",
            "encrypted": false,
        });
        alice
            .send(TungMessage::Text(frame.to_string()))
            .await
            .unwrap();

        for socket in [&mut alice, &mut bob] {
            match next_frame(socket).await {
                ServerFrame::Message { message } => {
                    assert_eq!(message.username, "alice");
                    assert_eq!(message.content, "hello");
                }
                other => panic!("unexpected frame: {:?}", other),
            }
        }

        bob.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.connection_count() != 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
