use std::{collections::HashMap, sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use clipbridge_core::{MAX_CLIPBOARD_BYTES, PayloadBlob};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{info, warn};

pub const MAX_STORED_CLIPBOARDS: usize = 256;
pub const FORM_FIELD_FILE: &str = "file";
pub const FORM_FIELD_DATA: &str = "data";

/// Query parameters addressing one stored clipboard.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Hash)]
pub struct ClipboardKey {
    #[serde(rename = "WOPISrc")]
    pub wopi_src: String,
    #[serde(rename = "ServerId")]
    pub server_id: String,
    #[serde(rename = "ViewId")]
    pub view_id: String,
    #[serde(rename = "Tag")]
    pub tag: String,
}

#[derive(Debug, Deserialize)]
struct ClipboardQuery {
    #[serde(flatten)]
    key: ClipboardKey,
    #[serde(rename = "MimeType")]
    mime_type: Option<String>,
}

#[derive(Debug, Clone)]
enum StoredContent {
    /// Posted as `file`: a decoded payload blob, kept with its encoding.
    Payload { raw: Bytes, blob: PayloadBlob },
    /// Posted as `data`: relayed bytes stored untouched.
    Opaque(Bytes),
}

impl StoredContent {
    fn raw(&self) -> &Bytes {
        match self {
            StoredContent::Payload { raw, .. } => raw,
            StoredContent::Opaque(raw) => raw,
        }
    }

    fn blob(&self) -> Option<PayloadBlob> {
        match self {
            StoredContent::Payload { blob, .. } => Some(blob.clone()),
            StoredContent::Opaque(raw) => PayloadBlob::decode(raw.clone()).ok(),
        }
    }
}

#[derive(Debug)]
struct StoredClipboard {
    content: StoredContent,
    stored_at: Instant,
}

#[derive(Debug, Default)]
struct StoreState {
    clipboards: HashMap<ClipboardKey, StoredClipboard>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<StoreState>>,
    capacity: usize,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_STORED_CLIPBOARDS)
    }

    /// Keeps at most `capacity` clipboards (at least one), evicting the
    /// oldest when a new key arrives.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreState::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.clipboards.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Raw bytes stored under `key`, as they would be served without a
    /// `MimeType` filter.
    pub async fn get(&self, key: &ClipboardKey) -> Option<Bytes> {
        let store = self.inner.read().await;
        store
            .clipboards
            .get(key)
            .map(|entry| entry.content.raw().clone())
    }

    /// Stores `blob` under `key` as if it had been posted in the `file` field.
    pub async fn put_payload(&self, key: ClipboardKey, blob: PayloadBlob) -> Result<(), String> {
        let raw = blob.encode().map_err(|err| err.to_string())?;
        self.insert(key, StoredContent::Payload { raw, blob }).await;
        Ok(())
    }

    async fn insert(&self, key: ClipboardKey, content: StoredContent) {
        let mut store = self.inner.write().await;
        if !store.clipboards.contains_key(&key) && store.clipboards.len() >= self.capacity {
            let oldest = store
                .clipboards
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                info!(wopi_src = %oldest.wopi_src, "evicting oldest clipboard");
                store.clipboards.remove(&oldest);
            }
        }
        store.clipboards.insert(
            key,
            StoredClipboard {
                content,
                stored_at: Instant::now(),
            },
        );
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/clipboard",
            get(get_clipboard_handler).post(post_clipboard_handler),
        )
        .route("/healthz", get(healthz_handler))
        // multipart framing on top of the largest accepted payload
        .layer(DefaultBodyLimit::max(MAX_CLIPBOARD_BYTES + 64 * 1024))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "clipboard store listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({"ok": true, "entries": state.len().await}))
}

async fn get_clipboard_handler(
    State(state): State<AppState>,
    Query(query): Query<ClipboardQuery>,
) -> Response {
    let content = {
        let store = state.inner.read().await;
        match store.clipboards.get(&query.key) {
            Some(entry) => entry.content.clone(),
            None => return (StatusCode::NOT_FOUND, "no clipboard for key").into_response(),
        }
    };

    let Some(mime) = query.mime_type else {
        return octet_stream(content.raw().clone());
    };

    match content.blob().and_then(|blob| {
        blob.get(&mime)
            .map(|part| (part.mime.clone(), part.data.clone()))
    }) {
        Some((mime, data)) => ([(header::CONTENT_TYPE, mime)], data).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("clipboard has no {mime} content"),
        )
            .into_response(),
    }
}

async fn post_clipboard_handler(
    State(state): State<AppState>,
    Query(query): Query<ClipboardQuery>,
    mut multipart: Multipart,
) -> Response {
    let mut content = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                warn!("failed to read multipart field: {err}");
                return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
            }
        };

        let name = field.name().unwrap_or_default().to_owned();
        if name != FORM_FIELD_FILE && name != FORM_FIELD_DATA {
            continue;
        }

        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(field = %name, "failed to read clipboard upload: {err}");
                return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
            }
        };
        if bytes.len() > MAX_CLIPBOARD_BYTES {
            warn!(size = bytes.len(), "dropping oversized clipboard upload");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }

        if name == FORM_FIELD_FILE {
            match PayloadBlob::decode(bytes.clone()) {
                Ok(blob) => content = Some(StoredContent::Payload { raw: bytes, blob }),
                Err(err) => {
                    warn!("rejecting malformed clipboard payload: {err}");
                    return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
                }
            }
        } else {
            content = Some(StoredContent::Opaque(bytes));
        }
    }

    let Some(content) = content else {
        return (
            StatusCode::BAD_REQUEST,
            "expected a `file` or `data` form field",
        )
            .into_response();
    };

    let size = content.raw().len();
    info!(
        wopi_src = %query.key.wopi_src,
        view_id = %query.key.view_id,
        size,
        "stored clipboard"
    );
    state.insert(query.key, content).await;
    StatusCode::OK.into_response()
}

fn octet_stream(data: Bytes) -> Response {
    (
        [(header::CONTENT_TYPE, "application/octet-stream".to_owned())],
        data,
    )
        .into_response()
}
