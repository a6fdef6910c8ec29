use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use simcheck_core::access::{tokens_match, AccessKind, AccessSigner};
use simcheck_core::config::Config;
use simcheck_core::engine::{CheckOutcome, CheckRequest, Engine, UploadRequest};
use simcheck_core::store::{CorpusStore, FileStore, QueryFilter};
use simcheck_core::{Category, DocId, DocumentStatus, StoredDocument};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine<FileStore>>,
    pub signer: AccessSigner,
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(config: &Config, admin_token: Option<String>) -> Result<Self> {
        let store = FileStore::open(&config.storage.data_dir, config.storage.draft_ttl())?;
        let engine = Engine::new(store, config);
        let signer = AccessSigner::new(config.access.resolve_secret());
        let admin_token = admin_token.filter(|t| !t.is_empty());
        Ok(Self { engine: Arc::new(engine), signer, admin_token })
    }
}

pub fn build_app(config: &Config) -> Result<Router> {
    let state = AppState::new(config, std::env::var("ADMIN_TOKEN").ok())?;
    tracing::info!(data_dir = %config.storage.data_dir.display(), admin = state.admin_token.is_some(), "corpus opened");

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<HeaderValue> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Ok(router(state).layer(cors).layer(TraceLayer::new_for_http()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/categories", get(categories_handler))
        .route("/check", post(check_handler))
        .route(
            "/documents",
            get(list_handler).post(upload_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/documents/:id", get(document_handler).delete(delete_handler))
        .route("/documents/:id/status", patch(status_handler))
        .route("/documents/:id/originality", put(originality_handler))
        .route("/documents/:id/access", get(access_handler))
        .route("/documents/:id/original", get(original_handler))
        .route("/users/:user_id/documents", get(user_documents_handler))
        .with_state(state)
}

/// Error body returned by every handler: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(id: DocId) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("document {id} not found"))
    }
}

impl From<simcheck_core::Error> for ApiError {
    fn from(e: simcheck_core::Error) -> Self {
        use simcheck_core::Error;
        match e {
            Error::InputRejected(msg) => Self::bad_request(msg),
            other => {
                tracing::error!(error = %other, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Run a store call off the async runtime; partition reads are plain file I/O.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> simcheck_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            tracing::error!(error = %e, "blocking task failed");
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

/// Listing view of a document. Content and signature stay on the server.
#[derive(Debug, Serialize)]
pub struct DocumentSummary {
    pub id: DocId,
    pub title: String,
    pub author: Option<String>,
    pub filename: Option<String>,
    pub category: Category,
    pub status: DocumentStatus,
    pub uploaded_at: String,
    pub word_count: usize,
    pub user_id: Option<String>,
    pub institution: Option<String>,
    pub originality_percent: Option<f64>,
    pub has_original: bool,
}

impl From<&StoredDocument> for DocumentSummary {
    fn from(doc: &StoredDocument) -> Self {
        Self {
            id: doc.id,
            title: doc.title.clone(),
            author: doc.author.clone(),
            filename: doc.filename.clone(),
            category: doc.category.clone(),
            status: doc.status,
            uploaded_at: doc.uploaded_at.format(&Rfc3339).unwrap_or_default(),
            word_count: doc.word_count,
            user_id: doc.user_id.clone(),
            institution: doc.institution.clone(),
            originality_percent: doc.originality_percent,
            has_original: doc.file_path.is_some(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub summary: DocumentSummary,
    pub content: String,
    pub shingle_count: usize,
}

pub async fn categories_handler(State(state): State<AppState>) -> ApiResult<Json<Vec<Category>>> {
    let engine = state.engine.clone();
    let cats = blocking(move || engine.store().categories()).await?;
    Ok(Json(cats))
}

#[derive(Debug, Deserialize)]
pub struct CheckBody {
    #[serde(default)]
    pub content: String,
    pub category: Option<String>,
    pub institution: Option<String>,
    pub top_k: Option<usize>,
    pub exclude_user_id: Option<String>,
}

pub async fn check_handler(State(state): State<AppState>, Json(body): Json<CheckBody>) -> ApiResult<Json<CheckOutcome>> {
    let req = CheckRequest {
        content: body.content,
        category: body.category,
        institution: body.institution,
        top_k: body.top_k,
        exclude_user_id: body.exclude_user_id,
    };
    let engine = state.engine.clone();
    let outcome = blocking(move || engine.check(&req)).await?;
    Ok(Json(outcome))
}

pub async fn upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<(StatusCode, Json<DocumentSummary>)> {
    let mut title = String::new();
    let mut content = String::new();
    let mut author = None;
    let mut category = None;
    let mut status = DocumentStatus::Draft;
    let mut user_id = None;
    let mut institution = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::bad_request(e.to_string()))? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or("upload.bin").to_string();
            let bytes = field.bytes().await.map_err(|e| ApiError::bad_request(e.to_string()))?;
            file = Some((filename, bytes.to_vec()));
            continue;
        }
        let value = field.text().await.map_err(|e| ApiError::bad_request(e.to_string()))?;
        match name.as_str() {
            "title" => title = value,
            "content" => content = value,
            "author" => author = Some(value),
            "category" => category = Some(value),
            "status" => status = value.parse().map_err(ApiError::bad_request)?,
            "user_id" => user_id = Some(value),
            "institution" => institution = Some(value),
            other => tracing::debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    let Some((original_filename, file_bytes)) = file else {
        return Err(ApiError::bad_request("file is required"));
    };
    let req = UploadRequest {
        title,
        author,
        category,
        status,
        user_id,
        institution,
        original_filename,
        file_bytes,
        content,
    };
    let engine = state.engine.clone();
    let doc = blocking(move || engine.upload(req)).await?;
    Ok((StatusCode::CREATED, Json(DocumentSummary::from(&doc))))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Comma-separated category labels.
    pub categories: Option<String>,
    pub institution: Option<String>,
    pub exclude_user_id: Option<String>,
    pub owner_id: Option<String>,
    pub status: Option<String>,
}

impl ListParams {
    fn into_filter(self) -> ApiResult<QueryFilter> {
        let categories = self.categories.as_deref().map(|raw| {
            let mut list: Vec<Category> = Vec::new();
            for c in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                let c = Category::sanitize(c);
                if !list.contains(&c) {
                    list.push(c);
                }
            }
            list
        });
        let status = match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Some(s.parse::<DocumentStatus>().map_err(ApiError::bad_request)?),
            None => None,
        };
        Ok(QueryFilter {
            categories: categories.filter(|c| !c.is_empty()),
            institution: nonblank(self.institution),
            exclude_user_id: nonblank(self.exclude_user_id),
            owner_id: nonblank(self.owner_id),
            status,
        })
    }
}

fn nonblank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

async fn list_documents(state: &AppState, filter: QueryFilter) -> ApiResult<Json<Vec<DocumentSummary>>> {
    let engine = state.engine.clone();
    let docs = blocking(move || engine.store().query(&filter)).await?;
    Ok(Json(docs.iter().map(DocumentSummary::from).collect()))
}

pub async fn list_handler(State(state): State<AppState>, Query(params): Query<ListParams>) -> ApiResult<Json<Vec<DocumentSummary>>> {
    let filter = params.into_filter()?;
    list_documents(&state, filter).await
}

pub async fn user_documents_handler(State(state): State<AppState>, Path(user_id): Path<String>) -> ApiResult<Json<Vec<DocumentSummary>>> {
    let filter = QueryFilter { owner_id: Some(user_id), ..QueryFilter::default() };
    list_documents(&state, filter).await
}

async fn fetch(state: &AppState, id: DocId) -> ApiResult<StoredDocument> {
    let engine = state.engine.clone();
    blocking(move || engine.store().get_by_id(id)).await?.ok_or_else(|| ApiError::not_found(id))
}

pub async fn document_handler(State(state): State<AppState>, Path(id): Path<DocId>) -> ApiResult<Json<DocumentDetail>> {
    let doc = fetch(&state, id).await?;
    Ok(Json(DocumentDetail {
        summary: DocumentSummary::from(&doc),
        shingle_count: doc.shingle_count,
        content: doc.content,
    }))
}

pub async fn delete_handler(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<DocId>) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &headers)?;
    let engine = state.engine.clone();
    if !blocking(move || engine.store().delete(id)).await? {
        return Err(ApiError::not_found(id));
    }
    tracing::info!(id, "document deleted");
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
    pub user_id: Option<String>,
}

pub async fn status_handler(State(state): State<AppState>, Path(id): Path<DocId>, Json(body): Json<StatusBody>) -> ApiResult<Json<DocumentSummary>> {
    let status: DocumentStatus = body.status.parse().map_err(ApiError::bad_request)?;
    let doc = fetch(&state, id).await?;
    let caller = nonblank(body.user_id);
    if doc.user_id.is_none() || doc.user_id != caller {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "only the owner can change the status"));
    }
    let engine = state.engine.clone();
    let updated = blocking(move || engine.store().update_status(id, status)).await?.ok_or_else(|| ApiError::not_found(id))?;
    Ok(Json(DocumentSummary::from(&updated)))
}

#[derive(Debug, Deserialize)]
pub struct OriginalityBody {
    pub percent: f64,
}

pub async fn originality_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<DocId>,
    Json(body): Json<OriginalityBody>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &headers)?;
    let engine = state.engine.clone();
    if !blocking(move || engine.store().record_originality(id, body.percent)).await? {
        return Err(ApiError::not_found(id));
    }
    Ok(Json(serde_json::json!({ "id": id, "recorded": true })))
}

#[derive(Debug, Deserialize)]
pub struct AccessParams {
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct AccessLink {
    pub id: DocId,
    pub kind: &'static str,
    pub sig: String,
}

pub async fn access_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<DocId>,
    Query(params): Query<AccessParams>,
) -> ApiResult<Json<AccessLink>> {
    authorize(&state, &headers)?;
    let kind: AccessKind = params.kind.parse().map_err(ApiError::bad_request)?;
    fetch(&state, id).await?;
    Ok(Json(AccessLink { id, kind: kind.as_str(), sig: state.signer.sign(kind, id) }))
}

#[derive(Debug, Deserialize)]
pub struct OriginalParams {
    #[serde(default)]
    pub sig: String,
}

pub async fn original_handler(State(state): State<AppState>, Path(id): Path<DocId>, Query(params): Query<OriginalParams>) -> ApiResult<Response> {
    if !state.signer.verify(AccessKind::Original, id, &params.sig) {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "invalid or missing signature"));
    }
    let doc = fetch(&state, id).await?;
    let Some(path) = doc.file_path.clone() else {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "document has no saved original"));
    };
    let engine = state.engine.clone();
    let bytes = blocking(move || engine.store().read_original(&path)).await?;
    let filename = doc.filename.unwrap_or_else(|| format!("document-{id}"));
    let disposition = format!("attachment; filename=\"{}\"", filename.replace(['"', '\\'], "_"));
    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err(ApiError::new(StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set")),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if tokens_match(provided, required) {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid admin token"))
    }
}
