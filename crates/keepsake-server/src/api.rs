use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{header, Method, StatusCode},
    middleware,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use keepsake_store::Capsule;

use crate::auth::{auth_middleware, CallerUid, TokenVerifier};
use crate::config::ServerConfig;
use crate::controller::{CapsuleController, CapsuleDraft, ParticipantsField, StagedFile};
use crate::error::ApiError;
use crate::media::MediaStore;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<CapsuleController>,
    pub media: Arc<MediaStore>,
    pub verifier: TokenVerifier,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let capsules = Router::new()
        .route("/create", post(create_capsule))
        .route("/list", get(list_capsules))
        .route("/get/:id", get(get_capsule))
        .route("/update/:id", put(update_capsule))
        .route("/delete/:id", delete(delete_capsule))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/media/:name", get(media_download))
        .nest("/capsules", capsules)
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    name: String,
    version: &'static str,
}

/// A capsule as sent over the wire: the stored document plus the derived
/// `isLocked` view, computed at render time and never persisted.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CapsuleResponse {
    #[serde(flatten)]
    capsule: Capsule,
    is_locked: bool,
}

impl From<Capsule> for CapsuleResponse {
    fn from(capsule: Capsule) -> Self {
        let is_locked = capsule.is_locked(Utc::now());
        Self { capsule, is_locked }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn create_capsule(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerUid>,
    req: Request,
) -> Result<(StatusCode, Json<CapsuleResponse>), ApiError> {
    let (draft, files) = read_capsule_request(&state, req).await?;
    let input = draft.into_create_input(files)?;

    let capsule = state.controller.create(&caller.0, input).await?;
    Ok((StatusCode::CREATED, Json(capsule.into())))
}

async fn list_capsules(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerUid>,
) -> Result<Json<Vec<CapsuleResponse>>, ApiError> {
    let capsules = state.controller.list(&caller.0).await?;
    Ok(Json(capsules.into_iter().map(Into::into).collect()))
}

/// Capsule ids are opaque to callers: anything that does not name a stored
/// capsule, including a string that is not a UUID at all, is a not-found.
fn parse_capsule_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Capsule not found".to_string()))
}

async fn get_capsule(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerUid>,
    Path(id): Path<String>,
) -> Result<Json<CapsuleResponse>, ApiError> {
    let id = parse_capsule_id(&id)?;
    let capsule = state.controller.get(&caller.0, id).await?;
    Ok(Json(capsule.into()))
}

async fn update_capsule(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerUid>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Json<CapsuleResponse>, ApiError> {
    let id = parse_capsule_id(&id)?;
    let (draft, files) = read_capsule_request(&state, req).await?;
    let input = draft.into_update_input(files)?;

    let capsule = state.controller.update(&caller.0, id, input).await?;
    Ok(Json(capsule.into()))
}

async fn delete_capsule(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerUid>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_capsule_id(&id)?;
    state.controller.delete(&caller.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn media_download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<([(header::HeaderName, &'static str); 1], Vec<u8>), ApiError> {
    let (data, content_type) = state.media.open(&name).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], data))
}

// ---------------------------------------------------------------------------
// Request body parsing
// ---------------------------------------------------------------------------

/// Create and Update accept either a JSON body or a multipart form with
/// optional `files` parts. Both shapes reduce to a [`CapsuleDraft`] plus the
/// staged files.
async fn read_capsule_request(
    state: &AppState,
    req: Request,
) -> Result<(CapsuleDraft, Vec<StagedFile>), ApiError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::Validation(format!("Multipart error: {}", e)))?;
        read_multipart(state, multipart).await
    } else {
        let Json(draft) = Json::<CapsuleDraft>::from_request(req, &())
            .await
            .map_err(|e| ApiError::Validation(format!("Invalid JSON body: {}", e)))?;
        Ok((draft, Vec::new()))
    }
}

async fn read_multipart(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<(CapsuleDraft, Vec<StagedFile>), ApiError> {
    let mut draft = CapsuleDraft::default();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "title" => draft.title = Some(read_text_field(field).await?),
            "description" => draft.description = Some(read_text_field(field).await?),
            "openAt" | "openDate" => draft.open_at = Some(read_text_field(field).await?),
            "participants" => {
                draft.participants =
                    Some(ParticipantsField::Raw(read_text_field(field).await?));
            }
            "files" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let data = field.bytes().await.map_err(|e| {
                    ApiError::Validation(format!("Failed to read file field: {}", e))
                })?;

                let path = state
                    .config
                    .upload_tmp_path
                    .join(format!("stage-{}", Uuid::new_v4()));
                tokio::fs::write(&path, &data)
                    .await
                    .map_err(|e| ApiError::Internal(format!("Failed to stage upload: {}", e)))?;

                info!(name = %file_name, size = data.len(), "Staged uploaded file");
                files.push(StagedFile { path, file_name });
            }
            // Unknown fields are ignored, same as unknown JSON keys.
            _ => {}
        }
    }

    Ok((draft, files))
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("Failed to read form field: {}", e)))
}

// ---------------------------------------------------------------------------
// Server entry
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
