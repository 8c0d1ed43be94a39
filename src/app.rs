use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use axum::{
    Json, Router,
    extract::{OriginalUri, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::Config,
    contacts::{
        AppwriteContactStore,
        Contact,
        ContactPage,
        ContactPatch,
        ContactService,
        ContactStore,
        ImportRecord,
        ImportReport,
        InMemoryContactStore,
        ListOptions,
        NewContact,
        ResetReport,
    },
    db::credential_store::FsCredentialStore,
    errors::AppError,
    events::{EventBroadcaster, JobKind, SessionEvent, push},
    pipeline::BatchProgress,
    session::{SessionRegistry, error::SessionError, handle::SessionState},
    wa::synthetic::SyntheticClient,
};

const EVENT_CAPACITY: usize = 256;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    ready: Arc<AtomicBool>,
    registry: SessionRegistry,
    contacts: ContactService,
}

impl AppState {
    /// Creates a new app state with readiness disabled.
    pub fn new(registry: SessionRegistry, contacts: ContactService) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            registry,
            contacts,
        }
    }

    /// Wires the default runtime: filesystem credentials, the synthetic
    /// protocol client and the configured contact store.
    pub fn from_config(config: &Config) -> Self {
        let credentials = Arc::new(FsCredentialStore::new(config.sessions_dir()));
        let client = match config.synthetic_auto_pair {
            Some(delay) => SyntheticClient::with_auto_pair(delay),
            None => SyntheticClient::new(),
        };
        let registry = SessionRegistry::new(
            config.session.clone(),
            Arc::new(client),
            credentials,
            EventBroadcaster::new(EVENT_CAPACITY),
        );

        let store: Arc<dyn ContactStore> = match &config.appwrite {
            Some(appwrite) => {
                tracing::info!(endpoint = %appwrite.endpoint, "using appwrite contact store");
                Arc::new(AppwriteContactStore::new(appwrite.clone()))
            }
            None => {
                tracing::warn!("appwrite not configured, contacts are kept in memory");
                Arc::new(InMemoryContactStore::new())
            }
        };

        Self::new(registry, ContactService::new(store, config.contacts.clone()))
    }

    /// Sets readiness status.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Returns readiness status.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn contacts(&self) -> &ContactService {
        &self.contacts
    }

    pub fn events(&self) -> &EventBroadcaster {
        self.registry.events()
    }
}

#[derive(Debug, Serialize)]
struct RootResponse {
    name: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
struct ConnectionInfoResponse {
    name: String,
    phone: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    user_id: String,
    qr: Option<String>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<ConnectionInfoResponse>,
    state: SessionState,
    last_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendTextRequest {
    to: String,
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendTextResponse {
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    records: Vec<ImportRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushQuery {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddContactRequest {
    name: String,
    phone: String,
    #[serde(default)]
    school: String,
}

/// Builds the root HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/wa/connect/:user_id", get(connect_handler))
        .route("/wa/status/:user_id", get(status_handler))
        .route("/wa/logout/:user_id", get(logout_handler))
        .route("/wa/send/:user_id", post(send_text_handler))
        .route("/wa/push", get(push_handler))
        .route("/contacts/:user_id", get(list_contacts_handler).post(add_contact_handler))
        .route("/contacts/:user_id/import", post(import_contacts_handler))
        .route("/contacts/:user_id/reset", post(reset_contacts_handler))
        .route(
            "/contacts/item/:id",
            patch(update_contact_handler).delete(delete_contact_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .fallback(not_found_handler)
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(RootResponse {
        name: "blastwarp-api",
        status: "ok",
    })
}

async fn healthz_handler() -> impl IntoResponse {
    Json(HealthResponse { ok: true })
}

async fn readyz_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, Json(HealthResponse { ok: true })).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse { ok: false })).into_response()
    }
}

/// Starts the connection flow in the background; progress arrives through
/// status polling or the push socket.
async fn connect_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::bad_request("user id must not be empty"));
    }

    let registry = state.registry().clone();
    let target = user_id.clone();
    tokio::spawn(async move {
        if let Err(error) = registry.request_connect(&target).await {
            tracing::warn!(user_id = %target, error = %error, "background connect failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: format!("connection started for {user_id}"),
        }),
    ))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let snapshot = state.registry().status(&user_id).await;
    let status = if snapshot.is_connected() {
        "connected"
    } else {
        "disconnected"
    };

    Json(StatusResponse {
        user_id: snapshot.user_id,
        qr: snapshot.qr,
        status,
        info: snapshot.identity.map(|identity| ConnectionInfoResponse {
            name: identity.display_name,
            phone: identity.external_address,
        }),
        state: snapshot.state,
        last_error: snapshot.last_error,
    })
}

/// Replies `{success}` in every case but a malformed id; a failed credential
/// wipe is logged and reported as `success: false`.
async fn logout_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    match state.registry().request_logout(&user_id).await {
        Ok(()) => Ok((StatusCode::OK, Json(SuccessResponse { success: true }))),
        Err(SessionError::InvalidUserId) => Err(SessionError::InvalidUserId.into()),
        Err(error) => {
            tracing::error!(user_id = %user_id, error = %error, "logout failed");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SuccessResponse { success: false }),
            ))
        }
    }
}

async fn send_text_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<SendTextRequest>,
) -> Result<impl IntoResponse, AppError> {
    let message_id = state
        .registry()
        .send_text(&user_id, &request.to, &request.text)
        .await?;
    Ok(Json(SendTextResponse { message_id }))
}

async fn push_handler(
    State(state): State<AppState>,
    Query(query): Query<PushQuery>,
    websocket: WebSocketUpgrade,
) -> impl IntoResponse {
    let registry = state.registry().clone();
    websocket.on_upgrade(move |socket| push::serve_socket(registry, socket, query.user_id))
}

async fn list_contacts_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(options): Query<ListOptions>,
) -> Result<Json<ContactPage>, AppError> {
    Ok(Json(state.contacts().list(&user_id, options).await?))
}

async fn add_contact_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<AddContactRequest>,
) -> Result<(StatusCode, Json<Contact>), AppError> {
    let contact = NewContact::pending(&user_id, &request.name, &request.phone, &request.school);
    let created = state.contacts().add(contact).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_contact_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ContactPatch>,
) -> Result<Json<Contact>, AppError> {
    Ok(Json(state.contacts().update(&id, patch).await?))
}

async fn delete_contact_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.contacts().delete(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn import_contacts_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportReport>, AppError> {
    let events = state.events().clone();
    let report = state
        .contacts()
        .bulk_import(&user_id, request.records, |progress| {
            emit_progress(&events, &user_id, JobKind::Import, progress)
        })
        .await?;
    Ok(Json(report))
}

async fn reset_contacts_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ResetReport>, AppError> {
    let events = state.events().clone();
    let report = state
        .contacts()
        .delete_all(&user_id, |progress| {
            emit_progress(&events, &user_id, JobKind::Reset, progress)
        })
        .await?;
    Ok(Json(report))
}

fn emit_progress(events: &EventBroadcaster, user_id: &str, job: JobKind, progress: &BatchProgress) {
    events.emit(SessionEvent::JobProgress {
        user_id: user_id.trim().to_owned(),
        job,
        percent: progress.percent(),
        processed: progress.processed,
        total: progress.total,
    });
}

async fn not_found_handler(uri: OriginalUri) -> AppError {
    AppError::not_found(format!("route {} not found", uri.0.path()))
}
