use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;

use spine_core::infrastructure_in_memory::InMemoryStore;
use spine_core::session::Session;
use spine_core::transaction::CancelToken;
use spine_core::{
    Config, Credentials, DumpQuery, EntityKey, PrimaryKey, SearchQuery, Spine, SpineResult,
    Transaction, Value,
};

use crate::handlers::*;
use crate::schema::Schema;

pub struct App {
    pub spine: Spine,
    pub module: String,
}

pub type AppState = Arc<App>;

/// Superuser account created at startup.
pub struct Bootstrap {
    pub username: String,
    pub password: String,
}

impl Bootstrap {
    fn principal(&self) -> EntityKey {
        EntityKey::new("person", PrimaryKey::single(self.username.as_str()))
    }
}

pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub storage: String,
    pub config: Config,
    pub schema: Option<Schema>,
    pub bootstrap: Option<Bootstrap>,
    pub max_concurrency: usize,
}

pub async fn run(options: ServeOptions) -> Result<(), String> {
    let spine = create_spine(&options.storage, options.config, options.bootstrap.as_ref())?;
    let module = match &options.schema {
        Some(schema) => {
            schema.register(&spine)?;
            tracing::info!(classes = schema.classes.len(), module = %schema.module, "schema loaded");
            schema.module.clone()
        }
        None => {
            tracing::warn!("no schema given, serving no classes");
            "SpineIDL".to_string()
        }
    };
    spine
        .start_sweepers()
        .map_err(|e| format!("cannot start sweepers: {}", e))?;

    let state: AppState = Arc::new(App { spine, module });
    let app = router(state.clone()).layer(ConcurrencyLimitLayer::new(options.max_concurrency));

    let addr = format!("{}:{}", options.host, options.port);
    tracing::info!("Spine server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("cannot bind {}: {}", addr, e))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("server error: {}", e))?;

    state.spine.stop_sweepers();
    tracing::info!("Spine server stopped");
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/keepalive", post(keep_alive))
        .route("/transactions", post(begin))
        .route("/transactions/{tx}/commit", post(commit))
        .route("/transactions/{tx}/rollback", post(rollback))
        .route("/transactions/{tx}/invoke", post(invoke))
        .route("/transactions/{tx}/create", post(create))
        .route("/transactions/{tx}/delete", post(delete))
        .route("/transactions/{tx}/search", post(search))
        .route("/transactions/{tx}/dump", post(dump))
        .route_layer(middleware::from_fn_with_state(state.clone(), session_middleware));

    Router::new()
        // Open routes
        .route("/health", get(health))
        .route("/login", post(login))
        .route("/interface", get(interface))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

// ─── Session Middleware ─────────────────────────────────────────────────────

/// Resolves the bearer token to a live session and refreshes its deadline.
async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
        .to_string();

    if token.is_empty() {
        tracing::warn!("Missing session token for {}", request.uri().path());
        return Err(ApiError::Unauthorized("missing bearer session id".to_string()));
    }

    let session = state.spine.session(&token)?;
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Runs a blocking core call off the async workers.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> SpineResult<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(data)) => Ok(Json(ApiResponse::ok(data))),
        Ok(Err(err)) => Err(err.into()),
        Err(err) => Err(ApiError::Internal(format!("worker failed: {}", err))),
    }
}

/// Cancels a transaction unless disarmed. Held across the blocking call so
/// a dropped request (client gone) stops the transaction's in-flight work.
struct CancelOnDrop(Option<CancelToken>);

impl CancelOnDrop {
    fn new(token: CancelToken) -> Self {
        Self(Some(token))
    }

    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.0.take() {
            tracing::debug!("request dropped, cancelling transaction");
            token.cancel();
        }
    }
}

/// Runs `f` against an open transaction of the session off the async workers.
pub(crate) async fn in_transaction<T, F>(session: Arc<Session>, tx: u32, f: F) -> ApiResult<T>
where
    F: FnOnce(&Transaction) -> SpineResult<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let tx = session.transaction(tx)?;
    let guard = CancelOnDrop::new(tx.cancel_token().clone());
    let result = blocking(move || f(&tx)).await;
    guard.disarm();
    result
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".to_string(),
        sessions: state.spine.sessions().len(),
        cached_entities: state.spine.cache().len(),
        tracked_locks: state.spine.locks().tracked(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    req.validate().map_err(ApiError::BadRequest)?;
    let mut credentials = Credentials::new(req.username, req.password);
    if let Some(secs) = req.timeout {
        credentials = credentials.timeout(Duration::from_secs(secs));
    }
    blocking(move || {
        let session = state.spine.login(&credentials)?;
        Ok(LoginResponse {
            session_id: session.id().to_string(),
            timeout: session.timeout().as_secs(),
        })
    })
    .await
}

async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
) -> ApiResult<()> {
    blocking(move || state.spine.logout(session.id())).await
}

async fn keep_alive(Extension(session): Extension<Arc<Session>>) -> ApiResult<()> {
    session.keep_alive()?;
    Ok(Json(ApiResponse::ok(())))
}

async fn begin(Extension(session): Extension<Arc<Session>>) -> ApiResult<TransactionResponse> {
    let tx = session.new_transaction()?;
    tracing::debug!(session_id = %session.id(), transaction_id = tx.id(), "transaction opened");
    Ok(Json(ApiResponse::ok(TransactionResponse {
        transaction_id: tx.id(),
    })))
}

async fn commit(
    Extension(session): Extension<Arc<Session>>,
    Path(tx): Path<u32>,
) -> ApiResult<()> {
    in_transaction(session, tx, |tx| tx.commit()).await
}

async fn rollback(
    Extension(session): Extension<Arc<Session>>,
    Path(tx): Path<u32>,
) -> ApiResult<()> {
    in_transaction(session, tx, |tx| tx.rollback()).await
}

async fn invoke(
    Extension(session): Extension<Arc<Session>>,
    Path(tx): Path<u32>,
    Json(req): Json<InvokeRequest>,
) -> ApiResult<Value> {
    in_transaction(session, tx, move |tx| {
        let entity = tx.fetch(&req.class, req.key)?;
        tx.invoke(&entity, &req.method, &req.args)
    })
    .await
}

async fn create(
    Extension(session): Extension<Arc<Session>>,
    Path(tx): Path<u32>,
    Json(req): Json<CreateRequest>,
) -> ApiResult<CreatedResponse> {
    in_transaction(session, tx, move |tx| {
        let entity = tx.create(&req.class, req.values)?;
        Ok(CreatedResponse {
            class: req.class,
            key: entity.key().clone(),
        })
    })
    .await
}

async fn delete(
    Extension(session): Extension<Arc<Session>>,
    Path(tx): Path<u32>,
    Json(req): Json<EntityRequest>,
) -> ApiResult<()> {
    in_transaction(session, tx, move |tx| {
        let entity = tx.fetch(&req.class, req.key)?;
        tx.delete(&entity)
    })
    .await
}

async fn search(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Path(tx): Path<u32>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<Vec<PrimaryKey>> {
    in_transaction(session, tx, move |tx| {
        let mut query = SearchQuery::new(state.spine.class(&req.class)?);
        for predicate in req.predicates {
            query.add(predicate)?;
        }
        tx.search(&query)
    })
    .await
}

async fn dump(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
    Path(tx): Path<u32>,
    Json(req): Json<DumpRequest>,
) -> ApiResult<Vec<spine_core::DumpRow>> {
    in_transaction(session, tx, move |tx| {
        let query = DumpQuery::new(state.spine.class(&req.class)?, req.keys);
        tx.dump(&query)
    })
    .await
}

async fn interface(
    State(state): State<AppState>,
    Query(params): Query<InterfaceParams>,
) -> Result<Response, ApiError> {
    match params.format.as_deref().unwrap_or("json") {
        "json" => Ok(Json(ApiResponse::ok(state.spine.interface(&state.module))).into_response()),
        "idl" => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            state.spine.interface_idl(&state.module, params.docs),
        )
            .into_response()),
        other => Err(ApiError::BadRequest(format!(
            "unknown interface format '{}'. Use 'json' or 'idl'",
            other
        ))),
    }
}

// ─── Storage Backend Selection ──────────────────────────────────────────────

pub fn create_spine(storage: &str, config: Config, bootstrap: Option<&Bootstrap>) -> Result<Spine, String> {
    if storage == "memory" {
        tracing::info!("Storage backend: in-memory (entities will not persist)");
        let store = Arc::new(InMemoryStore::new());
        if let Some(admin) = bootstrap {
            store.add_account(&admin.username, &admin.password, admin.principal());
            store.set_superuser(admin.principal(), true);
            tracing::info!(username = %admin.username, "superuser account created");
        }
        Ok(Spine::with_backend(config, store))
    } else if let Some(path) = storage.strip_prefix("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            use spine_core::infrastructure_sqlite::SqliteStore;

            tracing::info!("Storage backend: SQLite ({})", path);
            let store = SqliteStore::open(path).map_err(|e| format!("cannot open SQLite: {}", e))?;
            if let Some(admin) = bootstrap {
                store
                    .add_account(&admin.username, &admin.password, &admin.principal())
                    .and_then(|()| store.set_superuser(&admin.principal(), true))
                    .map_err(|e| format!("cannot create superuser: {}", e))?;
                tracing::info!(username = %admin.username, "superuser account created");
            }
            Ok(Spine::with_backend(config, Arc::new(store)))
        }
        #[cfg(not(feature = "sqlite"))]
        {
            let _ = (path, config, bootstrap);
            Err("SQLite storage requested but the `sqlite` feature is not enabled. \
                 Rebuild with: cargo build --features sqlite"
                .to_string())
        }
    } else {
        Err(format!(
            "Unknown storage backend: '{}'. Use 'memory' or 'sqlite:<path>'",
            storage
        ))
    }
}
