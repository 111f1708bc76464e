use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handlers;
pub mod models;
pub mod outcome;
pub mod policy;
pub mod repository;
pub mod session;

// Routing split by access level (public, authenticated, admin).
pub mod routes;
use auth::Principal;
use error::AppError;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use credentials::{CredentialService, CredentialState};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use session::{SessionService, SessionState};

/// ApiDoc
///
/// The OpenAPI document for every route, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_all_posts, handlers::show_post, handlers::add_comment,
        handlers::new_post_form, handlers::create_post, handlers::edit_post_form,
        handlers::update_post, handlers::delete_post, handlers::register_form,
        handlers::register, handlers::login_form, handlers::login, handlers::logout,
        handlers::about, handlers::contact
    ),
    components(
        schemas(
            models::Post, models::Comment, models::Role, models::FieldError,
            models::PostForm, models::RegisterForm, models::LoginForm, models::CommentForm,
        )
    ),
    tags(
        (name = "blog-portal", description = "Blog with posts, comments and accounts")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// The single, immutable container for every service a request may need. Built once in
/// `main` and cloned (cheaply, all members are `Arc`s or plain config) into each request.
#[derive(Clone)]
pub struct AppState {
    /// Persistence: Postgres in production, in-memory for local runs and tests.
    pub repo: RepositoryState,
    /// Live session store and token signer.
    pub sessions: SessionState,
    /// Password hashing.
    pub credentials: CredentialState,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the services from a loaded configuration around the given repository.
    pub fn new(
        config: AppConfig,
        repo: RepositoryState,
    ) -> Result<Self, credentials::CredentialError> {
        let credentials =
            CredentialService::with_cost(config.argon2_memory_kib, config.argon2_iterations)?;
        Ok(Self {
            repo,
            sessions: Arc::new(SessionService::new(
                &config.session_secret,
                config.session_ttl_minutes,
            )),
            credentials: Arc::new(credentials),
            config,
        })
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for SessionState {
    fn from_ref(app_state: &AppState) -> SessionState {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for CredentialState {
    fn from_ref(app_state: &AppState) -> CredentialState {
        app_state.credentials.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// login_required
///
/// Route layer for the authenticated router. An anonymous principal never reaches the
/// handler: it is redirected to `/login` with a notice instead.
async fn login_required(principal: Principal, request: Request, next: Next) -> Response {
    if principal.is_anonymous() {
        return AppError::LoginRequired.into_response();
    }
    next.run(request).await
}

/// create_router
///
/// Assembles the routing tree, applies the scoped and global middleware, and registers
/// the application state.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                login_required,
            )),
        )
        .merge(admin::admin_routes())
        .with_state(state);

    // Observability stack: request id, span per request, id echoed back.
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Opens the per-request span with method, URI and the `x-request-id`, so every log line
/// of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
