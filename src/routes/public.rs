use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Read-only pages plus the account gateway (register, login, logout). Handlers here
/// still receive the resolved `Principal` so pages can adapt to the viewer.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        .route("/", get(handlers::get_all_posts))
        // GET /post/{id}
        // POST on the same path lives in the authenticated router; axum merges the two.
        .route("/post/{id}", get(handlers::show_post))
        .route(
            "/register",
            get(handlers::register_form).post(handlers::register),
        )
        // GET /login?forgot=true only shows a notice.
        .route("/login", get(handlers::login_form).post(handlers::login))
        .route("/logout", get(handlers::logout))
        .route("/about", get(handlers::about))
        .route("/contact", get(handlers::contact))
}
