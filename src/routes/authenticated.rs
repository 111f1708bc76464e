use crate::{AppState, handlers};
use axum::{Router, routing::post};

/// Authenticated Router Module
///
/// Routes that need a logged-in account of any role. The router is wrapped in the
/// `login_required` layer in `create_router`, which turns anonymous requests into a
/// redirect to `/login` before the handler runs.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // POST /post/{id}
        // Adds a comment authored by the current user.
        .route("/post/{id}", post(handlers::add_comment))
}
