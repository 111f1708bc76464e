use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Admin Router Module
///
/// Post creation, editing and deletion. Every handler calls `policy::require_admin`
/// first, so a member or anonymous visitor gets 403 and nothing is written.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/new-post",
            get(handlers::new_post_form).post(handlers::create_post),
        )
        .route(
            "/edit-post/{id}",
            get(handlers::edit_post_form).post(handlers::update_post),
        )
        // GET /delete/{id}
        // Deletes the post and all of its comments.
        .route("/delete/{id}", get(handlers::delete_post))
}
