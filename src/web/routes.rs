use axum::{
    response::Redirect,
    routing::{any, get},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use super::handlers;
use super::ws::signaling_ws_handler;
use crate::state::AppState;

/// Create the application router.
///
/// With `static_dir`, the headset web client is served under `/static` and
/// `/` redirects to its index page.
pub fn create_router(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ws/signaling", any(signaling_ws_handler));

    if let Some(dir) = static_dir {
        router = router
            .route("/", get(|| async { Redirect::temporary("/static/index.html") }))
            .nest_service("/static", ServeDir::new(dir));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
