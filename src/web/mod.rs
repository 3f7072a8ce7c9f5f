//! HTTP surface: signaling WebSocket, health check and the optional static client

mod handlers;
mod routes;
mod ws;

pub use handlers::HealthResponse;
pub use routes::create_router;
pub use ws::signaling_ws_handler;
