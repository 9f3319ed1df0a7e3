//! HTTP/WebSocket surface: the client WebSocket session manager, the
//! bearer-protected admin endpoints, and the health probes.

pub mod admin;
pub mod auth;
pub mod error;
pub mod routes;
pub mod session;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
