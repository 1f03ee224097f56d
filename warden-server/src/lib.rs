//! HTTP/WebSocket surface for the tool-call supervision server.

pub mod routes;
#[cfg(feature = "postgres")]
pub mod store_postgres;
pub mod ws;

pub use routes::{app, AppState};
