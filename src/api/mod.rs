// This module is only compiled with the `web` feature.
// All submodules use axum/tower-http.

pub mod routes;
pub mod server;

pub use server::{build_router, start_server, AppState, SessionRegistry};
