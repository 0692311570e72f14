//! # alarmd gateway
//!
//! HTTP surface of the provider:
//! - `GET /ping`, `GET /health`, `GET /active?active=true|false`
//! - `POST /triggers`, `GET|PUT|DELETE /triggers/{namespace}/{name}`

pub mod auth;
pub mod crud;
pub mod routes;
pub mod server;
pub mod system;

pub use server::{AppState, build_router, start_server};
