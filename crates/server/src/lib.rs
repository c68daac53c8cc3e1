//! HTTP front end for the forecast model lifecycle service

pub mod api;
pub mod config;

pub use api::{create_router, serve, AppState, ErrorResponse};
pub use config::ServerConfig;
