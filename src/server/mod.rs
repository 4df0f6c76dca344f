//! HTTP server: routes, rate-limit middleware and configuration.
//!
//! Everything here is behind the `server` feature; the library core
//! (gateway, cache, limiter, backends) builds without axum.

pub mod config;
pub mod middleware;
pub mod routes;

pub use config::{Config, Secrets};
pub use routes::{AppState, ApiError, OVERLOAD_MESSAGE, cors_layer, router};
