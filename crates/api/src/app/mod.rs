//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, mailer, sessions, movies and the shutdown tracker
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON envelopes
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    routes::router(&services)
        .fallback(errors::not_found_handler)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    Arc::clone(&services),
                    middleware::load_and_save,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    Arc::clone(&services),
                    middleware::authenticate,
                ))
                .layer(Extension(services)),
        )
}

pub use services::AppServices;
