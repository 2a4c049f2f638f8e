use std::sync::Arc;

use axum::{Router, routing::get};

use crate::app::errors;
use crate::app::services::AppServices;

pub mod common;
pub mod movies;
pub mod system;
pub mod tokens;
pub mod users;

/// Every route the service answers.
pub fn router(services: &Arc<AppServices>) -> Router {
    Router::new()
        .route(
            "/v1/healthcheck",
            get(system::healthcheck).fallback(errors::method_not_allowed),
        )
        .merge(users::router())
        .merge(users::authenticated_router())
        .merge(users::activated_router())
        .merge(tokens::router())
        .merge(movies::router(services))
}
