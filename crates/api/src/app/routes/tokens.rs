use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
};

use greenlight_infra::Credentials;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::ingress::Ingress;

pub fn router() -> Router {
    Router::new().route(
        "/v1/tokens/authentication",
        post(create_authentication_token).fallback(errors::method_not_allowed),
    )
}

/// Stateless login: trade credentials for a bearer token. The session is not
/// touched.
pub async fn create_authentication_token(
    Extension(services): Extension<Arc<AppServices>>,
    method: Method,
    uri: Uri,
    Ingress(_, input): Ingress<dto::LoginRequest>,
) -> Response {
    let credentials: Credentials = input.into();

    match services.accounts.issue_authentication_token(&credentials).await {
        Ok(token) => (
            StatusCode::CREATED,
            Json(dto::authentication_token_envelope(&token)),
        )
            .into_response(),
        Err(e) => errors::domain_error_to_response(e, &method, &uri),
    }
}
