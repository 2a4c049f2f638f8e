use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde_json::json;

use greenlight_core::DomainError;
use greenlight_infra::{Credentials, Session};

use crate::app::routes::common::{
    self, HOME_VIEW, LOGIN_VIEW, SIGNUP_VIEW, TOKEN_VERIFICATION_VIEW, redirect_with_flash,
    reject_fields,
};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::AuthContext;
use crate::ingress::{Channel, Ingress};

const INVALID_ACTIVATION_TOKEN: &str = "invalid or expired activation token";

/// Form posts under `/user`, JSON under `/v1/users`; both land on the same
/// handlers. A GET on a form path answers the data its view renders.
pub fn router() -> Router {
    Router::new()
        .route("/", get(common::home).fallback(errors::method_not_allowed))
        .route(
            "/user/signup",
            get(common::signup_form)
                .post(register)
                .fallback(errors::method_not_allowed),
        )
        .route("/v1/users", post(register).fallback(errors::method_not_allowed))
        .route(
            "/user/tokenverification",
            get(common::token_verification_form).fallback(errors::method_not_allowed),
        )
        .route("/user/activate", post(activate).fallback(errors::method_not_allowed))
        .route("/v1/users/activated", put(activate).fallback(errors::method_not_allowed))
        .route(
            "/user/login",
            get(common::login_form)
                .post(login)
                .fallback(errors::method_not_allowed),
        )
        .route("/v1/users/login", post(login).fallback(errors::method_not_allowed))
}

/// Routes that need a logged-in caller, activated or not.
pub fn authenticated_router() -> Router {
    Router::new()
        .route("/user/logout", post(logout).fallback(errors::method_not_allowed))
        .route("/v1/users/logout", post(logout).fallback(errors::method_not_allowed))
        .route_layer(axum::middleware::from_fn(crate::middleware::require_authenticated))
}

/// Routes that need an activated caller.
pub fn activated_router() -> Router {
    Router::new()
        .route("/v1/users/me", get(me).fallback(errors::method_not_allowed))
        .route_layer(axum::middleware::from_fn(crate::middleware::require_activated))
}

pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
    method: Method,
    uri: Uri,
    Ingress(channel, input): Ingress<dto::RegisterRequest>,
) -> Response {
    match services.accounts.register(input.into()).await {
        Ok(account) => match channel {
            Channel::Json => (StatusCode::ACCEPTED, Json(dto::user_envelope(&account))).into_response(),
            Channel::Form => redirect_with_flash(
                &session,
                TOKEN_VERIFICATION_VIEW,
                "Your signup was successful. Please check your email for the activation token.",
            ),
        },
        Err(DomainError::ValidationFailed(fields)) => {
            reject_fields(channel, &context, SIGNUP_VIEW, fields)
        }
        Err(DomainError::DuplicateEmail) => reject_fields(
            channel,
            &context,
            SIGNUP_VIEW,
            errors::single_field("email", errors::DUPLICATE_EMAIL),
        ),
        Err(e) => errors::domain_error_to_response(e, &method, &uri),
    }
}

pub async fn activate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
    method: Method,
    uri: Uri,
    Ingress(channel, input): Ingress<dto::ActivateRequest>,
) -> Response {
    let fields = match services.accounts.activate(&input.token).await {
        Ok(account) => {
            return match channel {
                Channel::Json => (StatusCode::OK, Json(dto::user_envelope(&account))).into_response(),
                Channel::Form => redirect_with_flash(
                    &session,
                    LOGIN_VIEW,
                    "Your account has been activated. Please log in.",
                ),
            };
        }
        Err(DomainError::ValidationFailed(fields)) => fields,
        Err(DomainError::RecordNotFound) => errors::single_field("token", INVALID_ACTIVATION_TOKEN),
        Err(DomainError::EditConflict) => errors::single_field("token", errors::EDIT_CONFLICT),
        Err(e) => return errors::domain_error_to_response(e, &method, &uri),
    };

    reject_fields(channel, &context, TOKEN_VERIFICATION_VIEW, fields)
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    Extension(context): Extension<AuthContext>,
    method: Method,
    uri: Uri,
    Ingress(channel, input): Ingress<dto::LoginRequest>,
) -> Response {
    let credentials: Credentials = input.into();

    match services.accounts.login(&credentials, &session).await {
        Ok(outcome) => match channel {
            Channel::Json => (
                StatusCode::OK,
                Json(dto::authentication_token_envelope(&outcome.token)),
            )
                .into_response(),
            Channel::Form => redirect_with_flash(&session, HOME_VIEW, "You are logged in."),
        },
        Err(DomainError::ValidationFailed(fields)) => {
            reject_fields(channel, &context, LOGIN_VIEW, fields)
        }
        Err(DomainError::InvalidCredentials) if channel == Channel::Form => reject_fields(
            channel,
            &context,
            LOGIN_VIEW,
            errors::single_field("credentials", errors::INVALID_CREDENTIALS),
        ),
        Err(e) => errors::domain_error_to_response(e, &method, &uri),
    }
}

pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<Session>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = services.accounts.logout(&session).await {
        return errors::domain_error_to_response(e, &method, &uri);
    }

    match Channel::of(&headers) {
        Channel::Json => Json(json!({ "message": "you have been logged out" })).into_response(),
        Channel::Form => {
            redirect_with_flash(&session, HOME_VIEW, "You've been logged out successfully!")
        }
    }
}

pub async fn me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(context): Extension<AuthContext>,
    method: Method,
    uri: Uri,
) -> Response {
    let Some(account) = context.account() else {
        return errors::authentication_required();
    };

    match services.accounts.permissions_for(account.id).await {
        Ok(permissions) => Json(dto::me_envelope(account, &permissions)).into_response(),
        Err(e) => errors::domain_error_to_response(e, &method, &uri),
    }
}
