use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;

use greenlight_core::FieldErrors;
use greenlight_infra::Session;
use greenlight_infra::session::FLASH_KEY;

use crate::app::errors;
use crate::context::AuthContext;
use crate::ingress::Channel;

// Form views, rendered outside this service.
pub const HOME_VIEW: &str = "/";
pub const SIGNUP_VIEW: &str = "/user/signup";
pub const TOKEN_VERIFICATION_VIEW: &str = "/user/tokenverification";
pub const LOGIN_VIEW: &str = "/user/login";

/// What a page renderer needs to draw one of the form views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewData {
    pub view: &'static str,
    pub is_authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<String>,
    #[serde(skip_serializing_if = "FieldErrors::is_empty")]
    pub form_errors: FieldErrors,
}

impl ViewData {
    pub fn new(view: &'static str, context: &AuthContext) -> Self {
        Self {
            view,
            is_authenticated: !context.is_anonymous(),
            flash: None,
            form_errors: FieldErrors::new(),
        }
    }
}

/// Answer field errors on the channel the request came in on: a 422 error
/// envelope for JSON, or a 422 view for the form to re-render with. The
/// session is left alone either way.
pub fn reject_fields(
    channel: Channel,
    context: &AuthContext,
    form_view: &'static str,
    fields: FieldErrors,
) -> Response {
    match channel {
        Channel::Json => errors::failed_validation(fields),
        Channel::Form => {
            let view = ViewData {
                form_errors: fields,
                ..ViewData::new(form_view, context)
            };
            (StatusCode::UNPROCESSABLE_ENTITY, Json(view)).into_response()
        }
    }
}

/// 303 to `view` with a one-shot notice for the next render.
pub fn redirect_with_flash(session: &Session, view: &'static str, flash: &str) -> Response {
    session.put(FLASH_KEY, flash);
    Redirect::to(view).into_response()
}

/// View data for `view`, consuming any pending flash.
fn render(view: &'static str, context: &AuthContext, session: &Session) -> Response {
    Json(ViewData {
        flash: session.pop_string(FLASH_KEY),
        ..ViewData::new(view, context)
    })
    .into_response()
}

pub async fn home(
    Extension(context): Extension<AuthContext>,
    Extension(session): Extension<Session>,
) -> Response {
    render(HOME_VIEW, &context, &session)
}

pub async fn signup_form(
    Extension(context): Extension<AuthContext>,
    Extension(session): Extension<Session>,
) -> Response {
    render(SIGNUP_VIEW, &context, &session)
}

pub async fn token_verification_form(
    Extension(context): Extension<AuthContext>,
    Extension(session): Extension<Session>,
) -> Response {
    render(TOKEN_VERIFICATION_VIEW, &context, &session)
}

pub async fn login_form(
    Extension(context): Extension<AuthContext>,
    Extension(session): Extension<Session>,
) -> Response {
    render(LOGIN_VIEW, &context, &session)
}
