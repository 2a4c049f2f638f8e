//! Error envelopes.
//!
//! Every failure leaves the API as `{"error": <message or field map>}`. Unrecoverable
//! faults are logged with the request line and answered with a generic message.

use axum::http::{HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use greenlight_core::{DomainError, FieldErrors};

pub const NOT_FOUND: &str = "the requested resource could not be found";
pub const SERVER_ERROR: &str = "the server encountered a problem and could not process your request";
pub const EDIT_CONFLICT: &str = "unable to update the record due to an edit conflict, please try again";
pub const DUPLICATE_EMAIL: &str = "a user with this email address already exists";
pub const INVALID_CREDENTIALS: &str = "invalid authentication credentials";
pub const INVALID_TOKEN: &str = "invalid or missing authentication token";
pub const AUTHENTICATION_REQUIRED: &str = "you must be authenticated to access this resource";
pub const INACTIVE_ACCOUNT: &str = "your user account must be activated to access this resource";
pub const NOT_PERMITTED: &str =
    "your user account doesn't have the necessary permissions to access this resource";

pub fn json_error(status: StatusCode, error: impl Into<Value>) -> Response {
    let error: Value = error.into();
    (status, axum::Json(json!({ "error": error }))).into_response()
}

pub fn bad_request(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, message.into())
}

pub fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, NOT_FOUND)
}

pub async fn not_found_handler() -> Response {
    not_found()
}

pub async fn method_not_allowed(method: Method) -> Response {
    json_error(
        StatusCode::METHOD_NOT_ALLOWED,
        format!("the {method} method is not supported for this resource"),
    )
}

/// `{field: message}` as a JSON object.
pub fn field_map(errors: FieldErrors) -> Value {
    Value::Object(
        errors
            .into_iter()
            .map(|(field, message)| (field, Value::String(message)))
            .collect(),
    )
}

pub fn failed_validation(errors: FieldErrors) -> Response {
    json_error(StatusCode::UNPROCESSABLE_ENTITY, field_map(errors))
}

pub fn edit_conflict() -> Response {
    json_error(StatusCode::CONFLICT, EDIT_CONFLICT)
}

pub fn invalid_credentials() -> Response {
    json_error(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS)
}

pub fn invalid_authentication_token() -> Response {
    let mut response = json_error(StatusCode::UNAUTHORIZED, INVALID_TOKEN);
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

pub fn authentication_required() -> Response {
    json_error(StatusCode::UNAUTHORIZED, AUTHENTICATION_REQUIRED)
}

pub fn inactive_account() -> Response {
    json_error(StatusCode::FORBIDDEN, INACTIVE_ACCOUNT)
}

pub fn not_permitted() -> Response {
    json_error(StatusCode::FORBIDDEN, NOT_PERMITTED)
}

pub fn single_field(field: &str, message: &str) -> FieldErrors {
    FieldErrors::from([(field.to_string(), message.to_string())])
}

/// Log the cause for operators; the client only sees the generic message.
pub fn server_error(method: &Method, uri: &Uri, cause: &dyn core::fmt::Display) -> Response {
    tracing::error!(
        request_method = %method,
        request_url = %uri,
        error = %cause,
        "request failed"
    );
    json_error(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR)
}

/// Default translation of a lifecycle failure. Handlers override the cases
/// they answer differently before falling back to this.
pub fn domain_error_to_response(err: DomainError, method: &Method, uri: &Uri) -> Response {
    match err {
        DomainError::ValidationFailed(errors) => failed_validation(errors),
        DomainError::BadRequest(msg) => bad_request(msg),
        DomainError::RecordNotFound => not_found(),
        DomainError::DuplicateEmail => failed_validation(single_field("email", DUPLICATE_EMAIL)),
        DomainError::EditConflict => edit_conflict(),
        DomainError::InvalidCredentials => invalid_credentials(),
        err @ DomainError::Unrecoverable(_) => server_error(method, uri, &err),
    }
}
