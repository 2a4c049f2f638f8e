//! Dual-channel request decoding.
//!
//! A request body is either an HTML form post or a JSON document. The channel
//! is picked once from `Content-Type` and travels with the decoded value so the
//! handler can answer in kind (redirect vs JSON envelope).

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequest, Request},
    http::{HeaderMap, header},
    response::Response,
};
use http_body_util::LengthLimitError;
use serde::de::DeserializeOwned;
use serde_json::error::Category;
use thiserror::Error;

use greenlight_movies::movie::INVALID_RUNTIME_FORMAT;

use crate::app::errors;

/// Largest body either channel will read.
pub const MAX_BODY_BYTES: usize = 1_048_576;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Form,
    Json,
}

impl Channel {
    /// Form iff the declared media type is urlencoded; everything else,
    /// including a missing header, is JSON.
    pub fn of(headers: &HeaderMap) -> Self {
        let media_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::trim);

        match media_type {
            Some(t) if t.eq_ignore_ascii_case(FORM_CONTENT_TYPE) => Channel::Form,
            _ => Channel::Json,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngressError {
    #[error("body contains badly-formed JSON (at character {0})")]
    SyntaxAt(usize),

    #[error("body contains badly-formed JSON")]
    Truncated,

    #[error("body contains incorrect JSON type for field \"{0}\"")]
    FieldType(String),

    #[error("body contains incorrect JSON type (at character {0})")]
    TypeAt(usize),

    #[error("body must not be empty")]
    Empty,

    #[error("body contains unknown key \"{0}\"")]
    UnknownField(String),

    #[error("body must not be larger than {0} bytes")]
    TooLarge(usize),

    #[error("body must only contain a single JSON value")]
    Trailing,

    /// A field decoder refused the value with its own message.
    #[error("{0}")]
    Invalid(String),

    #[error("body contains invalid form data: {0}")]
    Form(String),

    #[error("unable to read request body")]
    Read,
}

/// Decoded request body plus the channel it arrived on.
#[derive(Debug, Clone)]
pub struct Ingress<T>(pub Channel, pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Ingress<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let channel = Channel::of(req.headers());
        let bytes = read_body(req.into_body())
            .await
            .map_err(|e| errors::bad_request(e.to_string()))?;

        let value = match channel {
            Channel::Form => decode_form(&bytes),
            Channel::Json => decode_json(&bytes),
        }
        .map_err(|e| errors::bad_request(e.to_string()))?;

        Ok(Ingress(channel, value))
    }
}

async fn read_body(body: Body) -> Result<axum::body::Bytes, IngressError> {
    axum::body::to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        if e.into_inner().downcast_ref::<LengthLimitError>().is_some() {
            IngressError::TooLarge(MAX_BODY_BYTES)
        } else {
            IngressError::Read
        }
    })
}

pub fn decode_form<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, IngressError> {
    serde_urlencoded::from_bytes(bytes).map_err(|e| IngressError::Form(e.to_string()))
}

/// Strict JSON decode: exactly one value, no unknown keys.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, IngressError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(IngressError::Empty);
    }

    let mut de = serde_json::Deserializer::from_slice(bytes);
    let value: T = serde_path_to_error::deserialize(&mut de).map_err(|err| {
        let field = err.path().to_string();
        let inner = err.into_inner();
        classify(bytes, &inner, &field)
    })?;

    de.end().map_err(|_| IngressError::Trailing)?;
    Ok(value)
}

fn classify(bytes: &[u8], err: &serde_json::Error, field: &str) -> IngressError {
    let at = offset(bytes, err.line(), err.column());

    match err.classify() {
        Category::Eof => IngressError::Truncated,
        Category::Syntax | Category::Io => IngressError::SyntaxAt(at),
        Category::Data => {
            let message = err.to_string();
            if let Some(name) = unknown_field(&message) {
                IngressError::UnknownField(name.to_string())
            } else if message.starts_with(INVALID_RUNTIME_FORMAT) {
                IngressError::Invalid(INVALID_RUNTIME_FORMAT.to_string())
            } else if field.is_empty() || field == "." {
                IngressError::TypeAt(at)
            } else {
                IngressError::FieldType(field.to_string())
            }
        }
    }
}

/// serde reports unknown keys as "unknown field `name`, expected ...".
fn unknown_field(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("unknown field `")?;
    rest.split('`').next()
}

/// Byte offset of a 1-based (line, column) position.
fn offset(bytes: &[u8], line: usize, column: usize) -> usize {
    let preceding: usize = bytes
        .split(|b| *b == b'\n')
        .take(line.saturating_sub(1))
        .map(|l| l.len() + 1)
        .sum();
    preceding + column
}
