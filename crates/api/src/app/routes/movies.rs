//! Movie catalogue endpoints.
//!
//! Reads need `movies:read`, writes need `movies:write`. The guard is applied
//! per handler so one path can carry both.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    handler::Handler,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use greenlight_auth::permissions::{MOVIES_READ, MOVIES_WRITE};
use greenlight_core::{ExpectedVersion, Validator};
use greenlight_movies::{Filters, MovieId, MovieQuery};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::ingress::Ingress;
use crate::middleware::{PermissionGate, require_permission};

/// Optional request header naming the version a PATCH was based on.
pub const EXPECTED_VERSION_HEADER: &str = "x-expected-version";

pub fn router(services: &Arc<AppServices>) -> Router {
    let read = || {
        from_fn_with_state(
            PermissionGate::new(Arc::clone(services), MOVIES_READ),
            require_permission,
        )
    };
    let write = || {
        from_fn_with_state(
            PermissionGate::new(Arc::clone(services), MOVIES_WRITE),
            require_permission,
        )
    };

    Router::new()
        .route(
            "/v1/movies",
            get(list_movies.layer(read()))
                .post(create_movie.layer(write()))
                .fallback(errors::method_not_allowed),
        )
        .route(
            "/v1/movies/:id",
            get(show_movie.layer(read()))
                .patch(update_movie.layer(write()))
                .delete(delete_movie.layer(write()))
                .fallback(errors::method_not_allowed),
        )
}

pub async fn list_movies(
    Extension(services): Extension<Arc<AppServices>>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut v = Validator::new();
    let defaults = Filters::default();

    let query = MovieQuery {
        title: read_string(&params, "title", ""),
        genres: read_csv(&params, "genres"),
        filters: Filters {
            page: read_int(&params, "page", defaults.page, &mut v),
            page_size: read_int(&params, "page_size", defaults.page_size, &mut v),
            sort: read_string(&params, "sort", &defaults.sort),
        },
    };

    if !v.is_valid() {
        return errors::failed_validation(v.errors().clone());
    }

    match services.movies.list(query).await {
        Ok((movies, metadata)) => Json(dto::movies_envelope(&movies, &metadata)).into_response(),
        Err(e) => errors::domain_error_to_response(e, &method, &uri),
    }
}

pub async fn create_movie(
    Extension(services): Extension<Arc<AppServices>>,
    method: Method,
    uri: Uri,
    Ingress(_, input): Ingress<dto::CreateMovieRequest>,
) -> Response {
    match services.movies.create(input.into()).await {
        Ok(movie) => (
            StatusCode::CREATED,
            [(header::LOCATION, format!("/v1/movies/{}", movie.id))],
            Json(dto::movie_envelope(&movie)),
        )
            .into_response(),
        Err(e) => errors::domain_error_to_response(e, &method, &uri),
    }
}

pub async fn show_movie(
    Extension(services): Extension<Arc<AppServices>>,
    method: Method,
    uri: Uri,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = id.parse::<MovieId>() else {
        return errors::not_found();
    };

    match services.movies.get(id).await {
        Ok(movie) => Json(dto::movie_envelope(&movie)).into_response(),
        Err(e) => errors::domain_error_to_response(e, &method, &uri),
    }
}

pub async fn update_movie(
    Extension(services): Extension<Arc<AppServices>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(id): Path<String>,
    Ingress(_, input): Ingress<dto::UpdateMovieRequest>,
) -> Response {
    let Ok(id) = id.parse::<MovieId>() else {
        return errors::not_found();
    };
    let expected = match expected_version(&headers) {
        Ok(expected) => expected,
        Err(response) => return response,
    };

    match services.movies.update(id, input.into(), expected).await {
        Ok(movie) => Json(dto::movie_envelope(&movie)).into_response(),
        Err(e) => errors::domain_error_to_response(e, &method, &uri),
    }
}

pub async fn delete_movie(
    Extension(services): Extension<Arc<AppServices>>,
    method: Method,
    uri: Uri,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = id.parse::<MovieId>() else {
        return errors::not_found();
    };

    match services.movies.delete(id).await {
        Ok(()) => Json(json!({ "message": "movie successfully deleted" })).into_response(),
        Err(e) => errors::domain_error_to_response(e, &method, &uri),
    }
}

/// No header means any version will do.
fn expected_version(headers: &HeaderMap) -> Result<ExpectedVersion, Response> {
    let Some(value) = headers.get(EXPECTED_VERSION_HEADER) else {
        return Ok(ExpectedVersion::Any);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .map(ExpectedVersion::Exact)
        .ok_or_else(|| errors::bad_request("invalid X-Expected-Version header"))
}

fn read_string(params: &HashMap<String, String>, key: &str, default: &str) -> String {
    params
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn read_csv(params: &HashMap<String, String>, key: &str) -> Vec<String> {
    match params.get(key) {
        Some(raw) if !raw.is_empty() => raw.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Unparseable values record a field error and fall back to `default`.
fn read_int(params: &HashMap<String, String>, key: &str, default: i64, v: &mut Validator) -> i64 {
    match params.get(key).filter(|raw| !raw.is_empty()) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            v.add_error(key, "must be an integer value");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn query_helpers_fall_back_to_defaults() {
        let p = params(&[("title", ""), ("genres", "drama,war"), ("page", "3")]);
        let mut v = Validator::new();

        assert_eq!(read_string(&p, "title", "none"), "none");
        assert_eq!(read_csv(&p, "genres"), vec!["drama", "war"]);
        assert!(read_csv(&p, "missing").is_empty());
        assert_eq!(read_int(&p, "page", 1, &mut v), 3);
        assert_eq!(read_int(&p, "page_size", 20, &mut v), 20);
        assert!(v.is_valid());
    }

    #[test]
    fn non_numeric_page_is_a_field_error() {
        let p = params(&[("page", "two")]);
        let mut v = Validator::new();

        assert_eq!(read_int(&p, "page", 1, &mut v), 1);
        assert_eq!(v.errors()["page"], "must be an integer value");
    }

    #[test]
    fn expected_version_header() {
        assert_eq!(expected_version(&HeaderMap::new()).ok(), Some(ExpectedVersion::Any));

        let mut headers = HeaderMap::new();
        headers.insert(EXPECTED_VERSION_HEADER, HeaderValue::from_static("4"));
        assert_eq!(expected_version(&headers).ok(), Some(ExpectedVersion::Exact(4)));

        headers.insert(EXPECTED_VERSION_HEADER, HeaderValue::from_static("latest"));
        let res = expected_version(&headers).unwrap_err();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
