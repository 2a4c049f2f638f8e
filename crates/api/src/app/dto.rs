use serde::Deserialize;
use serde_json::{Value, json};

use greenlight_auth::{Account, Permissions, Token};
use greenlight_infra::{Credentials, Registration};
use greenlight_movies::{Metadata, Movie, MoviePatch, NewMovie, Runtime};

// -------------------------
// Request DTOs
// -------------------------
//
// Missing fields decode as empty strings so validation, not decoding, reports
// them. Unknown fields are a decode failure on both channels.

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password2: String,
}

impl From<RegisterRequest> for Registration {
    fn from(req: RegisterRequest) -> Self {
        Registration {
            name: req.name,
            email: req.email,
            password: req.password,
            password_confirmation: req.password2,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivateRequest {
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl From<LoginRequest> for Credentials {
    fn from(req: LoginRequest) -> Self {
        Credentials {
            email: req.email,
            password: req.password,
        }
    }
}

/// Missing fields decode to zero values; validation reports them.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreateMovieRequest {
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    pub genres: Vec<String>,
}

impl From<CreateMovieRequest> for NewMovie {
    fn from(req: CreateMovieRequest) -> Self {
        NewMovie {
            title: req.title,
            year: req.year,
            runtime: req.runtime,
            genres: req.genres,
        }
    }
}

/// Absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMovieRequest {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<Runtime>,
    pub genres: Option<Vec<String>>,
}

impl From<UpdateMovieRequest> for MoviePatch {
    fn from(req: UpdateMovieRequest) -> Self {
        MoviePatch {
            title: req.title,
            year: req.year,
            runtime: req.runtime,
            genres: req.genres,
        }
    }
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn user_envelope(account: &Account) -> Value {
    json!({ "user": account })
}

pub fn authentication_token_envelope(token: &Token) -> Value {
    json!({ "authentication_token": token })
}

pub fn me_envelope(account: &Account, permissions: &Permissions) -> Value {
    json!({
        "user": account,
        "permissions": permissions,
    })
}

pub fn movie_envelope(movie: &Movie) -> Value {
    json!({ "movie": movie })
}

pub fn movies_envelope(movies: &[Movie], metadata: &Metadata) -> Value {
    json!({
        "movies": movies,
        "metadata": metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password2_becomes_the_confirmation() {
        let registration: Registration = RegisterRequest {
            name: "Ann".into(),
            email: "ann@x.com".into(),
            password: "longenough1".into(),
            password2: "longenough2".into(),
        }
        .into();

        assert_eq!(registration.password_confirmation, "longenough2");
    }

    #[test]
    fn missing_password2_is_an_empty_confirmation() {
        let req: RegisterRequest =
            serde_json::from_str(r#"{"name":"Ann","email":"ann@x.com","password":"longenough1"}"#)
                .unwrap();
        let registration: Registration = req.into();

        assert_eq!(registration.password_confirmation, "");
    }

    #[test]
    fn movie_update_leaves_absent_fields_unset() {
        let req: UpdateMovieRequest = serde_json::from_str(r#"{"runtime":"105 mins"}"#).unwrap();
        let patch: MoviePatch = req.into();

        assert_eq!(patch.runtime, Some(Runtime(105)));
        assert_eq!(patch.title, None);
        assert_eq!(patch.genres, None);
    }

    #[test]
    fn register_request_rejects_unknown_fields() {
        let err = serde_json::from_str::<RegisterRequest>(r#"{"name":"Ann","admin":true}"#);
        assert!(err.is_err());
    }
}
