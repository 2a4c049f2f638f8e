use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use greenlight_core::validator::unique;
use greenlight_core::{DomainError, Entity, Validator};

pub const MAX_TITLE_BYTES: usize = 500;
pub const MAX_GENRES: usize = 5;

/// Earliest year a film can have been released in.
pub const FIRST_RELEASE_YEAR: i32 = 1888;

/// Decode failure message for a malformed `runtime` value.
pub const INVALID_RUNTIME_FORMAT: &str = "invalid runtime format";

/// Movie identifier, assigned by the row store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovieId(i64);

impl MovieId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for MovieId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Path segments parse to positive ids only.
impl core::str::FromStr for MovieId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<i64>() {
            Ok(id) if id >= 1 => Ok(Self(id)),
            _ => Err(DomainError::bad_request("invalid id parameter")),
        }
    }
}

/// Running time in minutes. On the wire it is the string `"<n> mins"`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Runtime(pub i32);

impl Runtime {
    pub fn minutes(&self) -> i32 {
        self.0
    }

    fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{} mins", self.0))
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_runtime(&raw)
            .map(Runtime)
            .ok_or_else(|| serde::de::Error::custom(INVALID_RUNTIME_FORMAT))
    }
}

fn parse_runtime(raw: &str) -> Option<i32> {
    let (minutes, unit) = raw.split_once(' ')?;
    if unit != "mins" {
        return None;
    }
    minutes.parse().ok()
}

/// A catalogue entry.
///
/// Serializes to `{id, title, year, runtime, genres, version}`; zero-valued
/// optional fields are omitted and the creation time stays internal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Movie {
    pub id: MovieId,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(skip_serializing_if = "is_zero_year")]
    pub year: i32,
    #[serde(skip_serializing_if = "Runtime::is_zero")]
    pub runtime: Runtime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    pub version: i32,
}

fn is_zero_year(year: &i32) -> bool {
    *year == 0
}

impl Movie {
    pub fn from_row(id: MovieId, created_at: DateTime<Utc>, fields: NewMovie, version: i32) -> Self {
        Self {
            id,
            created_at,
            title: fields.title,
            year: fields.year,
            runtime: fields.runtime,
            genres: fields.genres,
            version,
        }
    }

    /// The editable fields, for re-validation after a patch.
    pub fn fields(&self) -> NewMovie {
        NewMovie {
            title: self.title.clone(),
            year: self.year,
            runtime: self.runtime,
            genres: self.genres.clone(),
        }
    }
}

impl Entity for Movie {
    type Id = MovieId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> i32 {
        self.version
    }
}

/// Fields of a movie that does not have a row yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMovie {
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    pub genres: Vec<String>,
}

/// Partial update; `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoviePatch {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<Runtime>,
    pub genres: Option<Vec<String>>,
}

impl MoviePatch {
    pub fn apply_to(self, movie: &mut Movie) {
        if let Some(title) = self.title {
            movie.title = title;
        }
        if let Some(year) = self.year {
            movie.year = year;
        }
        if let Some(runtime) = self.runtime {
            movie.runtime = runtime;
        }
        if let Some(genres) = self.genres {
            movie.genres = genres;
        }
    }
}

/// Field rules for a movie. `this_year` bounds the release year.
pub fn validate_movie(v: &mut Validator, movie: &NewMovie, this_year: i32) {
    v.check(!movie.title.is_empty(), "title", "must be provided");
    v.check_with("title", "must not be more than 500 bytes long", || {
        movie.title.len() <= MAX_TITLE_BYTES
    });

    v.check(movie.year != 0, "year", "must be provided");
    v.check_with("year", "must be greater than 1888", || movie.year >= FIRST_RELEASE_YEAR);
    v.check_with("year", "must not be in the future", || movie.year <= this_year);

    v.check(!movie.runtime.is_zero(), "runtime", "must be provided");
    v.check_with("runtime", "must be a positive integer", || movie.runtime.0 > 0);

    v.check(!movie.genres.is_empty(), "genres", "must contain at least 1 genre");
    v.check_with("genres", "must not contain more than 5 genres", || {
        movie.genres.len() <= MAX_GENRES
    });
    v.check_with("genres", "must not contain duplicate values", || unique(&movie.genres));
}
