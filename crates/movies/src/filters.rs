//! Paging, sorting and search parameters for the movie list.

use serde::Serialize;

use greenlight_core::Validator;
use greenlight_core::validator::permitted_value;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE: i64 = 10_000_000;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Sort keys a list request may name; a leading `-` sorts descending.
pub const MOVIE_SORT_SAFELIST: [&str; 8] = [
    "id", "title", "year", "runtime", "-id", "-title", "-year", "-runtime",
];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filters {
    pub page: i64,
    pub page_size: i64,
    pub sort: String,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: "id".to_string(),
        }
    }
}

impl Filters {
    /// Column named by `sort`, only ever one from the safelist.
    ///
    /// Falls back to `id` for a value that was never validated.
    pub fn sort_column(&self) -> &'static str {
        MOVIE_SORT_SAFELIST
            .iter()
            .find(|key| **key == self.sort)
            .map(|key| key.trim_start_matches('-'))
            .unwrap_or("id")
    }

    pub fn sort_direction(&self) -> SortDirection {
        if self.sort.starts_with('-') {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

pub fn validate_filters(v: &mut Validator, f: &Filters) {
    v.check(f.page > 0, "page", "must be greater than zero");
    v.check(f.page <= MAX_PAGE, "page", "must be a maximum of 10 million");
    v.check(f.page_size > 0, "page_size", "must be greater than zero");
    v.check(f.page_size <= MAX_PAGE_SIZE, "page_size", "must be a maximum of 100");
    v.check(
        permitted_value(f.sort.as_str(), &MOVIE_SORT_SAFELIST),
        "sort",
        "invalid sort value",
    );
}

/// A list request: title words and genres to match, plus paging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovieQuery {
    pub title: String,
    pub genres: Vec<String>,
    pub filters: Filters,
}

impl MovieQuery {
    /// Every whitespace-separated word of the title filter must appear as a
    /// word of `title`, ignoring case. An empty filter matches everything.
    pub fn matches_title(&self, title: &str) -> bool {
        let words: Vec<String> = title.split_whitespace().map(str::to_lowercase).collect();
        self.title
            .split_whitespace()
            .all(|wanted| words.iter().any(|w| *w == wanted.to_lowercase()))
    }

    /// `genres` must contain every requested genre.
    pub fn matches_genres(&self, genres: &[String]) -> bool {
        self.genres.iter().all(|wanted| genres.contains(wanted))
    }
}

/// Pagination metadata. Empty (`{}` on the wire) when nothing matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "is_zero")]
    pub current_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub page_size: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub first_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub last_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub total_records: i64,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl Metadata {
    pub fn calculate(total_records: i64, page: i64, page_size: i64) -> Self {
        if total_records == 0 {
            return Self::default();
        }

        Self {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: (total_records + page_size - 1) / page_size,
            total_records,
        }
    }
}
