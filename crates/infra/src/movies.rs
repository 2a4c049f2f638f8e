//! Movie catalogue operations: validate, then hand off to the row store.

use std::sync::Arc;

use chrono::{Datelike, Utc};

use greenlight_core::{DomainResult, ExpectedVersion, Validator};
use greenlight_movies::filters::validate_filters;
use greenlight_movies::movie::validate_movie;
use greenlight_movies::{Metadata, Movie, MovieId, MoviePatch, MovieQuery, NewMovie};

use crate::store::MovieStore;

#[derive(Clone)]
pub struct MovieService {
    store: Arc<dyn MovieStore>,
}

impl MovieService {
    pub fn new(store: Arc<dyn MovieStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, movie: NewMovie) -> DomainResult<Movie> {
        let mut v = Validator::new();
        validate_movie(&mut v, &movie, Utc::now().year());
        v.into_result()?;

        let movie = self.store.insert(&movie).await?;
        tracing::info!(movie_id = %movie.id, "movie created");
        Ok(movie)
    }

    pub async fn get(&self, id: MovieId) -> DomainResult<Movie> {
        Ok(self.store.get(id).await?)
    }

    /// Apply `patch` when the row is still at `expected`.
    ///
    /// The store repeats the version check in its write, so a concurrent
    /// update between the read and the write is still an edit conflict.
    pub async fn update(
        &self,
        id: MovieId,
        patch: MoviePatch,
        expected: ExpectedVersion,
    ) -> DomainResult<Movie> {
        let mut movie = self.store.get(id).await?;
        expected.check(movie.version)?;

        patch.apply_to(&mut movie);

        let mut v = Validator::new();
        validate_movie(&mut v, &movie.fields(), Utc::now().year());
        v.into_result()?;

        movie.version = self.store.update(&movie).await?;
        tracing::info!(movie_id = %movie.id, version = movie.version, "movie updated");
        Ok(movie)
    }

    pub async fn delete(&self, id: MovieId) -> DomainResult<()> {
        self.store.delete(id).await?;
        tracing::info!(movie_id = %id, "movie deleted");
        Ok(())
    }

    pub async fn list(&self, query: MovieQuery) -> DomainResult<(Vec<Movie>, Metadata)> {
        let mut v = Validator::new();
        validate_filters(&mut v, &query.filters);
        v.into_result()?;

        let page = self.store.list(&query).await?;
        let metadata = Metadata::calculate(
            page.total_records,
            query.filters.page,
            query.filters.page_size,
        );
        Ok((page.movies, metadata))
    }
}

#[cfg(test)]
mod tests {
    use greenlight_core::DomainError;
    use greenlight_movies::{Filters, Runtime};

    use super::*;
    use crate::store::Stores;

    fn service() -> MovieService {
        MovieService::new(Stores::in_memory().movies)
    }

    fn heat() -> NewMovie {
        NewMovie {
            title: "Heat".into(),
            year: 1995,
            runtime: Runtime(170),
            genres: vec!["crime".into(), "thriller".into()],
        }
    }

    #[tokio::test]
    async fn create_rejects_invalid_fields_without_writing() {
        let movies = service();

        let err = movies.create(NewMovie::default()).await.unwrap_err();
        let DomainError::ValidationFailed(errors) = err else {
            panic!("expected validation failure, got {err:?}");
        };
        assert_eq!(errors["title"], "must be provided");

        let (rows, metadata) = movies.list(MovieQuery::default()).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(metadata, Metadata::default());
    }

    #[tokio::test]
    async fn update_honours_the_expected_version() {
        let movies = service();
        let created = movies.create(heat()).await.unwrap();
        assert_eq!(created.version, 1);

        let patch = MoviePatch {
            runtime: Some(Runtime(171)),
            ..MoviePatch::default()
        };
        let updated = movies
            .update(created.id, patch.clone(), ExpectedVersion::Exact(1))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.runtime, Runtime(171));

        assert_eq!(
            movies.update(created.id, patch.clone(), ExpectedVersion::Exact(1)).await,
            Err(DomainError::EditConflict)
        );

        let again = movies.update(created.id, patch, ExpectedVersion::Any).await.unwrap();
        assert_eq!(again.version, 3);
    }

    #[tokio::test]
    async fn invalid_patch_leaves_the_row_alone() {
        let movies = service();
        let created = movies.create(heat()).await.unwrap();

        let err = movies
            .update(
                created.id,
                MoviePatch {
                    genres: Some(vec![]),
                    ..MoviePatch::default()
                },
                ExpectedVersion::Any,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(_)));

        assert_eq!(movies.get(created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn list_validates_filters_and_fills_metadata() {
        let movies = service();
        for _ in 0..3 {
            movies.create(heat()).await.unwrap();
        }

        let bad = MovieQuery {
            filters: Filters {
                sort: "budget".into(),
                ..Filters::default()
            },
            ..MovieQuery::default()
        };
        assert!(matches!(
            movies.list(bad).await,
            Err(DomainError::ValidationFailed(_))
        ));

        let query = MovieQuery {
            filters: Filters {
                page: 2,
                page_size: 2,
                sort: "id".into(),
            },
            ..MovieQuery::default()
        };
        let (rows, metadata) = movies.list(query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(metadata.total_records, 3);
        assert_eq!(metadata.last_page, 2);
        assert_eq!(metadata.current_page, 2);
    }

    #[tokio::test]
    async fn delete_then_get_misses() {
        let movies = service();
        let created = movies.create(heat()).await.unwrap();

        movies.delete(created.id).await.unwrap();
        assert_eq!(movies.get(created.id).await, Err(DomainError::RecordNotFound));
        assert_eq!(movies.delete(created.id).await, Err(DomainError::RecordNotFound));
    }
}
