//! Movies domain module.
//!
//! The catalogue that permission codes guard: the `Movie` record, its field
//! rules, partial updates and the list filters. Pure domain logic (no IO, no
//! HTTP, no storage).

pub mod filters;
pub mod movie;

pub use filters::{Filters, Metadata, MovieQuery, SortDirection};
pub use movie::{Movie, MovieId, MoviePatch, NewMovie, Runtime};
