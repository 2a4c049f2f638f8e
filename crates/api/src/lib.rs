//! HTTP API: configuration, request decoding, guards and routing.

pub mod app;
pub mod config;
pub mod context;
pub mod ingress;
pub mod middleware;
