//! Cross-cutting request layers: the authorization gate sits in front of
//! the router, in the same tower/axum idiom the ambient stack uses for
//! panic handling, tracing, and timing.

pub mod auth;
