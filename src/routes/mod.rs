//! HTTP route handlers.
//!
//! Handlers are annotated with `#[openapi]` so `rocket_okapi` can derive an OpenAPI
//! document for the lookup service.

pub mod health;
pub mod products;
