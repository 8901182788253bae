//! Liveness endpoint used for readiness checks and tests.

use rocket::serde::json::Json;
use schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Report that the service is up.
#[openapi(tag = "Health")]
#[get("/health")]
pub fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
