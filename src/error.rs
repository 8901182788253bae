use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{Request, Response};
use rocket_okapi::OpenApiError;
use rocket_okapi::okapi::Map;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use schemars::JsonSchema;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::response::OpenApiResponderInner;
use rocket_db_pools::sqlx;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum ApiError {
    DatabaseError(sqlx::Error),
    NotFound(String),
    BadRequest(String),
}

/// JSON body sent with every error status.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiError {
    fn status(&self) -> Status {
        match self {
            ApiError::DatabaseError(_) => Status::InternalServerError,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::BadRequest(_) => Status::BadRequest,
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let (error_type, message) = match self {
            ApiError::DatabaseError(e) => {
                log::error!("database error: {}", e);
                // Driver messages can leak schema details; keep them in the log only.
                ("DatabaseError", "database unavailable".to_string())
            }
            ApiError::NotFound(msg) => {
                log::debug!("not found: {}", msg);
                ("NotFound", msg)
            }
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                ("BadRequest", msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        Response::build_from(body.respond_to(request)?)
            .status(status)
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(_generator: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        let mut responses = Map::new();
        for (code, description) in [
            ("400", "The request was malformed."),
            ("404", "The requested resource does not exist."),
            ("500", "The database could not be reached or returned an error."),
        ] {
            responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(Responses {
            responses,
            ..Default::default()
        })
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            _ => ApiError::DatabaseError(err),
        }
    }
}
