//! Typed errors and HTTP response mapping.

use crate::http::Response;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("no route matches {method} {path}")]
    NotFound { method: String, path: String },
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("unknown named route: {0}")]
    UnknownRoute(String),
    #[error("missing required parameter '{param}' for route '{route}'")]
    MissingParameter { route: String, param: String },
    #[error("invalid value '{value}' for parameter '{param}'")]
    InvalidParameter { param: String, value: String },
    #[error("constraint references unknown parameter '{param}' in '{path}'")]
    UnknownParameter { path: String, param: String },
    #[error("bad pattern for '{param}': {source}")]
    BadPattern {
        param: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("field not found: {0}")]
    FieldNotFound(String),
    #[error("entity of table '{table}' has no primary key value")]
    MissingPrimaryKey { table: String },
}

/// Accumulated validation failures, field -> messages. Catchable distinctly
/// from [`PersistenceError`].
#[derive(Error, Debug, Clone)]
#[error("validation failed for {} field(s)", fields.len())]
pub struct ValidationError {
    pub fields: HashMap<String, Vec<String>>,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Handler(String),
}

impl AppError {
    /// Status and stable error code for the response envelope.
    pub fn status_and_code(&self) -> (u16, &'static str) {
        match self {
            AppError::Route(RouteError::NotFound { .. }) => (404, "not_found"),
            AppError::Route(RouteError::MethodNotAllowed(_)) => (405, "method_not_allowed"),
            AppError::Route(_) => (500, "routing_error"),
            AppError::Persistence(PersistenceError::Db(sqlx::Error::RowNotFound)) => {
                (404, "not_found")
            }
            AppError::Persistence(_) => (500, "persistence_error"),
            AppError::Validation(_) => (422, "validation_error"),
            AppError::Handler(_) => (500, "internal_error"),
        }
    }

    /// Convert to a JSON error response. Detailed messages only in debug mode,
    /// otherwise a generic message so internals never leak.
    pub fn to_response(&self, debug: bool) -> Response {
        let (status, code) = self.status_and_code();
        let message = if debug {
            self.to_string()
        } else {
            match status {
                404 => "not found".to_string(),
                405 => "method not allowed".to_string(),
                422 => "validation failed".to_string(),
                _ => "internal server error".to_string(),
            }
        };
        let mut body = serde_json::json!({
            "error": { "code": code, "message": message }
        });
        if debug {
            if let AppError::Validation(e) = self {
                body["error"]["details"] = serde_json::json!(e.fields);
            }
        }
        Response::json(status, &body)
    }
}
