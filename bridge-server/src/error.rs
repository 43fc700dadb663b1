use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Binding '{0}' not found")]
    BindingNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "data": null,
            "message": self.to_string()
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BindingNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
