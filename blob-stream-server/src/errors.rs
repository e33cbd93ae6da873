use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use blob_stream::StreamError;
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Debug, Error)]
pub enum ServerErr {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("File is empty")]
    EmptyFile,

    #[error("File {0} not found")]
    FileNotFound(i64),

    #[error("Requested range not satisfiable")]
    RangeNotSatisfiable { size: u64 },

    #[error("Transfer failed: {0}")]
    Transfer(#[from] StreamError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl ResponseError for ServerErr {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerErr::Validation(_) | ServerErr::EmptyFile => StatusCode::BAD_REQUEST,
            ServerErr::FileNotFound(_) => StatusCode::NOT_FOUND,
            ServerErr::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ServerErr::Transfer(StreamError::RecordNotFound { .. }) => StatusCode::NOT_FOUND,
            ServerErr::Transfer(StreamError::InvalidRange { .. }) => StatusCode::RANGE_NOT_SATISFIABLE,
            ServerErr::Transfer(StreamError::MissingStream(_)) => StatusCode::BAD_REQUEST,
            ServerErr::Transfer(_) | ServerErr::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ServerErr::Validation(errors) => HttpResponse::BadRequest().json(errors),
            ServerErr::RangeNotSatisfiable { size } => HttpResponse::RangeNotSatisfiable()
                .insert_header((header::CONTENT_RANGE, format!("bytes */{}", size)))
                .finish(),
            _ => {
                if self.status_code().is_server_error() {
                    tracing::error!("request failed: {}", self);
                }
                HttpResponse::build(self.status_code()).body(self.to_string())
            }
        }
    }
}
