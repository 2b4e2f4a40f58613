// service/error.rs
use thiserror::Error;

use crate::error::{ErrorMessage, HttpError};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<ReconcileError> for HttpError {
    fn from(error: ReconcileError) -> Self {
        match error {
            ReconcileError::InvalidSignature => {
                HttpError::bad_request(ErrorMessage::InvalidSignature.to_string())
            }
            ReconcileError::MalformedPayload(_) => HttpError::bad_request(error.to_string()),
            // 500 signals the provider to retry the delivery
            ReconcileError::Database(_) => HttpError::server_error(error.to_string()),
        }
    }
}
