//! API error type: wraps module errors and maps them to HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::warn;

use crate::assessor::AssessError;
use crate::highlight::HighlightError;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::upload::UploadError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Highlight(#[from] HighlightError),
    #[error(transparent)]
    Assess(#[from] AssessError),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session {0} has not been submitted")]
    NotSubmitted(String),
    #[error("{0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub fn api_error_to_status(err: &ApiError) -> StatusCode {
    match err {
        ApiError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        ApiError::Store(StoreError::Invalid { .. }) => StatusCode::BAD_REQUEST,
        ApiError::Session(e) => match e {
            SessionError::NotStarted
            | SessionError::AlreadyStarted
            | SessionError::AlreadySubmitted
            | SessionError::AudioNotPlaying
            | SessionError::WrongModality { .. } => StatusCode::CONFLICT,
            SessionError::UnknownQuestion(_) | SessionError::UnknownPart(_) | SessionError::PartIndexOutOfRange(_) => {
                StatusCode::BAD_REQUEST
            }
        },
        ApiError::Upload(e) => match e {
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::UnsupportedType { .. } | UploadError::Empty | UploadError::Stream(_) => StatusCode::BAD_REQUEST,
            UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        ApiError::Highlight(e) => match e {
            HighlightError::UnknownId(_) => StatusCode::NOT_FOUND,
            HighlightError::Overlaps(_) => StatusCode::CONFLICT,
            HighlightError::Empty | HighlightError::NotFound { .. } => StatusCode::BAD_REQUEST,
        },
        ApiError::Assess(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        ApiError::NotSubmitted(_) => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = api_error_to_status(&self);
        if status.is_server_error() {
            warn!(target: "ielts_backend", error = %self, "Request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
