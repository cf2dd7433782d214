//! Error responses shared by every handler.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use doppel_federation::{HandshakeError, InviteError, TransactionError};
use doppel_identity::AuthError;
use doppel_rooms::RoomError;
use doppel_types::{ErrorBody, ErrorCode};
use thiserror::Error;

/// Every way a request can fail, rendered as `{errcode, error}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request signature verification failed; status and code come from the
    /// verifier.
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadJson(String),
    #[error("{0}")]
    MissingParam(String),
    #[error("{0}")]
    InvalidParam(String),
    #[error("{0}")]
    TooLarge(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            ApiError::Auth(err) => (
                StatusCode::from_u16(err.status()).unwrap_or(StatusCode::UNAUTHORIZED),
                err.errcode(),
            ),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            ApiError::BadJson(_) => (StatusCode::BAD_REQUEST, ErrorCode::BadJson),
            ApiError::MissingParam(_) => (StatusCode::BAD_REQUEST, ErrorCode::MissingParam),
            ApiError::InvalidParam(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidParam),
            ApiError::TooLarge(_) => (StatusCode::BAD_REQUEST, ErrorCode::TooLarge),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Unknown),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, errcode) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        } else {
            tracing::debug!(%status, error = %self, "request rejected");
        }
        (status, Json(ErrorBody::new(errcode, self.to_string()))).into_response()
    }
}

impl From<RoomError> for ApiError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::UnknownRoom(_) | RoomError::UnknownEvent(_) | RoomError::UnknownAlias(_) => {
                ApiError::NotFound(err.to_string())
            }
            RoomError::UnsupportedVersion(_) | RoomError::InvalidEvent(_) => {
                ApiError::BadJson(err.to_string())
            }
            RoomError::MissingAuthEvent { .. }
            | RoomError::EventConstruction(_)
            | RoomError::Identity(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<HandshakeError> for ApiError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::UnknownRoom(_) => ApiError::NotFound(err.to_string()),
            HandshakeError::MissingPartialStateAck => ApiError::MissingParam(err.to_string()),
            HandshakeError::RoomMismatch { .. } => ApiError::BadJson(err.to_string()),
            // An unparsable send_join event is reported as a server error.
            HandshakeError::Template(_)
            | HandshakeError::InvalidEvent(_)
            | HandshakeError::Inconsistent(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TransactionError> for ApiError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Malformed(_) => ApiError::BadJson(err.to_string()),
            TransactionError::TooLarge { .. } => ApiError::TooLarge(err.to_string()),
        }
    }
}

impl From<InviteError> for ApiError {
    fn from(err: InviteError) -> Self {
        match err {
            InviteError::Signing(_) => ApiError::Internal(err.to_string()),
            InviteError::Malformed(_)
            | InviteError::UnsupportedVersion(_)
            | InviteError::InvalidEvent(_) => ApiError::BadJson(err.to_string()),
        }
    }
}
