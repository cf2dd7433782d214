//! Predefined media served by ID.

use axum::{
    body::Bytes,
    extract::Path,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Extension,
};
use std::sync::Arc;

use crate::api::ApiError;
use crate::AppState;

/// A media payload the responder serves verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub content_type: String,
    pub data: Bytes,
}

impl MediaItem {
    pub fn new(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            data: data.into(),
        }
    }
}

fn serve(state: &AppState, media_id: &str) -> Result<Response, ApiError> {
    let item = state
        .media
        .get(media_id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown media ID: {media_id}")))?;
    Ok(([(CONTENT_TYPE, item.content_type.clone())], item.data.clone()).into_response())
}

/// Handler for `GET /_matrix/media/{r0,v1,v3}/download/{origin}/{mediaId}`.
pub async fn download_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((origin, media_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    if origin != state.identity.server_name() {
        return Err(ApiError::InvalidParam(format!(
            "invalid origin {origin}; expected {}",
            state.identity.server_name()
        )));
    }
    serve(&state, &media_id)
}

/// Handler for `GET /_matrix/federation/v1/media/download/{mediaId}`.
pub async fn federation_download_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(media_id): Path<String>,
) -> Result<Response, ApiError> {
    serve(&state, &media_id)
}
