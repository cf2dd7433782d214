use axum::{Extension, Json};
use serde_json::Value;
use std::sync::Arc;

use crate::api::ApiError;
use crate::{now_ms, AppState};

/// Handler for `GET /_matrix/key/v2/server` (and `/server/`, `/server/{keyId}`).
///
/// The document is regenerated per request so its validity window always
/// starts now.
pub async fn server_key_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    state
        .identity
        .server_key_document(now_ms())
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("cannot sign key document: {e}")))
}
