use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use doppel_identity::verify_request;
use std::sync::Arc;

use crate::api::ApiError;
use crate::{now_ms, AppState, MAX_REQUEST_BODY_BYTES};

/// Authenticates a federation request by its `X-Matrix` signature.
///
/// Buffers the body (the signature covers it), verifies against the key
/// ring, and stores the resulting [`doppel_identity::VerifiedRequest`] in
/// the request extensions. A failed check short-circuits with the
/// verifier's status before any handler runs.
pub async fn federation_auth_middleware(
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("application state missing".to_string()))?;

    let (mut parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES)
        .await
        .map_err(|e| ApiError::TooLarge(format!("cannot read request body: {e}")))?;

    let headers: Vec<&str> = parts
        .headers
        .get_all(AUTHORIZATION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());

    let verified = match verify_request(
        &state.key_ring,
        state.identity.server_name(),
        parts.method.as_str(),
        uri,
        &headers,
        &bytes,
        now_ms(),
    ) {
        Ok(verified) => verified,
        Err(err) => {
            tracing::warn!(method = %parts.method, uri, error = %err, "rejected federation request");
            return Err(err.into());
        }
    };
    tracing::debug!(origin = %verified.origin, uri, "authenticated federation request");

    parts.extensions.insert(verified);
    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
