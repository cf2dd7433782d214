//! Handlers for the `/_matrix/federation` surface.

use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use doppel_federation::{ingest, make_join, make_knock, parse_transaction, process_invite, send_join};
use doppel_identity::VerifiedRequest;
use doppel_types::{
    DirectoryResponse, EventAuthResponse, InviteResponse, MakeJoinResponse, SendJoinResponse,
    SendTransactionResponse, Transaction,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::ApiError;
use crate::{now_ms, AppState};

/// Handler for `GET /_matrix/federation/v1/make_join/{roomId}/{userId}`.
pub async fn make_join_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(request): Extension<VerifiedRequest>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> Result<Json<MakeJoinResponse>, ApiError> {
    tracing::debug!(origin = %request.origin, %room_id, %user_id, "make_join");
    Ok(Json(make_join(&state.rooms, &room_id, &user_id)?))
}

/// Handler for `GET /_matrix/federation/v1/make_knock/{roomId}/{userId}`.
pub async fn make_knock_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(request): Extension<VerifiedRequest>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> Result<Json<MakeJoinResponse>, ApiError> {
    tracing::debug!(origin = %request.origin, %room_id, %user_id, "make_knock");
    Ok(Json(make_knock(&state.rooms, &room_id, &user_id)?))
}

#[derive(Debug, Deserialize)]
pub struct SendJoinQuery {
    omit_members: Option<String>,
}

/// Handler for `PUT /_matrix/federation/v2/send_join/{roomId}/{eventId}`.
pub async fn send_join_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(request): Extension<VerifiedRequest>,
    Path((room_id, _event_id)): Path<(String, String)>,
    Query(query): Query<SendJoinQuery>,
) -> Result<Json<SendJoinResponse>, ApiError> {
    let omit_members = query.omit_members.as_deref() == Some("true");
    let response = send_join(
        &state.rooms,
        &state.identity,
        &room_id,
        request.content(),
        omit_members,
        state.join_options,
    )?;
    Ok(Json(response))
}

/// Handler for `PUT /_matrix/federation/v2/invite/{roomId}/{eventId}`.
pub async fn invite_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(request): Extension<VerifiedRequest>,
    Path((room_id, event_id)): Path<(String, String)>,
) -> Result<Json<InviteResponse>, ApiError> {
    tracing::debug!(origin = %request.origin, %room_id, %event_id, "invite");
    let response = process_invite(&state.identity, request.content(), state.listener.as_ref())?;
    Ok(Json(response))
}

/// Handler for `PUT /_matrix/federation/v1/send/{txnId}`.
pub async fn send_transaction_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(request): Extension<VerifiedRequest>,
    Path(txn_id): Path<String>,
) -> Result<Json<SendTransactionResponse>, ApiError> {
    let txn = parse_transaction(request.content())?;
    if txn.origin != request.origin {
        tracing::warn!(
            %txn_id,
            signed_by = %request.origin,
            claimed = %txn.origin,
            "transaction origin differs from request signer"
        );
    }
    let outcome = ingest(&state.rooms, &txn_id, &txn, state.listener.as_ref())?;
    Ok(Json(outcome.response()))
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    room_alias: Option<String>,
}

/// Handler for `GET /_matrix/federation/v1/query/directory?room_alias=`.
///
/// The responder always names itself as the only resolving server.
pub async fn directory_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<DirectoryQuery>,
) -> Result<Json<DirectoryResponse>, ApiError> {
    let alias = query
        .room_alias
        .ok_or_else(|| ApiError::MissingParam("room_alias is required".to_string()))?;
    let room_id = state.rooms.resolve_alias(&alias)?;
    Ok(Json(DirectoryResponse {
        room_id,
        servers: vec![state.identity.server_name().to_string()],
    }))
}

/// Handler for `GET /_matrix/federation/v1/event/{eventId}`.
///
/// Wraps the event in a single-PDU transaction.
pub async fn get_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<Transaction>, ApiError> {
    let event = state
        .rooms
        .find_event(&event_id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown event: {event_id}")))?;
    Ok(Json(Transaction {
        origin: state.identity.server_name().to_string(),
        origin_server_ts: now_ms(),
        destination: None,
        pdus: vec![event.json().clone()],
        edus: Vec::new(),
    }))
}

/// Handler for `GET /_matrix/federation/v1/event_auth/{roomId}/{eventId}`.
pub async fn event_auth_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((room_id, event_id)): Path<(String, String)>,
) -> Result<Json<EventAuthResponse>, ApiError> {
    let chain = state.rooms.with_room(&room_id, |room| {
        let event = room
            .get_event(&event_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("unknown event: {event_id}")))?;
        room.auth_chain_for(&[event]).map_err(ApiError::from)
    })??;
    Ok(Json(EventAuthResponse {
        auth_chain: chain.iter().map(|event| event.json().clone()).collect(),
    }))
}
