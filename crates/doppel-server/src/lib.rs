//! doppel server library logic: the federation HTTP surface.

pub mod api;
pub mod api_federation;
pub mod api_keys;
pub mod api_media;
pub mod bootstrap;
pub mod config;
pub mod middleware;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, put},
    Extension, Json, Router,
};
use doppel_federation::{FederationListener, JoinOptions, LoggingListener};
use doppel_identity::{KeyRing, ServerIdentity};
use doppel_rooms::RoomStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use api_media::MediaItem;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The responder's name and signing key.
    pub identity: Arc<ServerIdentity>,
    /// Peer keys trusted for request authentication.
    pub key_ring: Arc<KeyRing>,
    pub rooms: Arc<RoomStore>,
    /// Notified of invites, committed PDUs and EDUs.
    pub listener: Arc<dyn FederationListener>,
    pub join_options: JoinOptions,
    /// Media ID -> payload.
    pub media: Arc<HashMap<String, MediaItem>>,
}

impl AppState {
    /// State with an empty key ring, no rooms, no media and a logging
    /// listener.
    pub fn new(identity: ServerIdentity) -> Self {
        Self {
            identity: Arc::new(identity),
            key_ring: Arc::new(KeyRing::new()),
            rooms: Arc::new(RoomStore::new()),
            listener: Arc::new(LoggingListener),
            join_options: JoinOptions::default(),
            media: Arc::new(HashMap::new()),
        }
    }
}

/// Maximum request body size (2 MiB). A full transaction of 50 PDUs fits
/// comfortably.
pub const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "server_name": state.identity.server_name(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let signed_routes = Router::new()
        .route(
            "/_matrix/federation/v1/make_join/{roomId}/{userId}",
            get(api_federation::make_join_handler),
        )
        .route(
            "/_matrix/federation/v1/make_knock/{roomId}/{userId}",
            get(api_federation::make_knock_handler),
        )
        .route(
            "/_matrix/federation/v2/send_join/{roomId}/{eventId}",
            put(api_federation::send_join_handler),
        )
        .route(
            "/_matrix/federation/v2/invite/{roomId}/{eventId}",
            put(api_federation::invite_handler),
        )
        .route(
            "/_matrix/federation/v1/send/{txnId}",
            put(api_federation::send_transaction_handler),
        )
        .layer(axum::middleware::from_fn(
            middleware::federation_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route(
            "/_matrix/federation/v1/query/directory",
            get(api_federation::directory_handler),
        )
        .route(
            "/_matrix/federation/v1/event/{eventId}",
            get(api_federation::get_event_handler),
        )
        .route(
            "/_matrix/federation/v1/event_auth/{roomId}/{eventId}",
            get(api_federation::event_auth_handler),
        )
        .route("/_matrix/key/v2/server", get(api_keys::server_key_handler))
        .route("/_matrix/key/v2/server/", get(api_keys::server_key_handler))
        .route(
            "/_matrix/key/v2/server/{keyId}",
            get(api_keys::server_key_handler),
        )
        .route(
            "/_matrix/media/r0/download/{origin}/{mediaId}",
            get(api_media::download_handler),
        )
        .route(
            "/_matrix/media/v1/download/{origin}/{mediaId}",
            get(api_media::download_handler),
        )
        .route(
            "/_matrix/media/v3/download/{origin}/{mediaId}",
            get(api_media::download_handler),
        )
        .route(
            "/_matrix/federation/v1/media/download/{mediaId}",
            get(api_media::federation_download_handler),
        )
        .merge(signed_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
