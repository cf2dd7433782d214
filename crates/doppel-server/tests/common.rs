#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use doppel_federation::{JoinOptions, RecordingListener};
use doppel_identity::{ServerIdentity, DEFAULT_KEY_ID};
use doppel_rooms::{EventTemplate, RoomOptions};
use doppel_server::{app, now_ms, AppState};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const SERVER_NAME: &str = "responder";
pub const PEER_NAME: &str = "remote";

pub struct TestServer {
    pub state: AppState,
    pub peer: ServerIdentity,
    pub listener: Arc<RecordingListener>,
    pub room_id: String,
}

/// A responder with one room created by `@alice:responder` and a trusted
/// peer named `remote`.
pub fn setup(join_options: JoinOptions) -> TestServer {
    let mut state = AppState::new(ServerIdentity::generate(SERVER_NAME, DEFAULT_KEY_ID));
    let peer = ServerIdentity::generate(PEER_NAME, DEFAULT_KEY_ID);
    state.key_ring.trust(&peer, i64::MAX);
    let listener = Arc::new(RecordingListener::new());
    state.listener = listener.clone();
    state.join_options = join_options;

    let mut options = RoomOptions::new("@alice:responder");
    options.aliases.push("#lobby:responder".to_string());
    let room_id = state
        .rooms
        .create_room(&state.identity, &options, now_ms())
        .unwrap();

    TestServer {
        state,
        peer,
        listener,
        room_id,
    }
}

impl TestServer {
    pub fn app(&self) -> Router {
        app(self.state.clone())
    }

    /// An event authored and signed by the peer against the room's current
    /// state. Not appended.
    pub fn peer_event(&self, template: EventTemplate) -> Value {
        self.state
            .rooms
            .with_room(&self.room_id, |room| {
                room.build_event(&template, &self.peer, now_ms())
            })
            .unwrap()
            .unwrap()
            .json()
            .clone()
    }

    pub fn timeline_len(&self) -> usize {
        self.state
            .rooms
            .with_room(&self.room_id, |room| room.timeline().len())
            .unwrap()
    }

    /// Sends a request signed by the peer.
    pub async fn signed(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let auth = self
            .peer
            .sign_request(method.as_str(), uri, SERVER_NAME, body.as_ref())
            .unwrap();
        send(self.app(), method, uri, body, Some(auth)).await
    }

    /// Sends a request with no signature.
    pub async fn unsigned(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        send(self.app(), method, uri, body, None).await
    }
}

pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    authorization: Option<String>,
) -> (StatusCode, Value) {
    let (status, bytes) = send_raw(app, method, uri, body, authorization).await;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub async fn send_raw(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    authorization: Option<String>,
) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = authorization {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };
    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}
