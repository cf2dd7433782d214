use axum::http::{Method, StatusCode};
use doppel_federation::JoinOptions;
use doppel_identity::{verify_json, ServerIdentity, DEFAULT_KEY_ID};
use doppel_rooms::{redact, require_room_version, EventTemplate, RoomOptions, RoomStore};
use doppel_server::now_ms;
use doppel_types::Membership;
use serde_json::{json, Value};
use std::collections::HashSet;

mod common;
use common::{setup, SERVER_NAME};

#[tokio::test]
async fn directory_resolves_known_alias() {
    let server = setup(JoinOptions::default());
    let (status, body) = server
        .unsigned(
            Method::GET,
            "/_matrix/federation/v1/query/directory?room_alias=%23lobby:responder",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["room_id"], server.room_id);
    assert_eq!(body["servers"], json!([SERVER_NAME]));
}

#[tokio::test]
async fn directory_unknown_alias_is_not_found() {
    let server = setup(JoinOptions::default());
    let (status, body) = server
        .unsigned(
            Method::GET,
            "/_matrix/federation/v1/query/directory?room_alias=%23nope:responder",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errcode"], "M_NOT_FOUND");
}

#[tokio::test]
async fn directory_without_alias_is_missing_param() {
    let server = setup(JoinOptions::default());
    let (status, body) = server
        .unsigned(Method::GET, "/_matrix/federation/v1/query/directory", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errcode"], "M_MISSING_PARAM");
}

#[tokio::test]
async fn unknown_event_is_not_found() {
    let server = setup(JoinOptions::default());
    let (status, body) = server
        .unsigned(Method::GET, "/_matrix/federation/v1/event/$missing", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("$missing"));
}

#[tokio::test]
async fn event_auth_returns_the_chain() {
    let server = setup(JoinOptions::default());
    let (last_id, create_id) = server
        .state
        .rooms
        .with_room(&server.room_id, |room| {
            (
                room.timeline().last().unwrap().event_id().to_string(),
                room.timeline()[0].event_id().to_string(),
            )
        })
        .unwrap();

    let uri = format!(
        "/_matrix/federation/v1/event_auth/{}/{last_id}",
        server.room_id
    );
    let (status, body) = server.unsigned(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let chain: HashSet<String> = body["auth_chain"]
        .as_array()
        .unwrap()
        .iter()
        .map(|event| {
            let rules = require_room_version("10").unwrap();
            rules.event_id(event).unwrap()
        })
        .collect();
    assert!(chain.contains(&create_id));
    assert!(!chain.contains(&last_id));
}

#[tokio::test]
async fn event_auth_unknown_room_or_event_is_not_found() {
    let server = setup(JoinOptions::default());
    let (status, _) = server
        .unsigned(
            Method::GET,
            "/_matrix/federation/v1/event_auth/!nowhere:responder/$x",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!("/_matrix/federation/v1/event_auth/{}/$x", server.room_id);
    let (status, _) = server.unsigned(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn remote_invite(inviter: &ServerIdentity) -> Value {
    let store = RoomStore::new();
    let room_id = store
        .create_room(inviter, &RoomOptions::new("@alice:remote"), now_ms())
        .unwrap();
    store
        .with_room(&room_id, |room| {
            let mut template = EventTemplate::membership("@bob:responder", Membership::Invite);
            template.sender = "@alice:remote".to_string();
            room.build_event(&template, inviter, now_ms())
        })
        .unwrap()
        .unwrap()
        .json()
        .clone()
}

#[tokio::test]
async fn invite_is_countersigned_and_reported() {
    let server = setup(JoinOptions::default());
    let event = remote_invite(&server.peer);
    let room_id = event["room_id"].as_str().unwrap().to_string();
    let uri = format!("/_matrix/federation/v2/invite/{room_id}/$invite");
    let (status, body) = server
        .signed(
            Method::PUT,
            &uri,
            Some(json!({ "event": event, "room_version": "10", "invite_room_state": [] })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let rules = require_room_version("10").unwrap();
    let redacted = redact(rules.redaction(), &body["event"]);
    verify_json(
        SERVER_NAME,
        DEFAULT_KEY_ID,
        &server.state.identity.verifying_key(),
        &redacted,
    )
    .unwrap();
    assert_eq!(server.listener.invites().len(), 1);
    // Invites are reported, not stored.
    assert!(server.state.rooms.get_room(&room_id).is_err());
}

#[tokio::test]
async fn malformed_invite_is_bad_json() {
    let server = setup(JoinOptions::default());
    let (status, body) = server
        .signed(
            Method::PUT,
            "/_matrix/federation/v2/invite/!r:remote/$invite",
            Some(json!({ "room_version": "10" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errcode"], "M_BAD_JSON");
    assert!(server.listener.invites().is_empty());
}

#[tokio::test]
async fn invite_body_that_is_not_json_is_rejected() {
    let server = setup(JoinOptions::default());
    let uri = "/_matrix/federation/v2/invite/!r:remote/$invite";
    let auth = server
        .peer
        .sign_request("PUT", uri, SERVER_NAME, None)
        .unwrap();
    let app = server.app();
    let request = axum::http::Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .header(axum::http::header::AUTHORIZATION, auth)
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
