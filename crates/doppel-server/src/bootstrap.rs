//! Turns a [`Config`] into a ready [`AppState`].

use axum::body::Bytes;
use doppel_federation::JoinOptions;
use doppel_identity::{parse_verifying_key, KeyRing, ServerIdentity};
use doppel_rooms::RoomOptions;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, ConfigError, MediaConfig, PeerConfig};
use crate::{now_ms, AppState, MediaItem};

/// Builds the identity, key ring, media table and bootstrap rooms.
///
/// Peer key documents are fetched separately by [`fetch_peer_keys`], since
/// that needs the network.
pub fn build_state(config: &Config) -> Result<AppState, ConfigError> {
    let identity = load_identity(config)?;
    let mut state = AppState::new(identity);

    for key in &config.key_ring.keys {
        let parsed = parse_verifying_key(&key.key).map_err(|source| {
            ConfigError::PeerKey {
                server_name: key.server_name.clone(),
                source,
            }
        })?;
        state.key_ring.add_key(
            key.server_name.as_str(),
            key.key_id.as_str(),
            parsed,
            key.valid_until_ts.unwrap_or(i64::MAX),
        );
    }

    for room in &config.rooms {
        let mut options = RoomOptions::new(room.creator.as_str());
        options.room_version = room.room_version.clone();
        options.aliases = room.aliases.clone();
        let room_id = state
            .rooms
            .create_room(&state.identity, &options, now_ms())
            .map_err(|source| ConfigError::Room {
                creator: room.creator.clone(),
                source,
            })?;
        tracing::info!(%room_id, aliases = ?room.aliases, "bootstrap room ready");
    }

    state.media = Arc::new(load_media(&config.media)?);
    state.join_options = JoinOptions {
        expect_partial_state: config.federation.partial_state_joins,
        conceal_servers: config.federation.conceal_servers_in_room,
    };
    Ok(state)
}

fn load_identity(config: &Config) -> Result<ServerIdentity, ConfigError> {
    let server_name = config.server.server_name.as_str();
    let key_id = config.signing.key_id.as_str();
    match &config.signing.seed {
        Some(seed) => ServerIdentity::from_seed_base64(server_name, key_id, seed)
            .map_err(ConfigError::SigningSeed),
        None => {
            tracing::info!(server_name, key_id, "no signing seed configured, generating a key");
            Ok(ServerIdentity::generate(server_name, key_id))
        }
    }
}

/// Reads every configured media payload.
pub fn load_media(
    media: &[MediaConfig],
) -> Result<HashMap<String, MediaItem>, ConfigError> {
    media
        .iter()
        .map(|item| {
            let data: Bytes = match (&item.text, &item.path) {
                (Some(text), None) => Bytes::from(text.clone()),
                (None, Some(path)) => std::fs::read(path)
                    .map(Bytes::from)
                    .map_err(|source| ConfigError::MediaRead {
                        id: item.id.clone(),
                        source,
                    })?,
                _ => {
                    return Err(ConfigError::MediaSource {
                        id: item.id.clone(),
                    })
                }
            };
            Ok((item.id.clone(), MediaItem::new(item.content_type.clone(), data)))
        })
        .collect()
}

/// Fetches and imports each peer's key document. Failures are logged and
/// skipped; returns the number of peers whose keys were imported.
pub async fn fetch_peer_keys(key_ring: &KeyRing, peers: &[PeerConfig]) -> usize {
    if peers.is_empty() {
        return 0;
    }
    let client = reqwest::Client::new();
    let mut imported = 0;
    for peer in peers {
        match key_ring
            .fetch_server_keys(&client, &peer.server_name, &peer.base_url)
            .await
        {
            Ok(count) => {
                tracing::info!(server_name = %peer.server_name, count, "trusted peer keys");
                imported += 1;
            }
            Err(e) => {
                tracing::warn!(
                    server_name = %peer.server_name,
                    base_url = %peer.base_url,
                    error = %e,
                    "failed to fetch peer keys"
                );
            }
        }
    }
    imported
}
