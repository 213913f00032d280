//! Room registry: lazy materialization from storage, flushing, eviction.

use std::sync::Arc;

use inkroom_shared::Stroke;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::logic::sanitize_strokes;
use crate::state::{AppState, Room};
use crate::storage::Storage;

/// Materialize a room's runtime state, reading the persisted record on the
/// first access. An absent record means an empty log; an unreadable one is
/// logged and treated the same so the room stays usable.
pub async fn get_or_create_room(state: &AppState, room_id: &str) -> Arc<RwLock<Room>> {
    if let Some(room) = state.rooms.read().await.get(room_id).cloned() {
        return room;
    }
    let strokes = match state.storage.load(room_id).await {
        Ok(Some(strokes)) => {
            info!(%room_id, strokes = strokes.len(), "room loaded from storage");
            strokes
        }
        Ok(None) => Vec::new(),
        Err(error) => {
            warn!(%room_id, %error, "board record unreadable, starting empty");
            Vec::new()
        }
    };
    let room = Arc::new(RwLock::new(Room::new(sanitize_strokes(strokes))));
    let mut rooms = state.rooms.write().await;
    let entry = rooms
        .entry(room_id.to_string())
        .or_insert_with(|| room.clone());
    entry.clone()
}

pub async fn lookup_room(state: &AppState, room_id: &str) -> Option<Arc<RwLock<Room>>> {
    state.rooms.read().await.get(room_id).cloned()
}

/// Snapshot the room's log and persist it without holding the room lock
/// across the write. Failures put the dirty flag back so a later flush
/// retries.
pub fn spawn_flush(state: &AppState, room_id: &str, room: &Arc<RwLock<Room>>) -> JoinHandle<()> {
    let state = state.clone();
    let room_id = room_id.to_string();
    let room = room.clone();
    tokio::spawn(async move {
        let strokes = {
            let mut room = room.write().await;
            room.dirty = false;
            room.strokes.clone()
        };
        if let Err(error) = state.storage.save(&room_id, &strokes).await {
            warn!(%room_id, %error, "board flush failed");
            room.write().await.dirty = true;
        }
    })
}

/// Periodic pass over every loaded room, writing out the ones that changed
/// since the last flush.
pub async fn flush_dirty_rooms(state: &AppState) {
    let rooms = {
        let rooms = state.rooms.read().await;
        rooms
            .iter()
            .map(|(room_id, room)| (room_id.clone(), room.clone()))
            .collect::<Vec<_>>()
    };
    for (room_id, room) in rooms {
        let maybe_strokes = {
            let mut room = room.write().await;
            if !room.dirty {
                None
            } else {
                room.dirty = false;
                Some(room.strokes.clone())
            }
        };
        if let Some(strokes) = maybe_strokes {
            if let Err(error) = state.storage.save(&room_id, &strokes).await {
                warn!(%room_id, %error, "periodic board flush failed");
                room.write().await.dirty = true;
            }
        }
    }
}

/// Drop a connection from the room's broadcast group. When the last peer
/// leaves, the room is flushed (if dirty) and its runtime evicted; board
/// membership and invites stay for the process lifetime.
pub async fn detach_connection(state: &AppState, room_id: &str, connection_id: Uuid) {
    let Some(room) = lookup_room(state, room_id).await else {
        return;
    };
    let maybe_strokes = {
        let mut room = room.write().await;
        room.peers.remove(&connection_id);
        if room.peers.is_empty() && room.dirty {
            room.dirty = false;
            Some(room.strokes.clone())
        } else {
            None
        }
    };
    if let Some(strokes) = maybe_strokes {
        info!(%room_id, "flushing idle room");
        if let Err(error) = state.storage.save(room_id, &strokes).await {
            warn!(%room_id, %error, "idle room flush failed");
            room.write().await.dirty = true;
        }
    }

    // A room that failed to flush keeps its dirty flag and stays loaded so
    // the periodic flusher can retry instead of losing the log.
    let mut rooms = state.rooms.write().await;
    let should_evict = match rooms.get(room_id) {
        Some(current) if Arc::ptr_eq(current, &room) => {
            let guard = room.read().await;
            guard.peers.is_empty() && !guard.dirty
        }
        _ => false,
    };
    if should_evict {
        rooms.remove(room_id);
        info!(%room_id, "room evicted");
    }
}

/// Snapshot for an explicit save request; clears the dirty flag so the
/// periodic flusher skips an identical write.
pub async fn snapshot_for_save(room: &Arc<RwLock<Room>>) -> Vec<Stroke> {
    let mut room = room.write().await;
    room.dirty = false;
    room.strokes.clone()
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
