//! Connection gateway: handshake, socket loop, event dispatch.
//!
//! The socket loop feeds inbound events through [`process`], which owns
//! the room coordination: it checks membership, takes the room's write
//! lock for mutations, and routes the results by fan-out policy. Replies
//! go straight down the connection's channel; broadcasts go through the
//! room's peer set.

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use inkroom_shared::{ClientMessage, Identity, Point, ServerMessage};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::{self, JoinDecision};
use crate::logic::{self, Fanout, Outgoing};
use crate::rooms;
use crate::state::AppState;
use crate::storage::Storage;

pub async fn liveness_handler() -> &'static str {
    "Whiteboard server running"
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut socket_sender, mut socket_receiver) = socket.split();
    let connection_id = Uuid::new_v4();

    // The very first frame must carry the client identity; anything else
    // terminates the connection with no event.
    let Some(identity) = read_hello(&mut socket_receiver).await else {
        info!(%connection_id, "handshake missing identity, closing");
        let _ = socket_sender.close().await;
        return;
    };

    {
        let mut connections = state.connections.write().await;
        connections.insert(connection_id, identity.clone());
        info!(
            %connection_id,
            identity = %identity.id,
            name = %identity.name,
            connected = connections.len(),
            "connected"
        );
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Ok(payload) = serde_json::to_string(&message) {
                if socket_sender.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut joined: HashSet<String> = HashSet::new();

    while let Some(Ok(message)) = socket_receiver.next().await {
        let parsed = match message {
            Message::Text(text) => serde_json::from_str::<ClientMessage>(&text).ok(),
            Message::Binary(data) => {
                bincode::decode_from_slice::<ClientMessage, _>(&data, bincode::config::standard())
                    .ok()
                    .map(|(message, _)| message)
            }
            Message::Close(_) => break,
            _ => continue,
        };
        let Some(client_message) = parsed else {
            warn!(%connection_id, "unparseable message");
            let _ = tx.send(ServerMessage::Error {
                message: "invalid message".into(),
            });
            continue;
        };
        process(
            &state,
            connection_id,
            &identity,
            &tx,
            &mut joined,
            client_message,
        )
        .await;
    }

    let remaining = {
        let mut connections = state.connections.write().await;
        connections.remove(&connection_id);
        connections.len()
    };
    for room_id in &joined {
        rooms::detach_connection(&state, room_id, connection_id).await;
    }
    send_task.abort();
    info!(%connection_id, connected = remaining, "disconnected");
}

async fn read_hello(receiver: &mut SplitStream<WebSocket>) -> Option<Identity> {
    let message = receiver.next().await?.ok()?;
    let parsed = match message {
        Message::Text(text) => serde_json::from_str::<ClientMessage>(&text).ok()?,
        Message::Binary(data) => {
            bincode::decode_from_slice::<ClientMessage, _>(&data, bincode::config::standard())
                .ok()?
                .0
        }
        _ => return None,
    };
    match parsed {
        ClientMessage::Hello { identity }
            if !identity.id.is_empty() && identity.id.len() <= 64 =>
        {
            Some(identity)
        }
        _ => None,
    }
}

/// Dispatch one inbound event. Draw-type events from identities that are
/// not members of the room are ignored, not errored; events for rooms with
/// no runtime state are silent no-ops, except joins (which create) and
/// draw-starts by an existing member (which materialize the room).
pub(crate) async fn process(
    state: &AppState,
    connection_id: Uuid,
    identity: &Identity,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    joined: &mut HashSet<String>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Hello { .. } => {
            let _ = tx.send(ServerMessage::Error {
                message: "already identified".into(),
            });
        }
        ClientMessage::JoinRoom {
            room_id,
            invite_token,
        } => {
            match access::join(state, &room_id, &identity.id, invite_token.as_deref()).await {
                JoinDecision::Accepted => {
                    let room = rooms::get_or_create_room(state, &room_id).await;
                    let strokes = {
                        let mut room = room.write().await;
                        room.peers.insert(connection_id, tx.clone());
                        room.strokes.clone()
                    };
                    joined.insert(room_id.clone());
                    info!(%connection_id, %room_id, identity = %identity.id, "joined room");
                    let _ = tx.send(ServerMessage::Rebuild { strokes });
                }
                JoinDecision::InvalidInvite => {
                    info!(%connection_id, %room_id, identity = %identity.id, "join rejected");
                    let _ = tx.send(ServerMessage::Error {
                        message: "invalid-invite".into(),
                    });
                }
            }
        }
        ClientMessage::CreateInvite { room_id } => {
            match access::create_invite(state, &room_id, &identity.id).await {
                Some(token) => {
                    let _ = tx.send(ServerMessage::Invite { token });
                }
                // Non-owners get nothing back, not even an error.
                None => info!(%connection_id, %room_id, identity = %identity.id, "invite denied"),
            }
        }
        ClientMessage::DrawStart {
            room_id,
            stroke_id,
            x,
            y,
            color,
            size,
        } => {
            if !access::is_member(state, &room_id, &identity.id).await {
                return;
            }
            let room = rooms::get_or_create_room(state, &room_id).await;
            let outgoing = {
                let mut room = room.write().await;
                logic::draw_start(&mut room, stroke_id, Point { x, y }, color, size, &identity.id)
            };
            route(state, &room_id, connection_id, outgoing).await;
        }
        ClientMessage::DrawMove {
            room_id,
            stroke_id,
            x,
            y,
        } => {
            if !access::is_member(state, &room_id, &identity.id).await {
                return;
            }
            let Some(room) = rooms::lookup_room(state, &room_id).await else {
                return;
            };
            let outgoing = {
                let mut room = room.write().await;
                logic::draw_move(&mut room, &stroke_id, Point { x, y })
            };
            route(state, &room_id, connection_id, outgoing).await;
        }
        ClientMessage::DrawEnd { room_id, stroke_id } => {
            if !access::is_member(state, &room_id, &identity.id).await {
                return;
            }
            let Some(room) = rooms::lookup_room(state, &room_id).await else {
                return;
            };
            {
                let mut room = room.write().await;
                logic::draw_end(&mut room, &stroke_id);
            }
            rooms::spawn_flush(state, &room_id, &room);
        }
        ClientMessage::Cursor { room_id, x, y } => {
            if !access::is_member(state, &room_id, &identity.id).await {
                return;
            }
            if rooms::lookup_room(state, &room_id).await.is_none() {
                return;
            }
            let outgoing = logic::cursor(&identity.id, Point { x, y });
            route(state, &room_id, connection_id, outgoing).await;
        }
        ClientMessage::Undo { room_id } => {
            if !access::is_member(state, &room_id, &identity.id).await {
                return;
            }
            let Some(room) = rooms::lookup_room(state, &room_id).await else {
                return;
            };
            let outgoing = {
                let mut room = room.write().await;
                logic::undo(&mut room)
            };
            route(state, &room_id, connection_id, outgoing).await;
        }
        ClientMessage::Redo { room_id } => {
            if !access::is_member(state, &room_id, &identity.id).await {
                return;
            }
            let Some(room) = rooms::lookup_room(state, &room_id).await else {
                return;
            };
            let outgoing = {
                let mut room = room.write().await;
                logic::redo(&mut room)
            };
            route(state, &room_id, connection_id, outgoing).await;
        }
        ClientMessage::ClearBoard { room_id } => {
            if !access::is_member(state, &room_id, &identity.id).await {
                return;
            }
            let Some(room) = rooms::lookup_room(state, &room_id).await else {
                return;
            };
            let outgoing = {
                let mut room = room.write().await;
                Some(logic::clear_board(&mut room))
            };
            route(state, &room_id, connection_id, outgoing).await;
            rooms::spawn_flush(state, &room_id, &room);
        }
        ClientMessage::SaveBoard { room_id } => {
            if !access::is_member(state, &room_id, &identity.id).await {
                return;
            }
            let Some(room) = rooms::lookup_room(state, &room_id).await else {
                return;
            };
            let strokes = rooms::snapshot_for_save(&room).await;
            match state.storage.save(&room_id, &strokes).await {
                Ok(()) => {
                    info!(%connection_id, %room_id, "board saved");
                    let _ = tx.send(ServerMessage::Saved { room_id });
                }
                Err(error) => {
                    warn!(%connection_id, %room_id, %error, "explicit save failed");
                    room.write().await.dirty = true;
                    let _ = tx.send(ServerMessage::Error {
                        message: format!("save-failed: {error}"),
                    });
                }
            }
        }
    }
}

async fn route(state: &AppState, room_id: &str, sender: Uuid, outgoing: Option<Outgoing>) {
    let Some(Outgoing { message, fanout }) = outgoing else {
        return;
    };
    let Some(room) = rooms::lookup_room(state, room_id).await else {
        return;
    };
    let exclude = matches!(fanout, Fanout::Others).then_some(sender);
    logic::broadcast(&room, exclude, message).await;
}

#[cfg(test)]
#[path = "handlers_test.rs"]
mod tests;
