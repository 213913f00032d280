//! Board membership and invite capabilities.
//!
//! A board springs into existence the first time anyone joins its room id,
//! with that identity as owner. Everyone else needs an invite token: a
//! random capability the owner hands out, scoped to one room, consumed on
//! first successful use, and expired after [`INVITE_TTL`](crate::state::INVITE_TTL).

use std::fmt::Write;
use std::time::Instant;

use rand::Rng;
use tracing::info;

use crate::state::{AppState, Board, Invite};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JoinDecision {
    Accepted,
    InvalidInvite,
}

pub async fn join(
    state: &AppState,
    room_id: &str,
    identity_id: &str,
    invite_token: Option<&str>,
) -> JoinDecision {
    {
        let mut boards = state.boards.write().await;
        match boards.get(room_id) {
            None => {
                boards.insert(room_id.to_string(), Board::new(identity_id));
                info!(%room_id, owner = %identity_id, "board created");
                return JoinDecision::Accepted;
            }
            Some(board) if board.is_member(identity_id) => return JoinDecision::Accepted,
            Some(_) => {}
        }
    }

    let Some(token) = invite_token else {
        return JoinDecision::InvalidInvite;
    };
    if !consume_invite(state, token, room_id).await {
        return JoinDecision::InvalidInvite;
    }

    let mut boards = state.boards.write().await;
    if let Some(board) = boards.get_mut(room_id) {
        board.members.insert(identity_id.to_string());
        info!(%room_id, member = %identity_id, "member enrolled via invite");
    }
    JoinDecision::Accepted
}

/// Owner-only. Returns the token to hand back to the caller; anyone else
/// gets nothing.
pub async fn create_invite(state: &AppState, room_id: &str, identity_id: &str) -> Option<String> {
    {
        let boards = state.boards.read().await;
        match boards.get(room_id) {
            Some(board) if board.owner == identity_id => {}
            _ => return None,
        }
    }
    let token = generate_token();
    state.invites.write().await.insert(
        token.clone(),
        Invite {
            room_id: room_id.to_string(),
            created_at: Instant::now(),
        },
    );
    info!(%room_id, "invite created");
    Some(token)
}

pub async fn is_member(state: &AppState, room_id: &str, identity_id: &str) -> bool {
    let boards = state.boards.read().await;
    boards
        .get(room_id)
        .is_some_and(|board| board.is_member(identity_id))
}

/// A token is good for exactly one enrollment: checking it out removes it.
/// A token presented for the wrong room is left in place.
async fn consume_invite(state: &AppState, token: &str, room_id: &str) -> bool {
    consume_invite_at(state, token, room_id, Instant::now()).await
}

async fn consume_invite_at(state: &AppState, token: &str, room_id: &str, now: Instant) -> bool {
    let mut invites = state.invites.write().await;
    let Some(invite) = invites.get(token) else {
        return false;
    };
    if invite.expired_at(now) {
        invites.remove(token);
        return false;
    }
    if invite.room_id != room_id {
        return false;
    }
    invites.remove(token);
    true
}

/// Expired invites are also dropped lazily on use; this sweep keeps the
/// map from accumulating tokens nobody ever presents.
pub async fn sweep_expired_invites(state: &AppState) {
    sweep_expired_invites_at(state, Instant::now()).await;
}

async fn sweep_expired_invites_at(state: &AppState, now: Instant) {
    let mut invites = state.invites.write().await;
    invites.retain(|_, invite| !invite.expired_at(now));
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

#[cfg(test)]
#[path = "access_test.rs"]
mod tests;
