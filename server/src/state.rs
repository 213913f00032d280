use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use inkroom_shared::{Identity, ServerMessage, Stroke};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::storage::Storage;

pub const MAX_STROKES: usize = 2000;
pub const MAX_POINTS_PER_STROKE: usize = 5000;
pub const INVITE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct AppState {
    /// Per-room runtime state, created lazily and evicted when idle.
    pub rooms: Arc<RwLock<HashMap<String, Arc<RwLock<Room>>>>>,
    /// Membership metadata, kept for the process lifetime.
    pub boards: Arc<RwLock<HashMap<String, Board>>>,
    pub invites: Arc<RwLock<HashMap<String, Invite>>>,
    /// Every open connection and the identity bound to it. Multiple
    /// connections may carry the same identity.
    pub connections: Arc<RwLock<HashMap<Uuid, Identity>>>,
    pub storage: Arc<dyn Storage>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            boards: Arc::new(RwLock::new(HashMap::new())),
            invites: Arc::new(RwLock::new(HashMap::new())),
            connections: Arc::new(RwLock::new(HashMap::new())),
            storage,
        }
    }
}

/// Who may act on a room. The first joiner becomes the owner and stays a
/// member; membership only grows.
pub struct Board {
    pub owner: String,
    pub members: HashSet<String>,
}

impl Board {
    pub fn new(owner: &str) -> Self {
        let mut members = HashSet::new();
        members.insert(owner.to_string());
        Self {
            owner: owner.to_string(),
            members,
        }
    }

    pub fn is_member(&self, identity_id: &str) -> bool {
        self.members.contains(identity_id)
    }
}

pub struct Invite {
    pub room_id: String,
    pub created_at: Instant,
}

impl Invite {
    pub fn expired_at(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > INVITE_TTL
    }
}

pub struct Room {
    /// Append-ordered operation log.
    pub strokes: Vec<Stroke>,
    /// Strokes popped by undo, in LIFO order. Disjoint from `strokes`.
    pub redo: Vec<Stroke>,
    /// Stroke ids still accepting points.
    pub active_ids: HashSet<String>,
    /// Connections enrolled in this room's broadcast group.
    pub peers: HashMap<Uuid, mpsc::UnboundedSender<ServerMessage>>,
    pub dirty: bool,
}

impl Room {
    pub fn new(strokes: Vec<Stroke>) -> Self {
        Self {
            strokes,
            redo: Vec::new(),
            active_ids: HashSet::new(),
            peers: HashMap::new(),
            dirty: false,
        }
    }
}
