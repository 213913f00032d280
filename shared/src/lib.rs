use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

pub mod board_format;

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One continuous drawing gesture. Clients assign the id at draw-start and
/// address every later move/end at it.
#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub id: String,
    pub points: Vec<Point>,
    pub color: String,
    pub size: f32,
    pub author_id: String,
}

/// Opaque client identity, established before any room interaction and
/// presented once in the connection handshake.
#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "hello")]
    Hello { identity: Identity },
    #[serde(rename = "join-room", rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        #[serde(default)]
        invite_token: Option<String>,
    },
    #[serde(rename = "create-invite", rename_all = "camelCase")]
    CreateInvite { room_id: String },
    #[serde(rename = "draw-start", rename_all = "camelCase")]
    DrawStart {
        room_id: String,
        stroke_id: String,
        x: f32,
        y: f32,
        color: String,
        size: f32,
    },
    #[serde(rename = "draw-move", rename_all = "camelCase")]
    DrawMove {
        room_id: String,
        stroke_id: String,
        x: f32,
        y: f32,
    },
    #[serde(rename = "draw-end", rename_all = "camelCase")]
    DrawEnd { room_id: String, stroke_id: String },
    #[serde(rename = "cursor", rename_all = "camelCase")]
    Cursor { room_id: String, x: f32, y: f32 },
    #[serde(rename = "undo", rename_all = "camelCase")]
    Undo { room_id: String },
    #[serde(rename = "redo", rename_all = "camelCase")]
    Redo { room_id: String },
    #[serde(rename = "clear-board", rename_all = "camelCase")]
    ClearBoard { room_id: String },
    #[serde(rename = "save-board", rename_all = "camelCase")]
    SaveBoard { room_id: String },
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Authoritative full replacement of the receiver's view of the log.
    #[serde(rename = "rebuild")]
    Rebuild { strokes: Vec<Stroke> },
    #[serde(rename = "draw-start", rename_all = "camelCase")]
    DrawStart {
        stroke_id: String,
        x: f32,
        y: f32,
        color: String,
        size: f32,
        author_id: String,
    },
    #[serde(rename = "draw-move", rename_all = "camelCase")]
    DrawMove { stroke_id: String, x: f32, y: f32 },
    #[serde(rename = "clear-board")]
    ClearBoard,
    #[serde(rename = "cursor")]
    Cursor { id: String, x: f32, y: f32 },
    #[serde(rename = "invite")]
    Invite { token: String },
    #[serde(rename = "saved", rename_all = "camelCase")]
    Saved { room_id: String },
    #[serde(rename = "error")]
    Error { message: String },
}
