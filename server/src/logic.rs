//! Per-room log mutations.
//!
//! Every function here runs under the room's write lock, so a room's
//! stroke log, redo stack, and active set never see interleaved updates.
//! Functions return the outbound messages with their fan-out policy; the
//! dispatch layer owns delivery.

use std::sync::Arc;

use inkroom_shared::{Point, ServerMessage, Stroke};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::state::{Room, MAX_POINTS_PER_STROKE, MAX_STROKES};

/// Delivery target for one outbound message. Unicast replies (rebuild on
/// join, invite tokens, save acks, errors) never pass through here; the
/// dispatch layer sends those straight down the requester's channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fanout {
    /// Every enrolled peer except the sender.
    Others,
    /// Every enrolled peer, sender included.
    All,
}

#[derive(Debug)]
pub struct Outgoing {
    pub message: ServerMessage,
    pub fanout: Fanout,
}

fn out(message: ServerMessage, fanout: Fanout) -> Outgoing {
    Outgoing { message, fanout }
}

pub fn draw_start(
    room: &mut Room,
    stroke_id: String,
    point: Point,
    color: String,
    size: f32,
    author_id: &str,
) -> Option<Outgoing> {
    if !valid_stroke_id(&stroke_id) {
        return None;
    }
    let point = normalize_point(point)?;
    let color = sanitize_color(color);
    let size = sanitize_size(size);
    room.strokes.push(Stroke {
        id: stroke_id.clone(),
        points: vec![point],
        color: color.clone(),
        size,
        author_id: author_id.to_string(),
    });
    trim_overflow(room);
    room.active_ids.insert(stroke_id.clone());
    room.dirty = true;
    // The redo stack is left untouched: strokes undone earlier stay
    // redoable even after new drawing begins.
    Some(out(
        ServerMessage::DrawStart {
            stroke_id,
            x: point.x,
            y: point.y,
            color,
            size,
            author_id: author_id.to_string(),
        },
        Fanout::Others,
    ))
}

pub fn draw_move(room: &mut Room, stroke_id: &str, point: Point) -> Option<Outgoing> {
    if !valid_stroke_id(stroke_id) {
        return None;
    }
    let point = normalize_point(point)?;
    if !room.active_ids.contains(stroke_id) {
        return None;
    }
    let stroke = room
        .strokes
        .iter_mut()
        .find(|stroke| stroke.id == stroke_id)?;
    if stroke.points.len() >= MAX_POINTS_PER_STROKE {
        return None;
    }
    stroke.points.push(point);
    room.dirty = true;
    Some(out(
        ServerMessage::DrawMove {
            stroke_id: stroke_id.to_string(),
            x: point.x,
            y: point.y,
        },
        Fanout::Others,
    ))
}

/// A stroke is never structurally finalized; ending it only stops further
/// points from attaching. The caller follows up with a flush.
pub fn draw_end(room: &mut Room, stroke_id: &str) {
    room.active_ids.remove(stroke_id);
}

pub fn undo(room: &mut Room) -> Option<Outgoing> {
    let stroke = room.strokes.pop()?;
    room.active_ids.remove(&stroke.id);
    room.redo.push(stroke);
    room.dirty = true;
    Some(out(
        ServerMessage::Rebuild {
            strokes: room.strokes.clone(),
        },
        Fanout::All,
    ))
}

pub fn redo(room: &mut Room) -> Option<Outgoing> {
    let stroke = room.redo.pop()?;
    room.strokes.push(stroke);
    trim_overflow(room);
    room.dirty = true;
    Some(out(
        ServerMessage::Rebuild {
            strokes: room.strokes.clone(),
        },
        Fanout::All,
    ))
}

/// Clearing truncates the log, the redo stack, and (after the caller's
/// flush) the persisted record, so cleared strokes cannot resurface.
pub fn clear_board(room: &mut Room) -> Outgoing {
    room.strokes.clear();
    room.redo.clear();
    room.active_ids.clear();
    room.dirty = true;
    out(ServerMessage::ClearBoard, Fanout::All)
}

/// Cursors are a pure relay: never stored, never persisted.
pub fn cursor(author_id: &str, point: Point) -> Option<Outgoing> {
    let point = normalize_point(point)?;
    Some(out(
        ServerMessage::Cursor {
            id: author_id.to_string(),
            x: point.x,
            y: point.y,
        },
        Fanout::Others,
    ))
}

/// Deliver to the room's enrolled peers, dropping any whose channel has
/// gone away.
pub async fn broadcast(
    room: &Arc<RwLock<Room>>,
    exclude: Option<Uuid>,
    message: ServerMessage,
) {
    let mut stale = Vec::new();
    {
        let room = room.read().await;
        for (id, tx) in room.peers.iter() {
            if Some(*id) == exclude {
                continue;
            }
            if tx.send(message.clone()).is_err() {
                stale.push(*id);
            }
        }
    }

    if !stale.is_empty() {
        let mut room = room.write().await;
        for id in stale {
            room.peers.remove(&id);
        }
    }
}

pub fn sanitize_strokes(strokes: Vec<Stroke>) -> Vec<Stroke> {
    strokes.into_iter().filter_map(sanitize_stroke).collect()
}

fn valid_stroke_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64
}

fn normalize_point(point: Point) -> Option<Point> {
    if !point.x.is_finite() || !point.y.is_finite() {
        return None;
    }
    Some(point)
}

fn sanitize_color(color: String) -> String {
    if color.is_empty() {
        return "#1f1f1f".to_string();
    }
    if color.len() > 32 {
        return color.chars().take(32).collect();
    }
    color
}

fn sanitize_size(size: f32) -> f32 {
    let size = if size.is_finite() { size } else { 6.0 };
    size.max(1.0).min(60.0)
}

fn sanitize_stroke(mut stroke: Stroke) -> Option<Stroke> {
    if !valid_stroke_id(&stroke.id) {
        return None;
    }
    stroke.color = sanitize_color(stroke.color);
    stroke.size = sanitize_size(stroke.size);
    stroke.points = stroke
        .points
        .into_iter()
        .filter_map(normalize_point)
        .collect();
    if stroke.points.is_empty() {
        return None;
    }
    Some(stroke)
}

fn trim_overflow(room: &mut Room) {
    let overflow = room.strokes.len().saturating_sub(MAX_STROKES);
    if overflow > 0 {
        let removed = room.strokes.drain(0..overflow).collect::<Vec<_>>();
        for stroke in removed {
            room.active_ids.remove(&stroke.id);
        }
    }
}

#[cfg(test)]
#[path = "logic_test.rs"]
mod tests;
