use super::*;
use std::time::Duration;

use crate::state::test_helpers::{failing_app_state, test_app_state};
use crate::state::AppState;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

struct TestConn {
    connection_id: Uuid,
    identity: Identity,
    tx: mpsc::UnboundedSender<ServerMessage>,
    rx: UnboundedReceiver<ServerMessage>,
    joined: HashSet<String>,
}

fn conn(id: &str) -> TestConn {
    let (tx, rx) = mpsc::unbounded_channel();
    TestConn {
        connection_id: Uuid::new_v4(),
        identity: Identity {
            id: id.to_string(),
            name: id.to_uppercase(),
        },
        tx,
        rx,
        joined: HashSet::new(),
    }
}

async fn send(state: &AppState, conn: &mut TestConn, message: ClientMessage) {
    process(
        state,
        conn.connection_id,
        &conn.identity,
        &conn.tx,
        &mut conn.joined,
        message,
    )
    .await;
}

fn join_msg(room_id: &str, invite_token: Option<&str>) -> ClientMessage {
    ClientMessage::JoinRoom {
        room_id: room_id.to_string(),
        invite_token: invite_token.map(str::to_string),
    }
}

fn draw_start_msg(room_id: &str, stroke_id: &str, x: f32, y: f32) -> ClientMessage {
    ClientMessage::DrawStart {
        room_id: room_id.to_string(),
        stroke_id: stroke_id.to_string(),
        x,
        y,
        color: "#336699".into(),
        size: 4.0,
    }
}

fn drain(conn: &mut TestConn) {
    while conn.rx.try_recv().is_ok() {}
}

/// Wait out a fire-and-forget flush by polling the storage adapter.
async fn wait_for_record(state: &AppState, room_id: &str, len: usize) {
    for _ in 0..100 {
        if let Ok(Some(strokes)) = state.storage.load(room_id).await {
            if strokes.len() == len {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no persisted record of {len} strokes for {room_id}");
}

#[tokio::test]
async fn owner_draw_undo_invite_guest_flow() {
    let state = test_app_state();
    let mut owner = conn("owner");

    // First joiner creates the board and gets the (empty) log replayed.
    send(&state, &mut owner, join_msg("r1", None)).await;
    match owner.rx.try_recv() {
        Ok(ServerMessage::Rebuild { strokes }) => assert!(strokes.is_empty()),
        other => panic!("expected rebuild, got {other:?}"),
    }
    assert!(owner.joined.contains("r1"));

    // One stroke, three points.
    send(&state, &mut owner, draw_start_msg("r1", "a", 0.0, 0.0)).await;
    for i in 1..=2 {
        send(
            &state,
            &mut owner,
            ClientMessage::DrawMove {
                room_id: "r1".into(),
                stroke_id: "a".into(),
                x: i as f32,
                y: 0.0,
            },
        )
        .await;
    }
    {
        let room = rooms::lookup_room(&state, "r1").await.unwrap();
        let room = room.read().await;
        assert_eq!(room.strokes.len(), 1);
        assert_eq!(room.strokes[0].points.len(), 3);
    }
    // Own draw events are not echoed back.
    assert!(matches!(owner.rx.try_recv(), Err(TryRecvError::Empty)));

    // Undo moves the stroke to the redo stack and rebuilds everyone.
    send(
        &state,
        &mut owner,
        ClientMessage::Undo {
            room_id: "r1".into(),
        },
    )
    .await;
    assert_eq!(
        owner.rx.try_recv(),
        Ok(ServerMessage::Rebuild {
            strokes: Vec::new()
        })
    );
    {
        let room = rooms::lookup_room(&state, "r1").await.unwrap();
        let room = room.read().await;
        assert!(room.strokes.is_empty());
        assert_eq!(room.redo.len(), 1);
    }

    // A stranger without a token is turned away with an error, no rebuild.
    let mut guest = conn("guest");
    send(&state, &mut guest, join_msg("r1", None)).await;
    match guest.rx.try_recv() {
        Ok(ServerMessage::Error { message }) => assert_eq!(message, "invalid-invite"),
        other => panic!("expected error, got {other:?}"),
    }
    assert!(matches!(guest.rx.try_recv(), Err(TryRecvError::Empty)));
    assert!(guest.joined.is_empty());
    assert!(!access::is_member(&state, "r1", "guest").await);

    // Owner mints an invite; the guest joins with it.
    send(
        &state,
        &mut owner,
        ClientMessage::CreateInvite {
            room_id: "r1".into(),
        },
    )
    .await;
    let token = match owner.rx.try_recv() {
        Ok(ServerMessage::Invite { token }) => token,
        other => panic!("expected invite, got {other:?}"),
    };

    send(&state, &mut guest, join_msg("r1", Some(&token))).await;
    assert_eq!(
        guest.rx.try_recv(),
        Ok(ServerMessage::Rebuild {
            strokes: Vec::new()
        })
    );
    assert!(access::is_member(&state, "r1", "guest").await);
}

#[tokio::test]
async fn draw_and_cursor_fan_out_to_others_only() {
    let state = test_app_state();
    let mut owner = conn("owner");
    let mut guest = conn("guest");
    send(&state, &mut owner, join_msg("r1", None)).await;
    drain(&mut owner);
    send(
        &state,
        &mut owner,
        ClientMessage::CreateInvite {
            room_id: "r1".into(),
        },
    )
    .await;
    let token = match owner.rx.try_recv() {
        Ok(ServerMessage::Invite { token }) => token,
        other => panic!("expected invite, got {other:?}"),
    };
    send(&state, &mut guest, join_msg("r1", Some(&token))).await;
    drain(&mut owner);
    drain(&mut guest);

    send(&state, &mut owner, draw_start_msg("r1", "a", 0.0, 0.0)).await;
    match guest.rx.try_recv() {
        Ok(ServerMessage::DrawStart {
            stroke_id,
            author_id,
            ..
        }) => {
            assert_eq!(stroke_id, "a");
            assert_eq!(author_id, "owner");
        }
        other => panic!("expected draw-start, got {other:?}"),
    }
    assert!(matches!(owner.rx.try_recv(), Err(TryRecvError::Empty)));

    send(
        &state,
        &mut guest,
        ClientMessage::Cursor {
            room_id: "r1".into(),
            x: 5.0,
            y: 6.0,
        },
    )
    .await;
    assert_eq!(
        owner.rx.try_recv(),
        Ok(ServerMessage::Cursor {
            id: "guest".into(),
            x: 5.0,
            y: 6.0
        })
    );
    assert!(matches!(guest.rx.try_recv(), Err(TryRecvError::Empty)));
    // Cursors leave the log untouched.
    let room = rooms::lookup_room(&state, "r1").await.unwrap();
    assert_eq!(room.read().await.strokes.len(), 1);

    // Undo rebuilds everyone, requester included.
    send(
        &state,
        &mut guest,
        ClientMessage::Undo {
            room_id: "r1".into(),
        },
    )
    .await;
    assert!(matches!(
        owner.rx.try_recv(),
        Ok(ServerMessage::Rebuild { .. })
    ));
    assert!(matches!(
        guest.rx.try_recv(),
        Ok(ServerMessage::Rebuild { .. })
    ));
}

#[tokio::test]
async fn non_members_are_silently_ignored() {
    let state = test_app_state();
    let mut owner = conn("owner");
    send(&state, &mut owner, join_msg("r1", None)).await;
    send(&state, &mut owner, draw_start_msg("r1", "a", 0.0, 0.0)).await;

    let mut stranger = conn("stranger");
    send(&state, &mut stranger, draw_start_msg("r1", "x", 0.0, 0.0)).await;
    send(
        &state,
        &mut stranger,
        ClientMessage::Undo {
            room_id: "r1".into(),
        },
    )
    .await;
    send(
        &state,
        &mut stranger,
        ClientMessage::ClearBoard {
            room_id: "r1".into(),
        },
    )
    .await;

    let room = rooms::lookup_room(&state, "r1").await.unwrap();
    let room = room.read().await;
    assert_eq!(room.strokes.len(), 1);
    assert_eq!(room.strokes[0].id, "a");
    drain(&mut owner);
    assert!(matches!(stranger.rx.try_recv(), Err(TryRecvError::Empty)));

    // Draw events never conjure a board out of nothing either.
    send(&state, &mut stranger, draw_start_msg("r9", "x", 0.0, 0.0)).await;
    assert!(rooms::lookup_room(&state, "r9").await.is_none());
    assert!(!state.boards.read().await.contains_key("r9"));
}

#[tokio::test]
async fn invite_creation_by_non_owner_yields_nothing() {
    let state = test_app_state();
    let mut owner = conn("owner");
    let mut guest = conn("guest");
    send(&state, &mut owner, join_msg("r1", None)).await;
    drain(&mut owner);
    send(
        &state,
        &mut owner,
        ClientMessage::CreateInvite {
            room_id: "r1".into(),
        },
    )
    .await;
    let token = match owner.rx.try_recv() {
        Ok(ServerMessage::Invite { token }) => token,
        other => panic!("expected invite, got {other:?}"),
    };
    send(&state, &mut guest, join_msg("r1", Some(&token))).await;
    drain(&mut guest);

    // A plain member is not the owner.
    send(
        &state,
        &mut guest,
        ClientMessage::CreateInvite {
            room_id: "r1".into(),
        },
    )
    .await;
    assert!(matches!(guest.rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn explicit_save_acks_and_persists() {
    let state = test_app_state();
    let mut owner = conn("owner");
    send(&state, &mut owner, join_msg("r1", None)).await;
    send(&state, &mut owner, draw_start_msg("r1", "a", 1.0, 2.0)).await;
    drain(&mut owner);

    send(
        &state,
        &mut owner,
        ClientMessage::SaveBoard {
            room_id: "r1".into(),
        },
    )
    .await;
    assert_eq!(
        owner.rx.try_recv(),
        Ok(ServerMessage::Saved {
            room_id: "r1".into()
        })
    );
    let persisted = state.storage.load("r1").await.unwrap().unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].author_id, "owner");
}

#[tokio::test]
async fn failed_save_reports_and_spares_the_room() {
    let state = failing_app_state();
    let mut owner = conn("owner");
    send(&state, &mut owner, join_msg("r1", None)).await;
    send(&state, &mut owner, draw_start_msg("r1", "a", 1.0, 2.0)).await;
    drain(&mut owner);

    send(
        &state,
        &mut owner,
        ClientMessage::SaveBoard {
            room_id: "r1".into(),
        },
    )
    .await;
    match owner.rx.try_recv() {
        Ok(ServerMessage::Error { message }) => {
            assert!(message.starts_with("save-failed:"), "got {message}");
        }
        other => panic!("expected error, got {other:?}"),
    }
    // In-memory state is intact and still marked for a retry.
    let room = rooms::lookup_room(&state, "r1").await.unwrap();
    let room = room.read().await;
    assert_eq!(room.strokes.len(), 1);
    assert!(room.dirty);
}

#[tokio::test]
async fn draw_end_flushes_the_room() {
    let state = test_app_state();
    let mut owner = conn("owner");
    send(&state, &mut owner, join_msg("r1", None)).await;
    send(&state, &mut owner, draw_start_msg("r1", "a", 0.0, 0.0)).await;
    send(
        &state,
        &mut owner,
        ClientMessage::DrawEnd {
            room_id: "r1".into(),
            stroke_id: "a".into(),
        },
    )
    .await;

    wait_for_record(&state, "r1", 1).await;
}

#[tokio::test]
async fn clear_board_truncates_memory_and_record() {
    let state = test_app_state();
    let mut owner = conn("owner");
    send(&state, &mut owner, join_msg("r1", None)).await;
    send(&state, &mut owner, draw_start_msg("r1", "a", 0.0, 0.0)).await;
    send(
        &state,
        &mut owner,
        ClientMessage::Undo {
            room_id: "r1".into(),
        },
    )
    .await;
    send(&state, &mut owner, draw_start_msg("r1", "b", 0.0, 0.0)).await;
    drain(&mut owner);

    send(
        &state,
        &mut owner,
        ClientMessage::ClearBoard {
            room_id: "r1".into(),
        },
    )
    .await;
    assert_eq!(owner.rx.try_recv(), Ok(ServerMessage::ClearBoard));
    {
        let room = rooms::lookup_room(&state, "r1").await.unwrap();
        let room = room.read().await;
        assert!(room.strokes.is_empty());
        assert!(room.redo.is_empty());
    }
    wait_for_record(&state, "r1", 0).await;
}

#[tokio::test]
async fn rejoin_after_eviction_replays_the_persisted_log() {
    let state = test_app_state();
    let mut owner = conn("owner");
    send(&state, &mut owner, join_msg("r1", None)).await;
    send(&state, &mut owner, draw_start_msg("r1", "a", 0.0, 0.0)).await;
    drain(&mut owner);

    // Last connection leaves: dirty log is flushed, runtime evicted.
    rooms::detach_connection(&state, "r1", owner.connection_id).await;
    assert!(state.rooms.read().await.is_empty());

    let mut back = conn("owner");
    send(&state, &mut back, join_msg("r1", None)).await;
    match back.rx.try_recv() {
        Ok(ServerMessage::Rebuild { strokes }) => {
            assert_eq!(strokes.len(), 1);
            assert_eq!(strokes[0].id, "a");
        }
        other => panic!("expected rebuild, got {other:?}"),
    }
}

#[tokio::test]
async fn rooms_do_not_bleed_into_each_other() {
    let state = test_app_state();
    let mut owner = conn("owner");
    send(&state, &mut owner, join_msg("r1", None)).await;
    send(&state, &mut owner, join_msg("r2", None)).await;
    send(&state, &mut owner, draw_start_msg("r1", "a", 0.0, 0.0)).await;

    let r2 = rooms::lookup_room(&state, "r2").await.unwrap();
    assert!(r2.read().await.strokes.is_empty());
    let r1 = rooms::lookup_room(&state, "r1").await.unwrap();
    assert_eq!(r1.read().await.strokes.len(), 1);
}

#[tokio::test]
async fn repeated_hello_is_an_error() {
    let state = test_app_state();
    let mut owner = conn("owner");
    let identity = owner.identity.clone();
    send(&state, &mut owner, ClientMessage::Hello { identity }).await;
    assert!(matches!(
        owner.rx.try_recv(),
        Ok(ServerMessage::Error { .. })
    ));
}
